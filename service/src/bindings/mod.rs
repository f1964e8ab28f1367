//! Transport bindings.
//!
//! | binding                       | wire shape | reply route      |
//! |-------------------------------|------------|------------------|
//! | [`one_way::SignalBinding`]    | signal     | discarded        |
//! | [`callback::CallbackBinding`] | flat       | id-correlated    |
//! | [`sync_call::SyncCallBinding`]| envelope   | channel-bound    |
//! | [`messenger::MessengerBinding`]| envelope  | channel-bound    |
//!
//! The daemon hosts the first three behind its socket, one per
//! `"transport"` value (see [`crate::protocol::Transport`]).
//!
//! Each binding owns one [`ReplySink`] variant. Dispatch always runs on the
//! blocking pool; the sink result is reported back to the dispatcher as the
//! `deliver` span.

pub mod callback;
pub mod messenger;
pub mod one_way;
pub mod sync_call;

use cmdgate_core::{DispatchOutcome, Dispatcher, StageTiming};
use cmdgate_core::timing::monotonic_ns;
use cmdgate_protocol::{GatewayError, Response};

pub use callback::{CallbackBinding, CallbackReply, CommandExtras, PendingCallback};
pub use messenger::{Message, MessengerBinding, ReplyChannel};
pub use one_way::{FiredSignal, SignalBinding};
pub use sync_call::SyncCallBinding;

/// A reply ready for delivery.
#[derive(Debug, Clone)]
pub struct Reply {
    pub response: Response,
    pub encoded: String,
    pub capability: String,
    pub run_index: i64,
    pub stages: Vec<StageTiming>,
}

impl Reply {
    /// `None` when the dispatcher dropped the request.
    pub fn from_outcome(outcome: &DispatchOutcome) -> Option<Self> {
        let response = outcome.response()?.clone();
        let encoded = outcome.encoded.clone()?;
        Some(Self {
            response,
            encoded,
            capability: outcome.capability.clone(),
            run_index: outcome.run_index,
            stages: outcome.stages.clone(),
        })
    }

    pub fn request_id(&self) -> &str {
        &self.response.id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("callback handle invalidated")]
    HandleInvalidated,

    #[error("reply channel closed")]
    ChannelClosed,

    #[error("reply channel full")]
    ChannelFull,
}

/// One way of getting a reply back to the caller.
pub trait ReplySink: Send + Sync {
    fn send(&self, reply: &Reply) -> Result<(), DeliveryError>;
}

/// Sink for callers that never listen.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl ReplySink for DiscardSink {
    fn send(&self, reply: &Reply) -> Result<(), DeliveryError> {
        tracing::trace!(request_id = %reply.request_id(), "Reply discarded");
        Ok(())
    }
}

/// Push the outcome through `sink` and trace the result. Dropped requests
/// have nothing to deliver and record nothing.
pub fn deliver(
    dispatcher: &Dispatcher,
    outcome: &DispatchOutcome,
    sink: &dyn ReplySink,
) -> Result<(), DeliveryError> {
    let Some(reply) = Reply::from_outcome(outcome) else {
        return Ok(());
    };
    let start_ns = monotonic_ns();
    let result = sink.send(&reply);
    let traced = result
        .as_ref()
        .map(|_| ())
        .map_err(|e| GatewayError::ReplyDeliveryFailed(e.to_string()).to_string());
    dispatcher.record_delivery(outcome, start_ns, &traced);
    result
}
