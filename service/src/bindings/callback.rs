//! Extras + callback-handle binding.
//!
//! The caller sends a flat command next to its request id and an opaque
//! callback handle. The reply travels back through exactly that handle as
//! [`CallbackReply`] extras, together with the service-side stage timings.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cmdgate_core::{Dispatcher, Inbound, ReplyRoute, StageTiming};
use cmdgate_protocol::RawPayload;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{DeliveryError, DiscardSink, Reply, ReplySink, deliver};

/// Extras attached to one callback-style invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandExtras {
    /// `{"capability": "...", <arg>: value, ...}`
    pub command_json: Option<String>,
    pub request_id: Option<String>,
    pub callback: Option<PendingCallback>,
    pub trace_capability: Option<String>,
    pub trace_run_index: Option<i64>,
}

impl CommandExtras {
    pub fn new(request_id: impl Into<String>, command_json: impl Into<String>) -> Self {
        Self {
            command_json: Some(command_json.into()),
            request_id: Some(request_id.into()),
            ..Self::default()
        }
    }

    pub fn with_callback(mut self, callback: PendingCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_trace(mut self, capability: impl Into<String>, run_index: i64) -> Self {
        self.trace_capability = Some(capability.into());
        self.trace_run_index = Some(run_index);
        self
    }
}

/// Extras delivered through the callback handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackReply {
    pub request_id: String,
    pub result_json: String,
    pub capability: String,
    pub run_index: i64,
    #[serde(default)]
    pub stage_ns: Vec<StageTiming>,
}

impl From<&Reply> for CallbackReply {
    fn from(reply: &Reply) -> Self {
        Self {
            request_id: reply.request_id().to_string(),
            result_json: reply.encoded.clone(),
            capability: reply.capability.clone(),
            run_index: reply.run_index,
            stage_ns: reply.stages.clone(),
        }
    }
}

/// Opaque handle the gateway answers through. The caller may cancel it at
/// any time; late replies then fail delivery instead of arriving.
#[derive(Debug, Clone)]
pub struct PendingCallback {
    tx: mpsc::Sender<CallbackReply>,
    cancelled: Arc<AtomicBool>,
}

impl PendingCallback {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CallbackReply>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            tx,
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl ReplySink for PendingCallback {
    fn send(&self, reply: &Reply) -> Result<(), DeliveryError> {
        if self.is_cancelled() {
            return Err(DeliveryError::HandleInvalidated);
        }
        self.tx
            .try_send(CallbackReply::from(reply))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::ChannelFull,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::HandleInvalidated,
            })
    }
}

pub struct CallbackBinding {
    dispatcher: Arc<Dispatcher>,
    runtime: Handle,
}

impl CallbackBinding {
    pub fn new(dispatcher: Arc<Dispatcher>, runtime: Handle) -> Self {
        Self {
            dispatcher,
            runtime,
        }
    }

    /// Accept one invocation. Returns at once; the reply (if a handle was
    /// supplied) arrives on the handle's receiver.
    pub fn start(&self, extras: CommandExtras) -> JoinHandle<()> {
        let CommandExtras {
            command_json,
            request_id,
            callback,
            trace_capability,
            trace_run_index,
        } = extras;

        let route = if callback.is_some() {
            ReplyRoute::IdCorrelated
        } else {
            ReplyRoute::Discarded
        };
        let inbound = Inbound::new(
            RawPayload::Flat {
                request_id,
                command_json,
                run_index: trace_run_index,
            },
            route,
        )
        .with_hints(trace_capability, trace_run_index);

        let dispatcher = Arc::clone(&self.dispatcher);
        self.runtime.spawn_blocking(move || {
            let outcome = dispatcher.dispatch(inbound);
            let result = match &callback {
                Some(handle) => deliver(&dispatcher, &outcome, handle),
                None => deliver(&dispatcher, &outcome, &DiscardSink),
            };
            if let Err(e) = result {
                tracing::debug!(request_id = %outcome.request_id, "Callback reply lost: {e}");
            }
        })
    }
}
