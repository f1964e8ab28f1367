//! Synchronous call-and-return binding.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::time::Duration;

use cmdgate_core::{Dispatcher, Inbound, ReplyRoute};
use cmdgate_protocol::{GatewayError, RawPayload, Response};
use tokio::runtime::Handle;

use super::{DeliveryError, Reply, ReplySink, deliver};

/// Hands the response to the one thread blocked in [`SyncCallBinding::call`].
struct ReturnSlot {
    tx: SyncSender<Response>,
}

impl ReplySink for ReturnSlot {
    fn send(&self, reply: &Reply) -> Result<(), DeliveryError> {
        // Capacity 1 and a single send: a full slot cannot happen, a
        // disconnected one means the caller timed out.
        self.tx
            .try_send(reply.response.clone())
            .map_err(|e| match e {
                std::sync::mpsc::TrySendError::Full(_) => DeliveryError::ChannelFull,
                std::sync::mpsc::TrySendError::Disconnected(_) => DeliveryError::ChannelClosed,
            })
    }
}

pub struct SyncCallBinding {
    dispatcher: Arc<Dispatcher>,
    runtime: Handle,
    timeout: Duration,
}

impl SyncCallBinding {
    pub fn new(dispatcher: Arc<Dispatcher>, runtime: Handle, timeout: Duration) -> Self {
        Self {
            dispatcher,
            runtime,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block the calling thread until the response arrives or the timeout
    /// elapses. Must not be called from an async worker thread.
    pub fn call(&self, payload: RawPayload) -> Response {
        let fallback_id = payload.peek_request_id().unwrap_or_default();
        let (tx, rx) = sync_channel(1);
        let slot = ReturnSlot { tx };
        let inbound = Inbound::new(payload, ReplyRoute::ChannelBound);

        let dispatcher = Arc::clone(&self.dispatcher);
        self.runtime.spawn_blocking(move || {
            let outcome = dispatcher.dispatch(inbound);
            let _ = deliver(&dispatcher, &outcome, &slot);
        });

        self.wait(&rx, fallback_id)
    }

    /// Convenience for canonical envelope JSON.
    pub fn call_json(&self, envelope: &str) -> Response {
        self.call(RawPayload::Envelope(envelope.to_string()))
    }

    fn wait(&self, rx: &Receiver<Response>, fallback_id: String) -> Response {
        match rx.recv_timeout(self.timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => {
                let err = GatewayError::Unavailable(format!(
                    "no reply within {}ms",
                    self.timeout.as_millis()
                ));
                tracing::warn!(request_id = %fallback_id, "{err}");
                Response::failure(fallback_id, "", err.to_string())
            }
            Err(RecvTimeoutError::Disconnected) => {
                // The dispatch task died before delivering.
                let err = GatewayError::Unavailable("dispatch ended without a reply".to_string());
                Response::failure(fallback_id, "", err.to_string())
            }
        }
    }
}
