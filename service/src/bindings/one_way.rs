//! Fire-and-forget signal binding.

use std::sync::Arc;

use cmdgate_core::{Dispatcher, Inbound, ReplyRoute};
use cmdgate_protocol::RawPayload;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{DiscardSink, deliver};

/// A signal that has been handed to the blocking pool.
#[derive(Debug)]
pub struct FiredSignal {
    pub request_id: String,
    /// Completes once the dispatch (and its trace) is written.
    pub task: JoinHandle<()>,
}

pub struct SignalBinding {
    dispatcher: Arc<Dispatcher>,
    runtime: Handle,
}

impl SignalBinding {
    pub fn new(dispatcher: Arc<Dispatcher>, runtime: Handle) -> Self {
        Self {
            dispatcher,
            runtime,
        }
    }

    /// Trigger `capability` without arguments. Returns immediately; the
    /// response is traced and thrown away.
    pub fn fire(&self, capability: &str) -> FiredSignal {
        self.fire_as(uuid::Uuid::new_v4().to_string(), capability)
    }

    /// [`SignalBinding::fire`] under a caller-chosen request id, so the
    /// caller can find the dispatch in the trace.
    pub fn fire_as(&self, request_id: String, capability: &str) -> FiredSignal {
        let inbound = Inbound::new(
            RawPayload::Signal {
                request_id: request_id.clone(),
                capability: capability.to_string(),
            },
            ReplyRoute::Discarded,
        )
        .with_hints(Some(capability.to_string()), None);

        let dispatcher = Arc::clone(&self.dispatcher);
        let task = self.runtime.spawn_blocking(move || {
            let outcome = dispatcher.dispatch(inbound);
            let _ = deliver(&dispatcher, &outcome, &DiscardSink);
        });
        tracing::debug!(%request_id, capability, "Signal fired");

        FiredSignal { request_id, task }
    }
}
