//! Message-passing binding with an optional per-message reply channel.

use std::sync::Arc;

use cmdgate_core::{Dispatcher, Inbound, ReplyRoute};
use cmdgate_protocol::{GatewayError, RawPayload};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{DeliveryError, DiscardSink, Reply, ReplySink, deliver};

/// Caller-supplied channel carrying encoded responses back.
#[derive(Debug, Clone)]
pub struct ReplyChannel {
    tx: mpsc::Sender<String>,
}

impl ReplyChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ReplySink for ReplyChannel {
    fn send(&self, reply: &Reply) -> Result<(), DeliveryError> {
        self.tx.try_send(reply.encoded.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::ChannelClosed,
        })
    }
}

#[derive(Debug)]
pub struct Message {
    /// Canonical envelope JSON.
    pub body: String,
    pub reply_to: Option<ReplyChannel>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            reply_to: None,
        }
    }

    pub fn with_reply_to(mut self, reply_to: ReplyChannel) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}

/// Addressable inbox. Cloning yields another sender to the same inbox.
#[derive(Debug, Clone)]
pub struct MessengerBinding {
    inbox: mpsc::Sender<Message>,
}

impl MessengerBinding {
    /// Start the inbox task on the current runtime. The task ends once
    /// every [`MessengerBinding`] clone is dropped.
    pub fn spawn(dispatcher: Arc<Dispatcher>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (inbox, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_inbox(dispatcher, rx));
        (Self { inbox }, task)
    }

    pub async fn send(&self, message: Message) -> Result<(), GatewayError> {
        self.inbox
            .send(message)
            .await
            .map_err(|_| GatewayError::Unavailable("messenger inbox closed".to_string()))
    }

    pub fn try_send(&self, message: Message) -> Result<(), GatewayError> {
        self.inbox.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                GatewayError::Unavailable("messenger inbox full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                GatewayError::Unavailable("messenger inbox closed".to_string())
            }
        })
    }
}

async fn run_inbox(dispatcher: Arc<Dispatcher>, mut rx: mpsc::Receiver<Message>) {
    while let Some(Message { body, reply_to }) = rx.recv().await {
        let route = if reply_to.is_some() {
            ReplyRoute::ChannelBound
        } else {
            ReplyRoute::Discarded
        };
        let inbound = Inbound::new(RawPayload::Envelope(body), route);
        let dispatcher = Arc::clone(&dispatcher);
        tokio::task::spawn_blocking(move || {
            let outcome = dispatcher.dispatch(inbound);
            let result = match &reply_to {
                Some(channel) => deliver(&dispatcher, &outcome, channel),
                None => deliver(&dispatcher, &outcome, &DiscardSink),
            };
            // Swallowed: the failure is already on the trace.
            if let Err(e) = result {
                tracing::debug!(request_id = %outcome.request_id, "Messenger reply lost: {e}");
            }
        });
    }
    tracing::debug!("Messenger inbox closed");
}
