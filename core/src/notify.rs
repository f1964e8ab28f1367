//! UI notification seam.
//!
//! Handlers only *request* a notification; the dispatcher fires it through
//! whichever [`UiNotifier`] it was built with.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the broadcast ring. Slow subscribers observe `Lagged`.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiNotification {
    /// The UI should perform its primary action (the clock-in click).
    PrimaryAction,
    /// A past date was backfilled and the UI should refresh it.
    BackfillDone { date: String },
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier closed")]
    Closed,

    #[error("notification failed: {0}")]
    Failed(String),
}

pub trait UiNotifier: Send + Sync {
    fn notify_primary_action(&self) -> Result<(), NotifyError>;

    fn notify_backfill_done(&self, date: &str) -> Result<(), NotifyError>;

    fn notify(&self, notification: &UiNotification) -> Result<(), NotifyError> {
        match notification {
            UiNotification::PrimaryAction => self.notify_primary_action(),
            UiNotification::BackfillDone { date } => self.notify_backfill_done(date),
        }
    }
}

/// Production notifier: fan-out to every subscribed UI.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<UiNotification>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiNotification> {
        self.tx.subscribe()
    }

    fn publish(&self, notification: UiNotification) -> Result<(), NotifyError> {
        // No subscriber is not a failure: the UI may simply not be attached.
        match self.tx.send(notification) {
            Ok(receivers) => {
                tracing::trace!(receivers, "UI notification published");
            }
            Err(broadcast::error::SendError(notification)) => {
                tracing::debug!(?notification, "UI notification had no subscribers");
            }
        }
        Ok(())
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl UiNotifier for BroadcastNotifier {
    fn notify_primary_action(&self) -> Result<(), NotifyError> {
        self.publish(UiNotification::PrimaryAction)
    }

    fn notify_backfill_done(&self, date: &str) -> Result<(), NotifyError> {
        self.publish(UiNotification::BackfillDone {
            date: date.to_string(),
        })
    }
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl UiNotifier for NoopNotifier {
    fn notify_primary_action(&self) -> Result<(), NotifyError> {
        Ok(())
    }

    fn notify_backfill_done(&self, _date: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subscribers_receive_in_order() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.notify_primary_action().unwrap();
        notifier.notify_backfill_done("2024-02-29").unwrap();

        assert_eq!(rx.try_recv().unwrap(), UiNotification::PrimaryAction);
        assert_eq!(
            rx.try_recv().unwrap(),
            UiNotification::BackfillDone {
                date: "2024-02-29".to_string()
            }
        );
    }

    #[test]
    fn publishing_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::new();
        assert!(notifier.notify_primary_action().is_ok());
    }

    #[test]
    fn notification_serializes_with_kind_tag() {
        let value = serde_json::to_value(UiNotification::BackfillDone {
            date: "2024-01-01".to_string(),
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"kind": "backfill_done", "date": "2024-01-01"}));
    }
}
