//! Client-side result bus.
//!
//! Callers that fan out many requests over one reply path register each
//! request id before sending and await the matching payload.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

pub struct ResultBus<T> {
    pending: Mutex<HashMap<String, oneshot::Sender<T>>>,
}

impl<T> ResultBus<T> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register interest in `request_id`. Registering the same id again
    /// replaces the earlier waiter, whose receiver then errors.
    pub fn register(&self, request_id: impl Into<String>) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let request_id = request_id.into();
        if self.lock().insert(request_id.clone(), tx).is_some() {
            tracing::warn!(%request_id, "Replaced pending result registration");
        }
        rx
    }

    /// Complete and remove the registration for `request_id`. Returns
    /// `false` when nobody was waiting.
    pub fn deliver(&self, request_id: &str, payload: T) -> bool {
        let Some(tx) = self.lock().remove(request_id) else {
            tracing::warn!(%request_id, "Unmatched result delivery");
            return false;
        };
        if tx.send(payload).is_err() {
            tracing::debug!(%request_id, "Result receiver already dropped");
            return false;
        }
        true
    }

    /// Forget a registration, e.g. after the caller gave up.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.lock().remove(request_id).is_some()
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<T>>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T> Default for ResultBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn delivers_to_matching_waiter_only() {
        let bus = ResultBus::new();
        let a = bus.register("a");
        let b = bus.register("b");

        assert!(bus.deliver("b", 2));
        assert!(bus.deliver("a", 1));
        assert_eq!(a.await.unwrap(), 1);
        assert_eq!(b.await.unwrap(), 2);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn unmatched_delivery_is_reported() {
        let bus: ResultBus<u8> = ResultBus::new();
        assert!(!bus.deliver("ghost", 0));
    }

    #[test]
    fn delivery_removes_registration() {
        let bus = ResultBus::new();
        let _rx = bus.register("once");
        assert!(bus.deliver("once", "first"));
        assert!(!bus.deliver("once", "second"));
    }

    #[tokio::test]
    async fn cancel_drops_the_waiter() {
        let bus: ResultBus<u8> = ResultBus::new();
        let rx = bus.register("gone");
        assert!(bus.cancel("gone"));
        assert!(rx.await.is_err());
    }
}
