//! Auth event bus decoupling the network layer from session state.
//!
//! When a call fails for authentication or authorization reasons the API
//! client publishes an event here instead of reaching into session state
//! directly. The bus holds at most one live subscriber; a new `subscribe`
//! silently replaces the previous handler. The bus is an explicit,
//! constructed instance injected into both sides - there is no module-level
//! singleton to leak across tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// Why an authenticated call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    /// The credential was missing or rejected outright.
    Unauthorized,
    /// The principal is authenticated but lacks permission.
    Forbidden,
    /// The credential was rejected because it has expired.
    TokenExpired,
}

/// A notification that a network call failed for auth reasons. Delivered
/// at most once per failing call, to at most one subscriber.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    /// Raw server detail, suitable for banner text.
    pub message: Option<String>,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind, message: Option<String>) -> Self {
        Self { kind, message }
    }
}

type Handler = Arc<dyn Fn(AuthEvent) + Send + Sync>;

struct BusInner {
    slot: Mutex<Option<(u64, Handler)>>,
    next_id: AtomicU64,
}

/// Single-slot publish/subscribe channel for [`AuthEvent`]s.
/// Clone is cheap - clones share the same slot.
#[derive(Clone)]
pub struct AuthBus {
    inner: Arc<BusInner>,
}

impl AuthBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                slot: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Install `handler` as the active subscriber, replacing any previous
    /// one. The returned [`Subscription`] removes the handler on drop or
    /// explicit unsubscribe.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(AuthEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.lock_slot();
        if slot.is_some() {
            debug!("Replacing existing auth event subscriber");
        }
        *slot = Some((id, Arc::new(handler)));
        Subscription {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Deliver an event to the current subscriber, if any. Publishing with
    /// no subscriber is a no-op.
    pub fn publish(&self, event: AuthEvent) {
        // Clone the handler out so it can re-subscribe without deadlocking
        let handler = self.lock_slot().as_ref().map(|(_, h)| Arc::clone(h));
        match handler {
            Some(handler) => handler(event),
            None => debug!(kind = ?event.kind, "Auth event published with no subscriber"),
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<(u64, Handler)>> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AuthBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for an installed subscriber. Dropping it removes the handler,
/// unless a newer subscriber has already taken the slot.
pub struct Subscription {
    inner: Arc<BusInner>,
    id: u64,
}

impl Subscription {
    /// Remove the handler. Safe to call after replacement: a stale
    /// subscription never clears a newer handler.
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut slot = self
            .inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(slot.as_ref(), Some((id, _)) if *id == self.id) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> impl Fn(AuthEvent) + Send + Sync {
        let counter = Arc::clone(counter);
        move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let bus = AuthBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _sub = bus.subscribe(counting_handler(&count));

        bus.publish(AuthEvent::new(AuthEventKind::Unauthorized, None));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_without_subscriber_is_noop() {
        let bus = AuthBus::new();
        bus.publish(AuthEvent::new(AuthEventKind::Forbidden, None));
    }

    #[test]
    fn test_new_subscriber_replaces_previous() {
        let bus = AuthBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let _sub_a = bus.subscribe(counting_handler(&first));
        let _sub_b = bus.subscribe(counting_handler(&second));

        bus.publish(AuthEvent::new(AuthEventKind::Unauthorized, None));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_unsubscribe_keeps_newer_handler() {
        let bus = AuthBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let sub_a = bus.subscribe(counting_handler(&first));
        let _sub_b = bus.subscribe(counting_handler(&second));

        // Unsubscribing the replaced handler must not clear the live one
        sub_a.unsubscribe();
        bus.publish(AuthEvent::new(AuthEventKind::TokenExpired, None));
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_removes_handler() {
        let bus = AuthBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let sub = bus.subscribe(counting_handler(&count));
        sub.unsubscribe();

        bus.publish(AuthEvent::new(AuthEventKind::Unauthorized, None));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_event_carries_message() {
        let bus = AuthBus::new();
        let seen: Arc<Mutex<Option<AuthEvent>>> = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        let _sub = bus.subscribe(move |event| {
            *seen_clone.lock().unwrap() = Some(event);
        });

        bus.publish(AuthEvent::new(
            AuthEventKind::Forbidden,
            Some("Insufficient privileges".to_string()),
        ));

        let seen = seen.lock().unwrap().clone().expect("event delivered");
        assert_eq!(seen.kind, AuthEventKind::Forbidden);
        assert_eq!(seen.message.as_deref(), Some("Insufficient privileges"));
    }
}
