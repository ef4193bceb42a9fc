#![forbid(unsafe_code)]

//! Observer registration and emission delivery.
//!
//! A [`Publisher<T>`] keeps the downstream observers of one path in
//! registration order. Delivery is synchronous and sequential by default —
//! the first-registered observer is delivered to first — or asynchronous
//! through an executor, one submitted task per observer, in which case no
//! ordering beyond each observer's own FIFO is guaranteed.
//!
//! The subscriber list is snapshotted under the lock and invoked outside it,
//! so an observer may subscribe or unsubscribe (itself included) while an
//! emission is in flight without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::exec::Executor;
use crate::versioned::{Value, Versioned};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable handle for one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// An observer callback receiving each emitted snapshot.
pub type Subscriber<T> = Arc<dyn Fn(&Arc<Versioned<T>>) + Send + Sync>;

/// Registration-ordered observer list with sync or executor-backed delivery.
pub struct Publisher<T: Value> {
    subscribers: Mutex<Vec<(SubscriberId, Subscriber<T>)>>,
}

impl<T: Value> Publisher<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register `subscriber` at the end of the delivery order.
    pub fn subscribe(&self, subscriber: Subscriber<T>) -> SubscriberId {
        let id = SubscriberId::next();
        self.subscribers
            .lock()
            .expect("publisher lock")
            .push((id, subscriber));
        id
    }

    /// Remove a registration. Returns whether it was present.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.lock().expect("publisher lock");
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Whether `id` is currently registered.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers
            .lock()
            .expect("publisher lock")
            .iter()
            .any(|(sid, _)| *sid == id)
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.lock().expect("publisher lock").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `snapshot` to every observer.
    ///
    /// With `executor == None`, delivery happens on the calling thread in
    /// registration order. With an executor, each observer gets its own
    /// submitted task; a saturated executor drops that observer's delivery
    /// (logged, not retried).
    pub fn dispatch(&self, executor: Option<&Executor>, snapshot: &Arc<Versioned<T>>) {
        let subscribers: Vec<Subscriber<T>> = self
            .subscribers
            .lock()
            .expect("publisher lock")
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        match executor {
            None => {
                for subscriber in subscribers {
                    subscriber(snapshot);
                }
            }
            Some(executor) => {
                for subscriber in subscribers {
                    let snapshot = Arc::clone(snapshot);
                    let accepted = executor.execute(move || subscriber(&snapshot));
                    if !accepted {
                        warn!(executor = executor.name(), "emission dropped at saturated executor");
                    }
                }
            }
        }
    }
}

impl<T: Value> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(v: u32) -> Arc<Versioned<u32>> {
        Arc::new(Versioned::initial().next(v))
    }

    #[test]
    fn delivers_in_registration_order() {
        let publisher: Publisher<u32> = Publisher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            publisher.subscribe(Arc::new(move |_| {
                seen.lock().expect("seen").push(tag);
            }));
        }
        publisher.dispatch(None, &snap(1));
        assert_eq!(*seen.lock().expect("seen"), vec!["a", "b", "c"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let publisher: Publisher<u32> = Publisher::new();
        let count = Arc::new(Mutex::new(0u32));
        let c = Arc::clone(&count);
        let id = publisher.subscribe(Arc::new(move |_| {
            *c.lock().expect("count") += 1;
        }));
        publisher.dispatch(None, &snap(1));
        assert!(publisher.contains(id));
        assert!(publisher.unsubscribe(id));
        assert!(!publisher.contains(id));
        assert!(!publisher.unsubscribe(id));
        publisher.dispatch(None, &snap(2));
        assert_eq!(*count.lock().expect("count"), 1);
    }

    #[test]
    fn observer_may_unsubscribe_itself_mid_emission() {
        let publisher: Arc<Publisher<u32>> = Arc::new(Publisher::new());
        let slot: Arc<Mutex<Option<SubscriberId>>> = Arc::new(Mutex::new(None));
        let p = Arc::clone(&publisher);
        let s = Arc::clone(&slot);
        let id = publisher.subscribe(Arc::new(move |_| {
            if let Some(id) = slot.lock().expect("slot").take() {
                p.unsubscribe(id);
            }
        }));
        *s.lock().expect("slot") = Some(id);
        publisher.dispatch(None, &snap(1));
        assert!(publisher.is_empty());
    }
}
