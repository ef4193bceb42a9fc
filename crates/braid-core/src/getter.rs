#![forbid(unsafe_code)]

//! Activated terminal read endpoint with deferred first-value delivery.
//!
//! A [`Getter<T>`] mirrors one source path through an identity
//! [`open_map`](crate::path::Path::open_map) and layers a deferred-consumer
//! queue on top: consumers registered before any value exists are invoked
//! exactly once, on the exit pool, when a value commits. Reading a getter
//! that is not activated is a programming error, reported as
//! [`GetterError::NotActivated`] — never silently substituted.
//!
//! # Invariants
//!
//! 1. A deferred consumer fires at most once; the queue is drained on
//!    delivery.
//! 2. Deactivation clears the pending queue without invoking it — consumers
//!    registered before a first value and abandoned by deactivation are
//!    lost by design.
//! 3. Immediate-delivery checks and enqueueing happen under the queue lock,
//!    so a concurrently committing value cannot strand a consumer between
//!    "no value yet" and "flush already ran".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::error::GetterError;
use crate::exec;
use crate::path::{OpenSwapObserver, Path};
use crate::versioned::Value;

/// How a consumer registration was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Invoked on the calling thread before returning.
    Immediate,
    /// Queued for exactly-once delivery on a later commit.
    Deferred,
}

type Consumer<T> = Box<dyn FnOnce(&T) + Send + 'static>;

/// Read-only activated mirror of one source path.
pub struct Getter<T: Value> {
    mirror: Path<T>,
    deferred: Arc<Mutex<Vec<Consumer<T>>>>,
    active: AtomicBool,
}

impl<T: Value> Getter<T> {
    /// Bind a getter to `source`. Constructed inactive; nothing upstream
    /// runs until [`activate`](Getter::activate).
    #[must_use]
    pub fn of(source: &Path<T>) -> Self {
        let deferred: Arc<Mutex<Vec<Consumer<T>>>> = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::clone(&deferred);
        let on_swap: OpenSwapObserver<T> = Arc::new(move |committed, _previous, candidate| {
            if !committed {
                return;
            }
            let pending: Vec<Consumer<T>> =
                std::mem::take(&mut *queue.lock().expect("getter queue lock"));
            if pending.is_empty() {
                return;
            }
            let Some(value) = candidate.value() else { return };
            trace!(consumers = pending.len(), "flushing deferred consumers");
            for consumer in pending {
                let value = value.clone();
                exec::pools().exit().execute(move || consumer(&value));
            }
        });
        let mirror = source.open_map(|value: &T| value.clone(), Some(on_swap), None);
        Self {
            mirror,
            deferred,
            active: AtomicBool::new(false),
        }
    }

    /// Subscribe to the source and back-propagate its latest value.
    /// Idempotent; returns whether this call performed the transition.
    pub fn activate(&self) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.mirror.activate();
            true
        } else {
            false
        }
    }

    /// Unsubscribe and drop any pending deferred consumers without invoking
    /// them. Idempotent; returns whether this call performed the transition.
    pub fn deactivate(&self) -> bool {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.mirror.deactivate();
            self.deferred.lock().expect("getter queue lock").clear();
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The current value. Valid only while active.
    pub fn get(&self) -> Result<T, GetterError> {
        if !self.is_active() {
            return Err(GetterError::NotActivated);
        }
        self.mirror.current().ok_or(GetterError::Empty)
    }

    /// Whatever is cached right now, activation state notwithstanding.
    #[must_use]
    pub fn passive_get(&self) -> Option<T> {
        self.mirror.current()
    }

    /// Deliver the current value to `consumer` immediately if one exists,
    /// otherwise queue it for the next commit. Requires activation.
    pub fn first(
        &self,
        consumer: impl FnOnce(&T) + Send + 'static,
    ) -> Result<Delivery, GetterError> {
        if !self.is_active() {
            return Err(GetterError::NotActivated);
        }
        Ok(self.enqueue_or_deliver(Box::new(consumer), false))
    }

    /// [`first`](Getter::first) without the activation requirement.
    pub fn passive_first(&self, consumer: impl FnOnce(&T) + Send + 'static) -> Delivery {
        self.enqueue_or_deliver(Box::new(consumer), false)
    }

    /// Immediate delivery only when active **and** a value exists; deferred
    /// otherwise.
    pub fn passive_next(&self, consumer: impl FnOnce(&T) + Send + 'static) -> Delivery {
        self.enqueue_or_deliver(Box::new(consumer), true)
    }

    fn enqueue_or_deliver(&self, consumer: Consumer<T>, require_active: bool) -> Delivery {
        let mut queue = self.deferred.lock().expect("getter queue lock");
        if !require_active || self.is_active() {
            // Value check under the queue lock: the flush also drains under
            // it, so a commit either lands before this read or finds the
            // consumer queued.
            if let Some(value) = self.mirror.current() {
                drop(queue);
                consumer(&value);
                return Delivery::Immediate;
            }
        }
        queue.push(consumer);
        Delivery::Deferred
    }
}

impl<T: Value + std::fmt::Debug> std::fmt::Debug for Getter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Getter")
            .field("active", &self.is_active())
            .field("cached", &self.passive_get())
            .finish()
    }
}
