#![forbid(unsafe_code)]

//! Rebindable, divergible path endpoint.
//!
//! A [`Link<T>`] is a path whose upstream binding can be installed, replaced,
//! and removed at runtime, and whose cache may be written locally between
//! upstream emissions — it *diverges* from its upstream until the next
//! emission or an explicit [`reset`](Link::reset) re-adopts the upstream's
//! current value.
//!
//! Binding is demand-aware: installing or replacing a binding while the link
//! is active tears down the previous upstream subscription (releasing that
//! upstream's demand) and attaches the new one, back-propagating its current
//! value. While the link is inactive a binding is merely remembered; it
//! attaches on the next activation.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::path::{Path, static_attach};
use crate::publisher::SubscriberId;
use crate::versioned::{Value, Versioned};

/// A path endpoint with a runtime-mutable upstream and a locally writable
/// cache.
pub struct Link<T: Value> {
    path: Path<T>,
    bound: Mutex<Option<Path<T>>>,
}

impl<T: Value> Link<T> {
    /// An unbound link with no value.
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: Path::source(None),
            bound: Mutex::new(None),
        }
    }

    /// An unbound link seeded with `value`.
    #[must_use]
    pub fn with_initial(value: T) -> Self {
        Self {
            path: Path::source(Some(value)),
            bound: Mutex::new(None),
        }
    }

    /// Install (or replace) the upstream binding.
    ///
    /// Rebinding to the path already bound is a no-op returning that same
    /// path unchanged. Returns the path that ends up bound.
    pub fn bind(&self, upstream: Path<T>) -> Path<T> {
        let mut bound = self.bound.lock().expect("link binding lock");
        if let Some(current) = &*bound {
            if current.same_identity(&upstream) {
                return current.clone();
            }
        }
        debug!(link = self.path.id(), upstream = upstream.id(), "link bound");
        let attach = static_attach(
            upstream.clone(),
            Arc::downgrade(&self.path.core),
            Arc::new(|value: &T| value.clone()),
        );
        self.path.core.rebind_upstream(Some(attach));
        *bound = Some(upstream.clone());
        upstream
    }

    /// Bind through a transform: installs `upstream.map(transform)` and
    /// returns that mapped path as the bound upstream.
    pub fn bind_with<U: Value>(
        &self,
        upstream: &Path<U>,
        transform: impl Fn(&U) -> T + Send + Sync + 'static,
    ) -> Path<T> {
        self.bind(upstream.map(transform))
    }

    /// Remove the current binding, returning the previously bound path.
    pub fn unbind(&self) -> Option<Path<T>> {
        let mut bound = self.bound.lock().expect("link binding lock");
        let previous = bound.take();
        if let Some(previous) = &previous {
            debug!(link = self.path.id(), upstream = previous.id(), "link unbound");
            self.path.core.rebind_upstream(None);
        }
        previous
    }

    /// Whether an upstream is currently bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound.lock().expect("link binding lock").is_some()
    }

    /// Re-adopt the upstream's current value, discarding local divergence.
    ///
    /// No-op returning `false` when no upstream is bound, the upstream holds
    /// no value, or the local value already equals it.
    pub fn reset(&self) -> bool {
        let bound = self.bound.lock().expect("link binding lock");
        let Some(upstream) = &*bound else {
            return false;
        };
        let Some(value) = upstream.current() else {
            return false;
        };
        if self.path.current().as_ref() == Some(&value) {
            return false;
        }
        self.path.set(value)
    }

    // ── Local write surface (divergence) ─────────────────────────────

    /// Local best-effort write through the dedup CAS.
    pub fn set(&self, value: T) -> bool {
        self.path.set(value)
    }

    /// Local strict CAS against a previously observed snapshot.
    pub fn compare_and_swap(&self, expected: &Arc<Versioned<T>>, value: T) -> bool {
        self.path.compare_and_swap(expected, value)
    }

    /// Local read-modify-write, retried past contention.
    pub fn update_and_get(&self, f: impl Fn(Option<&T>) -> T) -> Arc<Versioned<T>> {
        self.path.update_and_get(f)
    }

    // ── Read / lifecycle surface ─────────────────────────────────────

    #[must_use]
    pub fn current(&self) -> Option<T> {
        self.path.current()
    }

    #[must_use]
    pub fn versioned(&self) -> Arc<Versioned<T>> {
        self.path.versioned()
    }

    pub fn activate(&self) {
        self.path.activate();
    }

    pub fn deactivate(&self) {
        self.path.deactivate();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.path.is_active()
    }

    /// Register an observer of the link's committed values.
    pub fn subscribe(
        &self,
        observer: impl Fn(&Arc<Versioned<T>>) + Send + Sync + 'static,
    ) -> SubscriberId {
        self.path.subscribe(observer)
    }

    /// The link's own path, for composing further downstream.
    #[must_use]
    pub fn path(&self) -> &Path<T> {
        &self.path
    }
}

impl<T: Value> Default for Link<T> {
    fn default() -> Self {
        Self::new()
    }
}
