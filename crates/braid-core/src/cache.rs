#![forbid(unsafe_code)]

//! Atomic snapshot cache with compare-and-swap dispatch.
//!
//! A [`Cache<T>`] owns exactly one [`Versioned<T>`] snapshot behind an
//! [`ArcSwap`]. Every mutation is a compare-and-swap of the whole snapshot:
//! readers always see a complete, consistent value, and a commit happens at
//! most once per distinct proposed value.
//!
//! # Invariants
//!
//! 1. A swap commits only if the proposed value differs (by `PartialEq`) from
//!    the held value, or the held snapshot is the default sentinel — the
//!    first write always commits.
//! 2. Versions along one cache's committed history are strictly increasing.
//! 3. The swap observer fires on every attempt, committed or rejected, with
//!    `(committed, previous, candidate)`; `previous.is_default()` lets the
//!    observer distinguish "first value ever" from an ordinary update.
//! 4. A CAS miss is a boolean result, never an error, and is not retried
//!    internally (except by [`update_and_get`](Cache::update_and_get), whose
//!    contract is a read-modify-write that succeeds).
//!
//! # Failure Modes
//!
//! - **Contention**: two threads race `compare_and_swap` against the same
//!   snapshot; exactly one commits, the loser gets `false`.
//! - **Observer panics**: the commit has already been published; the panic
//!   propagates to the writer.

use std::sync::Arc;
use std::sync::OnceLock;

use arc_swap::ArcSwap;
use tracing::trace;

use crate::versioned::{Value, Versioned};

/// Callback invoked after every swap attempt with
/// `(committed, previous, candidate)`.
pub type SwapObserver<T> =
    Box<dyn Fn(bool, &Arc<Versioned<T>>, &Arc<Versioned<T>>) + Send + Sync>;

/// Producer pulled by [`Cache::get`] to refresh the cache before reading.
pub type Supplier<T> = Box<dyn Fn() -> Option<T> + Send + Sync>;

/// Atomic holder of one versioned snapshot.
pub struct Cache<T: Value> {
    current: ArcSwap<Versioned<T>>,
    observer: OnceLock<SwapObserver<T>>,
    supplier: OnceLock<Supplier<T>>,
}

impl<T: Value> Cache<T> {
    /// A cache starting from the default sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::new(Arc::new(Versioned::initial())),
            observer: OnceLock::new(),
            supplier: OnceLock::new(),
        }
    }

    /// A cache starting from a committed `value` at version 0.
    #[must_use]
    pub fn seeded(value: T) -> Self {
        Self {
            current: ArcSwap::new(Arc::new(Versioned::seeded(value))),
            observer: OnceLock::new(),
            supplier: OnceLock::new(),
        }
    }

    /// Install the swap observer. Single-set: returns `false` if one is
    /// already installed.
    pub fn install_observer(&self, observer: SwapObserver<T>) -> bool {
        self.observer.set(observer).is_ok()
    }

    /// Install the supplier pulled by [`get`](Cache::get). Single-set.
    pub fn install_supplier(&self, supplier: Supplier<T>) -> bool {
        self.supplier.set(supplier).is_ok()
    }

    /// The current snapshot, without consulting the supplier.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Versioned<T>> {
        self.current.load_full()
    }

    /// The current snapshot, pulling a fresh value from the supplier first
    /// when one is wired.
    #[must_use]
    pub fn get(&self) -> Arc<Versioned<T>> {
        if let Some(supplier) = self.supplier.get() {
            if let Some(fresh) = supplier() {
                let _ = self.weak_set(fresh);
            }
        }
        self.current.load_full()
    }

    /// Commit `value` if the cache still holds `expected`.
    ///
    /// Returns whether the swap committed. A duplicate value (equal to
    /// `expected`'s, which is not the sentinel) is rejected without touching
    /// the cache. The swap observer fires either way.
    pub fn compare_and_swap(&self, expected: &Arc<Versioned<T>>, value: T) -> bool {
        let duplicate = !expected.is_default() && expected.holds(&value);
        let candidate = Arc::new(expected.next(value));
        if duplicate {
            self.notify(false, expected, &candidate);
            return false;
        }
        let prior = self.current.compare_and_swap(expected, Arc::clone(&candidate));
        let committed = prior.version() == expected.version();
        if committed {
            trace!(version = candidate.version(), "cache commit");
            self.notify(true, expected, &candidate);
        } else {
            let actual = self.current.load_full();
            trace!(
                expected = expected.version(),
                actual = actual.version(),
                "cache swap lost"
            );
            self.notify(false, &actual, &candidate);
        }
        committed
    }

    /// Best-effort swap attempt against whatever is currently held.
    ///
    /// Same dedup rule as [`compare_and_swap`](Cache::compare_and_swap); a
    /// single attempt, no retry on contention.
    pub fn weak_set(&self, value: T) -> bool {
        let current = self.current.load_full();
        self.compare_and_swap(&current, value)
    }

    /// Read-modify-write: apply `f` to the current value and commit the
    /// result, retrying on contention until it lands or turns out to be a
    /// duplicate. Returns the snapshot that ends up current.
    pub fn update_and_get(&self, f: impl Fn(Option<&T>) -> T) -> Arc<Versioned<T>> {
        loop {
            let current = self.current.load_full();
            let proposed = f(current.value());
            if !current.is_default() && current.holds(&proposed) {
                return current;
            }
            let candidate = Arc::new(current.next(proposed));
            let prior = self.current.compare_and_swap(&current, Arc::clone(&candidate));
            if prior.version() == current.version() {
                trace!(version = candidate.version(), "cache update commit");
                self.notify(true, &current, &candidate);
                return candidate;
            }
        }
    }

    /// Overwrite the held value without notifying the swap observer.
    ///
    /// Used by coordinated multi-cache updates that install several values
    /// first and trigger exactly one dispatch afterwards. Equal values are
    /// left untouched (no version bump).
    pub fn silent_store(&self, value: T) {
        loop {
            let current = self.current.load_full();
            if !current.is_default() && current.holds(&value) {
                return;
            }
            let candidate = Arc::new(current.next(value.clone()));
            let prior = self.current.compare_and_swap(&current, candidate);
            if prior.version() == current.version() {
                return;
            }
        }
    }

    fn notify(&self, committed: bool, previous: &Arc<Versioned<T>>, candidate: &Arc<Versioned<T>>) {
        if let Some(observer) = self.observer.get() {
            observer(committed, previous, candidate);
        }
    }
}

impl<T: Value> Default for Cache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Value + std::fmt::Debug> std::fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Cache")
            .field("value", &snapshot.value())
            .field("version", &snapshot.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn first_write_always_commits() {
        let cache: Cache<u32> = Cache::new();
        assert!(cache.weak_set(0));
        let snap = cache.snapshot();
        assert_eq!(snap.value(), Some(&0));
        assert_eq!(snap.version(), 1);
    }

    #[test]
    fn duplicate_value_is_rejected() {
        let cache: Cache<u32> = Cache::new();
        assert!(cache.weak_set(7));
        assert!(!cache.weak_set(7));
        assert_eq!(cache.snapshot().version(), 1);
        assert!(cache.weak_set(8));
        assert_eq!(cache.snapshot().version(), 2);
    }

    #[test]
    fn stale_expected_snapshot_loses() {
        let cache: Cache<u32> = Cache::new();
        let stale = cache.snapshot();
        assert!(cache.compare_and_swap(&stale, 1));
        assert!(!cache.compare_and_swap(&stale, 2));
        assert_eq!(cache.snapshot().value(), Some(&1));
    }

    #[test]
    fn observer_sees_first_commit_distinctly() {
        let cache: Cache<u32> = Cache::new();
        let first_commits = Arc::new(AtomicU32::new(0));
        let later_commits = Arc::new(AtomicU32::new(0));
        let rejections = Arc::new(AtomicU32::new(0));
        let (f, l, r) = (
            Arc::clone(&first_commits),
            Arc::clone(&later_commits),
            Arc::clone(&rejections),
        );
        assert!(cache.install_observer(Box::new(move |committed, previous, _| {
            match (committed, previous.is_default()) {
                (true, true) => f.fetch_add(1, Ordering::Relaxed),
                (true, false) => l.fetch_add(1, Ordering::Relaxed),
                (false, _) => r.fetch_add(1, Ordering::Relaxed),
            };
        })));

        cache.weak_set(1);
        cache.weak_set(1);
        cache.weak_set(2);
        assert_eq!(first_commits.load(Ordering::Relaxed), 1);
        assert_eq!(later_commits.load(Ordering::Relaxed), 1);
        assert_eq!(rejections.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn observer_is_single_set() {
        let cache: Cache<u32> = Cache::new();
        assert!(cache.install_observer(Box::new(|_, _, _| {})));
        assert!(!cache.install_observer(Box::new(|_, _, _| {})));
    }

    #[test]
    fn update_and_get_applies_over_current() {
        let cache: Cache<u32> = Cache::new();
        let snap = cache.update_and_get(|v| v.copied().unwrap_or(0) + 1);
        assert_eq!(snap.value(), Some(&1));
        let snap = cache.update_and_get(|v| v.copied().unwrap_or(0) + 1);
        assert_eq!(snap.value(), Some(&2));
        assert_eq!(snap.version(), 2);
    }

    #[test]
    fn update_and_get_duplicate_is_noop() {
        let cache: Cache<u32> = Cache::seeded(4);
        let snap = cache.update_and_get(|v| v.copied().unwrap_or(0));
        assert_eq!(snap.version(), 0);
    }

    #[test]
    fn silent_store_skips_observer() {
        let cache: Cache<u32> = Cache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        cache.install_observer(Box::new(move |_, _, _| {
            c.fetch_add(1, Ordering::Relaxed);
        }));
        cache.silent_store(9);
        assert_eq!(cache.snapshot().value(), Some(&9));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn supplier_refreshes_on_get() {
        let cache: Cache<u32> = Cache::new();
        let source = Arc::new(Mutex::new(10u32));
        let s = Arc::clone(&source);
        cache.install_supplier(Box::new(move || Some(*s.lock().expect("supplier source"))));

        assert_eq!(cache.get().value(), Some(&10));
        *source.lock().expect("supplier source") = 11;
        assert_eq!(cache.get().value(), Some(&11));
        // snapshot() alone does not pull.
        *source.lock().expect("supplier source") = 12;
        assert_eq!(cache.snapshot().value(), Some(&11));
    }

    #[test]
    fn seeded_cache_dedups_against_seed() {
        let cache: Cache<Vec<Option<u32>>> = Cache::seeded(vec![None, None]);
        assert!(!cache.weak_set(vec![None, None]));
        assert!(cache.weak_set(vec![Some(1), None]));
        assert_eq!(cache.snapshot().version(), 1);
    }
}
