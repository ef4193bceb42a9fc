#![forbid(unsafe_code)]

//! N-ary aggregation: several upstream slots, one folded value.
//!
//! A [`Join<T>`] subscribes to N same-typed sources and mirrors each into
//! one slot of an array-shaped cache. A slot update clones the array,
//! replaces exactly one slot, and CAS-commits the whole array, so a torn
//! (partially applied) array is never observable. Emission is suppressed
//! while the gate predicate holds — by default, while any slot is still
//! unset. Once the gate clears, every committed slot update folds the array
//! left-to-right with the caller's associative operator and publishes the
//! result through the join's own path, subject to the usual dedup.
//!
//! # Invariants
//!
//! 1. Exactly one slot changes per array commit.
//! 2. No emission while the gate holds; exactly one emission the instant it
//!    clears (the unblocking slot write folds and publishes once).
//! 3. A lost slot CAS is absorbed, not retried — the next upstream emission
//!    for that slot re-applies.

use std::sync::{Arc, OnceLock, Weak};

use tracing::trace;

use crate::cache::Cache;
use crate::path::{Attach, Detach, Path, PathCore};
use crate::publisher::SubscriberId;
use crate::versioned::{Value, Versioned};

/// Associative two-argument fold applied left-to-right across slots.
pub type Operator<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

/// Emission suppressor: `true` while the slot array is not ready.
pub type Gate<T> = Arc<dyn Fn(&[Option<T>]) -> bool + Send + Sync>;

struct JoinState<T: Value> {
    slots: Cache<Vec<Option<T>>>,
    operator: Operator<T>,
    gate: Gate<T>,
    target: OnceLock<Weak<PathCore<T>>>,
}

impl<T: Value> JoinState<T> {
    /// Live slot update: replace-if-different, commit, emit past the gate.
    fn apply(&self, index: usize, value: T) {
        let current = self.slots.snapshot();
        let Some(array) = current.value() else { return };
        if array[index].as_ref() == Some(&value) {
            return;
        }
        let mut next = array.clone();
        next[index] = Some(value);
        if !self.slots.compare_and_swap(&current, next) {
            trace!(slot = index, "join slot swap lost");
            return;
        }
        self.emit();
    }

    /// Fold the current array and feed it through the join path's dedup CAS.
    fn emit(&self) {
        let snapshot = self.slots.snapshot();
        let Some(array) = snapshot.value() else { return };
        if (self.gate)(array) {
            trace!("join gated, emission suppressed");
            return;
        }
        let Some(folded) = self.fold(array) else { return };
        if let Some(core) = self.target.get().and_then(Weak::upgrade) {
            core.accept(folded);
        }
    }

    fn fold(&self, array: &[Option<T>]) -> Option<T> {
        array
            .iter()
            .flatten()
            .cloned()
            .reduce(|a, b| (self.operator)(a, b))
    }

    /// Slot overwrite with no emission, retried past contention.
    fn write_silent(&self, index: usize, value: T) {
        loop {
            let current = self.slots.snapshot();
            let Some(array) = current.value() else { return };
            if array[index].as_ref() == Some(&value) {
                return;
            }
            let mut next = array.clone();
            next[index] = Some(value.clone());
            if self.slots.compare_and_swap(&current, next) {
                return;
            }
        }
    }
}

/// A path aggregating N upstream slots into one folded value.
pub struct Join<T: Value> {
    path: Path<T>,
    state: Arc<JoinState<T>>,
}

impl<T: Value> Clone for Join<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Value> Join<T> {
    /// Join `sources` with the default gate: suppress while any slot is
    /// still unset.
    #[must_use]
    pub fn new(sources: Vec<Path<T>>, operator: impl Fn(T, T) -> T + Send + Sync + 'static) -> Self {
        Self::with_gate(sources, operator, |array: &[Option<T>]| {
            array.iter().any(Option::is_none)
        })
    }

    /// Join `sources` with a caller-supplied gate predicate.
    ///
    /// # Panics
    ///
    /// Panics when `sources` is empty — a join without upstreams is a
    /// construction mistake, reported loudly.
    #[must_use]
    pub fn with_gate(
        sources: Vec<Path<T>>,
        operator: impl Fn(T, T) -> T + Send + Sync + 'static,
        gate: impl Fn(&[Option<T>]) -> bool + Send + Sync + 'static,
    ) -> Self {
        assert!(!sources.is_empty(), "join requires at least one source");
        let state = Arc::new(JoinState {
            slots: Cache::seeded(vec![None; sources.len()]),
            operator: Arc::new(operator) as Operator<T>,
            gate: Arc::new(gate) as Gate<T>,
            target: OnceLock::new(),
        });
        let path = Path::build(None, None, None);
        let _ = state.target.set(Arc::downgrade(&path.core));
        let attach = join_attach(sources, Arc::clone(&state));
        path.core.rebind_upstream(Some(attach));
        Self { path, state }
    }

    /// The join's published path: activate it, subscribe to it, derive from
    /// it like any other path.
    #[must_use]
    pub fn path(&self) -> &Path<T> {
        &self.path
    }

    #[must_use]
    pub fn into_path(self) -> Path<T> {
        self.path
    }

    /// Number of upstream slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.state
            .slots
            .snapshot()
            .value()
            .map_or(0, Vec::len)
    }

    /// Overwrite one slot without emitting. Pairs with
    /// [`force_refresh`](Join::force_refresh) for coordinated multi-slot
    /// updates.
    pub fn write_slot_silent(&self, index: usize, value: T) {
        self.state.write_silent(index, value);
    }

    /// Recompute the fold from the current slots, install it silently, and
    /// re-dispatch it to observers regardless of dedup. No-op while the
    /// gate holds.
    pub fn force_refresh(&self) {
        let snapshot = self.state.slots.snapshot();
        let Some(array) = snapshot.value() else { return };
        if (self.state.gate)(array) {
            return;
        }
        let Some(folded) = self.state.fold(array) else { return };
        self.path.silent_store(folded);
        self.path.force_dispatch();
    }
}

/// Activate every source, subscribe one slot acceptor per source, then
/// back-propagate each source's current value into its slot.
fn join_attach<T: Value>(sources: Vec<Path<T>>, state: Arc<JoinState<T>>) -> Attach {
    Box::new(move || {
        let mut live: Vec<(Path<T>, SubscriberId)> = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            source.core.activate();
            let slot_state = Arc::clone(&state);
            let id = source
                .core
                .publisher
                .subscribe(Arc::new(move |snapshot: &Arc<Versioned<T>>| {
                    if let Some(value) = snapshot.value() {
                        slot_state.apply(index, value.clone());
                    }
                }));
            live.push((source.clone(), id));
        }
        for (index, source) in sources.iter().enumerate() {
            if let Some(value) = source.core.cache.get().value() {
                state.apply(index, value.clone());
            }
        }
        let detach: Detach = Box::new(move || {
            for (source, id) in live {
                source.core.publisher.unsubscribe(id);
                source.core.deactivate();
            }
        });
        detach
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn concat(a: String, b: String) -> String {
        format!("{a}/{b}")
    }

    fn record<T: Value>(path: &Path<T>) -> Arc<Mutex<Vec<T>>> {
        let seen: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        path.subscribe(move |snapshot: &Arc<Versioned<T>>| {
            if let Some(value) = snapshot.value() {
                sink.lock().expect("record").push(value.clone());
            }
        });
        seen
    }

    #[test]
    fn gated_until_every_slot_is_set() {
        let left: Path<String> = Path::source(None);
        let right: Path<String> = Path::source(None);
        let join = Join::new(vec![left.clone(), right.clone()], concat);
        let seen = record(join.path());
        join.path().activate();

        left.set("R".to_string());
        assert!(seen.lock().expect("seen").is_empty());

        right.set("A".to_string());
        assert_eq!(*seen.lock().expect("seen"), vec!["R/A".to_string()]);
    }

    #[test]
    fn each_update_re_emits_the_whole_fold() {
        let left: Path<u32> = Path::source(Some(1));
        let right: Path<u32> = Path::source(Some(2));
        let join = Join::new(vec![left.clone(), right.clone()], |a, b| a + b);
        let seen = record(join.path());
        join.path().activate();
        assert_eq!(*seen.lock().expect("seen"), vec![3]);

        left.set(10);
        right.set(20);
        assert_eq!(*seen.lock().expect("seen"), vec![3, 12, 30]);
    }

    #[test]
    fn equal_slot_value_does_not_emit() {
        let left: Path<u32> = Path::source(Some(1));
        let right: Path<u32> = Path::source(Some(2));
        let join = Join::new(vec![left.clone(), right.clone()], |a, b| a + b);
        let seen = record(join.path());
        join.path().activate();

        left.set(1);
        assert_eq!(*seen.lock().expect("seen"), vec![3]);
    }

    #[test]
    fn activation_cascades_to_every_source() {
        let left: Path<u32> = Path::source(None);
        let right: Path<u32> = Path::source(None);
        let join = Join::new(vec![left.clone(), right.clone()], |a, b| a + b);

        assert!(!left.is_active());
        join.path().activate();
        assert!(left.is_active());
        assert!(right.is_active());

        join.path().deactivate();
        assert!(!left.is_active());
        assert!(!right.is_active());
    }

    #[test]
    fn open_gate_emits_partial_folds() {
        let left: Path<u32> = Path::source(None);
        let right: Path<u32> = Path::source(None);
        let join = Join::with_gate(
            vec![left.clone(), right.clone()],
            |a, b| a + b,
            |_| false,
        );
        let seen = record(join.path());
        join.path().activate();

        left.set(5);
        assert_eq!(*seen.lock().expect("seen"), vec![5]);
        right.set(7);
        assert_eq!(*seen.lock().expect("seen"), vec![5, 12]);
    }

    #[test]
    fn silent_slot_write_then_forced_refresh() {
        let left: Path<String> = Path::source(Some("R".to_string()));
        let right: Path<String> = Path::source(Some("A".to_string()));
        let join = Join::new(vec![left.clone(), right.clone()], concat);
        let seen = record(join.path());
        join.path().activate();
        assert_eq!(*seen.lock().expect("seen"), vec!["R/A".to_string()]);

        join.write_slot_silent(1, "B".to_string());
        assert_eq!(*seen.lock().expect("seen"), vec!["R/A".to_string()]);

        join.force_refresh();
        assert_eq!(
            *seen.lock().expect("seen"),
            vec!["R/A".to_string(), "R/B".to_string()]
        );
        assert_eq!(join.path().current(), Some("R/B".to_string()));
    }

    #[test]
    fn slot_count_matches_sources() {
        let a: Path<u32> = Path::source(None);
        let b: Path<u32> = Path::source(None);
        let c: Path<u32> = Path::source(None);
        let join = Join::new(vec![a, b, c], |x, y| x + y);
        assert_eq!(join.slot_count(), 3);
    }
}
