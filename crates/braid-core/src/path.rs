#![forbid(unsafe_code)]

//! Composable propagation nodes.
//!
//! A [`Path<T>`] wraps a versioned [`Cache`], a [`Publisher`] observer list,
//! and an [`Activation`] state machine, and derives new paths through
//! [`map`](Path::map), [`open_map`](Path::open_map), and
//! [`switch_map`](Path::switch_map).
//!
//! # Design
//!
//! Values flow bottom-up: a committed write dispatches the new snapshot to
//! every registered observer, each of which feeds a downstream path's cache
//! through the same dedup CAS. Demand flows top-down: activating a path
//! attaches its upstream binding — the parent is activated first
//! (recursively), this path's acceptor is subscribed to the parent's
//! publisher, and only then is the parent's latest value back-propagated, so
//! no emission can slip through the subscribe-then-read window.
//!
//! Parent links are ownership: the attach closure of a derived path holds
//! the parent handle. Child links are non-owning: a parent knows its
//! children only as weak acceptors in its observer list, and an explicit
//! deactivate (not drop timing) is what severs the subscription.
//!
//! # Invariants
//!
//! 1. An emission is forwarded only if it differs from the last committed
//!    value, or no value was committed yet.
//! 2. Subscription is installed before the activation back-propagation read.
//! 3. A `switch_map` path has at most one target subscribed at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, trace};

use crate::activation::Activation;
use crate::cache::{Cache, Supplier};
use crate::exec::Executor;
use crate::publisher::{Publisher, Subscriber, SubscriberId};
use crate::versioned::{Value, Versioned};

static NEXT_PATH_ID: AtomicU64 = AtomicU64::new(1);

fn next_path_id() -> u64 {
    NEXT_PATH_ID.fetch_add(1, Ordering::Relaxed)
}

/// Observer of activation edges, called with `true` on 0→1 demand and
/// `false` on 1→0.
pub type ActiveObserver = Arc<dyn Fn(bool) + Send + Sync>;

/// Caller-visible swap observer exposed by [`Path::open_map`], invoked with
/// `(committed, previous, candidate)` on every swap attempt of the derived
/// path's cache.
pub type OpenSwapObserver<T> =
    Arc<dyn Fn(bool, &Arc<Versioned<T>>, &Arc<Versioned<T>>) + Send + Sync>;

/// Installs the live upstream subscription; returns the matching teardown.
pub(crate) type Attach = Box<dyn Fn() -> Detach + Send + Sync>;

/// Tears down one live upstream subscription.
pub(crate) type Detach = Box<dyn FnOnce() + Send>;

// ─── Upstream slot ───────────────────────────────────────────────────────────

/// The rebindable upstream binding of one path.
///
/// Holds the attach thunk plus the teardown of the currently live
/// subscription. All entry points run under the owning path's activation
/// lock, which freezes the active/inactive decision.
pub(crate) struct UpstreamSlot {
    inner: Mutex<UpstreamInner>,
}

struct UpstreamInner {
    attach: Option<Attach>,
    live: Option<Detach>,
}

impl UpstreamSlot {
    fn new() -> Self {
        Self {
            inner: Mutex::new(UpstreamInner {
                attach: None,
                live: None,
            }),
        }
    }

    /// 0→1 activation edge: attach the current binding, if any.
    fn attach_current(&self) {
        let mut inner = self.inner.lock().expect("upstream lock");
        debug_assert!(inner.live.is_none());
        let live = inner.attach.as_ref().map(|attach| attach());
        inner.live = live;
    }

    /// 1→0 activation edge: tear down the live subscription, if any.
    fn detach_current(&self) {
        let detach = self.inner.lock().expect("upstream lock").live.take();
        if let Some(detach) = detach {
            detach();
        }
    }

    /// Replace the binding; when `active`, the old subscription is torn down
    /// and the new binding attached in its place.
    fn rebind(&self, attach: Option<Attach>, active: bool) {
        let mut inner = self.inner.lock().expect("upstream lock");
        if let Some(old) = inner.live.take() {
            old();
        }
        inner.attach = attach;
        if active {
            let live = inner.attach.as_ref().map(|attach| attach());
            inner.live = live;
        }
    }
}

// ─── Path core ───────────────────────────────────────────────────────────────

pub(crate) struct PathCore<T: Value> {
    pub(crate) id: u64,
    pub(crate) cache: Cache<T>,
    pub(crate) publisher: Publisher<T>,
    pub(crate) activation: Activation,
    upstream: UpstreamSlot,
    delivery: std::sync::OnceLock<Executor>,
    on_active: Option<ActiveObserver>,
}

impl<T: Value> PathCore<T> {
    /// Feed one upstream emission (or local write) through the dedup CAS.
    /// A commit dispatches downstream via the cache's swap observer.
    pub(crate) fn accept(&self, value: T) {
        let committed = self.cache.weak_set(value);
        if !committed {
            trace!(path = self.id, "emission absorbed");
        }
    }

    pub(crate) fn activate(&self) {
        let edge = self
            .activation
            .acquire(|| self.upstream.attach_current());
        if edge {
            debug!(path = self.id, "activated");
            if let Some(observer) = &self.on_active {
                observer(true);
            }
        }
    }

    pub(crate) fn deactivate(&self) {
        let edge = self
            .activation
            .release(|| self.upstream.detach_current());
        if edge {
            debug!(path = self.id, "deactivated");
            if let Some(observer) = &self.on_active {
                observer(false);
            }
        }
    }

    pub(crate) fn rebind_upstream(&self, attach: Option<Attach>) {
        debug!(path = self.id, "upstream rebound");
        self.activation
            .frozen(|active| self.upstream.rebind(attach, active));
    }
}

/// A node in the propagation graph. Cheap to clone; clones share one core.
pub struct Path<T: Value> {
    pub(crate) core: Arc<PathCore<T>>,
}

impl<T: Value> Clone for Path<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Value> Path<T> {
    pub(crate) fn build(
        on_swap: Option<OpenSwapObserver<T>>,
        on_active: Option<ActiveObserver>,
        supplier: Option<Supplier<T>>,
    ) -> Self {
        let core = Arc::new(PathCore {
            id: next_path_id(),
            cache: Cache::new(),
            publisher: Publisher::new(),
            activation: Activation::new(),
            upstream: UpstreamSlot::new(),
            delivery: std::sync::OnceLock::new(),
            on_active,
        });
        if let Some(supplier) = supplier {
            core.cache.install_supplier(supplier);
        }
        let weak = Arc::downgrade(&core);
        core.cache.install_observer(Box::new(move |committed, previous, candidate| {
            let Some(core) = weak.upgrade() else { return };
            if let Some(observer) = &on_swap {
                observer(committed, previous, candidate);
            }
            if committed {
                trace!(
                    path = core.id,
                    version = candidate.version(),
                    "dispatching"
                );
                core.publisher.dispatch(core.delivery.get(), candidate);
            }
        }));
        Self { core }
    }

    /// A root path, optionally seeded with an initial value.
    #[must_use]
    pub fn source(initial: Option<T>) -> Self {
        let path = Self::build(None, None, None);
        if let Some(value) = initial {
            let _ = path.core.cache.weak_set(value);
        }
        path
    }

    /// A root path whose cache pulls `supplier` on every read.
    #[must_use]
    pub fn supplied(supplier: impl Fn() -> Option<T> + Send + Sync + 'static) -> Self {
        Self::build(None, None, Some(Box::new(supplier)))
    }

    // ── Local write surface ──────────────────────────────────────────

    /// Best-effort write through the dedup CAS; a commit dispatches
    /// downstream. Returns whether the value committed.
    pub fn set(&self, value: T) -> bool {
        self.core.cache.weak_set(value)
    }

    /// Strict CAS against a previously observed snapshot.
    pub fn compare_and_swap(&self, expected: &Arc<Versioned<T>>, value: T) -> bool {
        self.core.cache.compare_and_swap(expected, value)
    }

    /// Read-modify-write that retries contention until it lands.
    pub fn update_and_get(&self, f: impl Fn(Option<&T>) -> T) -> Arc<Versioned<T>> {
        self.core.cache.update_and_get(f)
    }

    /// Overwrite without dispatching. Pairs with
    /// [`force_dispatch`](Path::force_dispatch) for coordinated multi-path
    /// updates.
    pub fn silent_store(&self, value: T) {
        self.core.cache.silent_store(value);
    }

    /// Re-emit the current snapshot to all observers, bypassing dedup.
    /// No-op while the cache still holds the sentinel.
    pub fn force_dispatch(&self) {
        let snapshot = self.core.cache.snapshot();
        if !snapshot.is_default() {
            self.core
                .publisher
                .dispatch(self.core.delivery.get(), &snapshot);
        }
    }

    // ── Read surface ─────────────────────────────────────────────────

    /// The current value, if one was ever committed.
    #[must_use]
    pub fn current(&self) -> Option<T> {
        self.core.cache.get().value().cloned()
    }

    /// The current snapshot (sentinel included).
    #[must_use]
    pub fn versioned(&self) -> Arc<Versioned<T>> {
        self.core.cache.get()
    }

    // ── Composition ──────────────────────────────────────────────────

    /// Derive a path committing `transform(parent_value)` on every parent
    /// commit that survives dedup.
    #[must_use]
    pub fn map<U: Value>(&self, transform: impl Fn(&T) -> U + Send + Sync + 'static) -> Path<U> {
        self.open_map(transform, None, None)
    }

    /// [`map`](Path::map) with caller-visible swap and activation hooks.
    #[must_use]
    pub fn open_map<U: Value>(
        &self,
        transform: impl Fn(&T) -> U + Send + Sync + 'static,
        on_swap: Option<OpenSwapObserver<U>>,
        on_active: Option<ActiveObserver>,
    ) -> Path<U> {
        let derived = Path::build(on_swap, on_active, None);
        let attach = static_attach(self.clone(), Arc::downgrade(&derived.core), Arc::new(transform));
        derived.core.rebind_upstream(Some(attach));
        derived
    }

    /// Derive a path that follows the path selected from each parent
    /// emission, rebinding its data edge so only the most recent target is
    /// subscribed.
    #[must_use]
    pub fn switch_map<U: Value>(
        &self,
        selector: impl Fn(&T) -> Path<U> + Send + Sync + 'static,
    ) -> Path<U> {
        let derived = Path::build(None, None, None);
        let attach = switch_attach(self.clone(), Arc::downgrade(&derived.core), Arc::new(selector));
        derived.core.rebind_upstream(Some(attach));
        derived
    }

    // ── Activation ───────────────────────────────────────────────────

    /// Add one unit of downstream demand, cascading activation upstream on
    /// the 0→1 edge.
    pub fn activate(&self) {
        self.core.activate();
    }

    /// Drop one unit of downstream demand, cascading deactivation upstream
    /// on the 1→0 edge.
    pub fn deactivate(&self) {
        self.core.deactivate();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.activation.is_active()
    }

    // ── Publisher surface ────────────────────────────────────────────

    /// Register an observer of committed snapshots.
    pub fn subscribe(
        &self,
        observer: impl Fn(&Arc<Versioned<T>>) + Send + Sync + 'static,
    ) -> SubscriberId {
        self.core.publisher.subscribe(Arc::new(observer))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.core.publisher.unsubscribe(id)
    }

    #[must_use]
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.core.publisher.contains(id)
    }

    /// Route this path's dispatch through `executor` instead of delivering
    /// synchronously at commit time. Single-set; returns whether it took.
    pub fn deliver_via(&self, executor: Executor) -> bool {
        self.core.delivery.set(executor).is_ok()
    }

    // ── Identity ─────────────────────────────────────────────────────

    /// Stable id, unique per path core for the process lifetime.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Whether two handles share one core.
    #[must_use]
    pub fn same_identity(&self, other: &Path<T>) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<T: Value + std::fmt::Debug> std::fmt::Debug for Path<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Path")
            .field("id", &self.core.id)
            .field("cache", &self.core.cache)
            .field("state", &self.core.activation.state())
            .finish()
    }
}

// ─── Attach builders ─────────────────────────────────────────────────────────

/// Static parent binding used by `map`/`open_map` (and by `Link` rebinds):
/// activate the parent, subscribe the transforming acceptor, back-propagate
/// the parent's value.
pub(crate) fn static_attach<P: Value, T: Value>(
    parent: Path<P>,
    child: Weak<PathCore<T>>,
    transform: Arc<dyn Fn(&P) -> T + Send + Sync>,
) -> Attach {
    Box::new(move || {
        parent.core.activate();
        let acceptor_child = child.clone();
        let acceptor_transform = Arc::clone(&transform);
        let id = parent
            .core
            .publisher
            .subscribe(Arc::new(move |snapshot: &Arc<Versioned<P>>| {
                let Some(core) = acceptor_child.upgrade() else { return };
                if let Some(value) = snapshot.value() {
                    core.accept(acceptor_transform(value));
                }
            }));
        if let Some(core) = child.upgrade() {
            if let Some(value) = parent.core.cache.get().value() {
                core.accept(transform(value));
            }
        }
        let parent = parent.clone();
        let detach: Detach = Box::new(move || {
            parent.core.publisher.unsubscribe(id);
            parent.core.deactivate();
        });
        detach
    })
}

/// Dynamic binding used by `switch_map`: a control edge on the parent
/// selects the data-edge target; rebinding releases the previous target
/// (subject to its own demand count) before adopting the new one.
fn switch_attach<P: Value, U: Value>(
    parent: Path<P>,
    child: Weak<PathCore<U>>,
    selector: Arc<dyn Fn(&P) -> Path<U> + Send + Sync>,
) -> Attach {
    Box::new(move || {
        parent.core.activate();
        let target: Arc<Mutex<Option<(Path<U>, SubscriberId)>>> = Arc::new(Mutex::new(None));
        let control: Subscriber<P> = {
            let target = Arc::clone(&target);
            let child = child.clone();
            let selector = Arc::clone(&selector);
            Arc::new(move |snapshot: &Arc<Versioned<P>>| {
                let Some(value) = snapshot.value() else { return };
                let next = selector(value);
                let mut slot = target.lock().expect("switch target lock");
                if let Some((current, _)) = &*slot {
                    if current.same_identity(&next) {
                        return;
                    }
                }
                if let Some((previous, previous_id)) = slot.take() {
                    previous.core.publisher.unsubscribe(previous_id);
                    previous.core.deactivate();
                }
                next.core.activate();
                let acceptor_child = child.clone();
                let id = next
                    .core
                    .publisher
                    .subscribe(Arc::new(move |snapshot: &Arc<Versioned<U>>| {
                        let Some(core) = acceptor_child.upgrade() else { return };
                        if let Some(value) = snapshot.value() {
                            core.accept(value.clone());
                        }
                    }));
                if let Some(core) = child.upgrade() {
                    if let Some(value) = next.core.cache.get().value() {
                        core.accept(value.clone());
                    }
                }
                debug!(target = next.core.id, "switch target rebound");
                *slot = Some((next, id));
            })
        };
        let control_id = parent.core.publisher.subscribe(Arc::clone(&control));
        let snapshot = parent.core.cache.get();
        if !snapshot.is_default() {
            control(&snapshot);
        }
        let parent = parent.clone();
        let target = Arc::clone(&target);
        let detach: Detach = Box::new(move || {
            parent.core.publisher.unsubscribe(control_id);
            parent.core.deactivate();
            if let Some((previous, previous_id)) =
                target.lock().expect("switch target lock").take()
            {
                previous.core.publisher.unsubscribe(previous_id);
                previous.core.deactivate();
            }
        });
        detach
    })
}
