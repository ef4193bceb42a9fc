#![forbid(unsafe_code)]

//! Per-path activation state machine.
//!
//! Activation is demand-counted: every active downstream consumer (a derived
//! path, a getter, a join slot) holds one unit of demand on its upstream.
//! The 0→1 edge attaches the upstream binding — subscribing to the parent
//! and back-propagating its latest value — and the 1→0 edge detaches it,
//! releasing the parent's demand in turn. Both edges run under this node's
//! lock, so concurrent activate/deactivate calls on one node can never
//! interleave into an inconsistent subscribe/unsubscribe pair; cascades take
//! ancestor locks one level at a time, child before parent, which is
//! deadlock-free on an acyclic graph.
//!
//! # States
//!
//! - `Init` — before the very first activation; left exactly once, never
//!   re-entered.
//! - `Active` — demand > 0; the upstream binding is attached.
//! - `Inactive` — demand returned to 0; the upstream binding is detached.

use std::sync::Mutex;

use tracing::warn;

/// Lifecycle state of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// Constructed, never activated.
    Init,
    /// Demand dropped back to zero.
    Inactive,
    /// At least one downstream consumer holds demand.
    Active,
}

#[derive(Debug)]
struct ActivationInner {
    state: ActivationState,
    demand: usize,
}

/// Demand counter and state, serialized behind one mutex.
#[derive(Debug)]
pub struct Activation {
    inner: Mutex<ActivationInner>,
}

impl Activation {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ActivationInner {
                state: ActivationState::Init,
                demand: 0,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ActivationState {
        self.inner.lock().expect("activation lock").state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == ActivationState::Active
    }

    /// Current demand count.
    #[must_use]
    pub fn demand(&self) -> usize {
        self.inner.lock().expect("activation lock").demand
    }

    /// Add one unit of demand.
    ///
    /// Runs `attach` under the lock iff this is the 0→1 edge; returns whether
    /// the edge fired. `attach` must not re-enter this node's activation.
    pub fn acquire(&self, attach: impl FnOnce()) -> bool {
        let mut inner = self.inner.lock().expect("activation lock");
        inner.demand += 1;
        if inner.demand == 1 {
            inner.state = ActivationState::Active;
            attach();
            true
        } else {
            false
        }
    }

    /// Drop one unit of demand.
    ///
    /// Runs `detach` under the lock iff this is the 1→0 edge; returns whether
    /// the edge fired. An unbalanced release is logged and ignored.
    pub fn release(&self, detach: impl FnOnce()) -> bool {
        let mut inner = self.inner.lock().expect("activation lock");
        if inner.demand == 0 {
            warn!("unbalanced deactivate ignored");
            return false;
        }
        inner.demand -= 1;
        if inner.demand == 0 {
            inner.state = ActivationState::Inactive;
            detach();
            true
        } else {
            false
        }
    }

    /// Run `f` with the activation state frozen (lock held).
    ///
    /// Used to rebind an upstream without racing a concurrent activation
    /// edge. `f` must not re-enter this node's activation.
    pub fn frozen<R>(&self, f: impl FnOnce(bool) -> R) -> R {
        let inner = self.inner.lock().expect("activation lock");
        let active = inner.state == ActivationState::Active;
        let result = f(active);
        drop(inner);
        result
    }
}

impl Default for Activation {
    fn default() -> Self {
        Self::new()
    }
}
