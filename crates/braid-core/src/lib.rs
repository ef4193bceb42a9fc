#![forbid(unsafe_code)]

//! Core propagation engine: versioned CAS caches, activation-gated paths,
//! joins, and terminal consumers.
//!
//! Values flow bottom-up — a committed write at a source [`Path`] fans out
//! through map/switch/join layers to every active descendant, deduplicated
//! at each hop. Demand flows top-down — activating a consumer cascades a
//! reference-counted subscribe up the ancestor chain, then the most recent
//! value is pulled straight back down, so upstream work only happens while
//! something downstream is listening.
//!
//! - [`Versioned`] — immutable value + version snapshot with a "no value
//!   yet" sentinel.
//! - [`Cache`] — atomic snapshot holder; compare-and-swap with equality
//!   dedup and a swap observer.
//! - [`Path`] — cache + observer list + activation state; `map`,
//!   `open_map`, `switch_map`.
//! - [`Join`] — N upstream slots folded into one value, gated until ready.
//! - [`Getter`] — activated read endpoint with deferred first-value
//!   delivery.
//! - [`Link`] — rebindable endpoint allowing local divergence and reset.
//! - [`exec`] — the process-wide work/exit pools behind dispatch and
//!   deferred-consumer flushing.

pub mod activation;
pub mod cache;
pub mod error;
pub mod exec;
pub mod getter;
pub mod join;
pub mod link;
pub mod path;
pub mod publisher;
pub mod versioned;

pub use activation::{Activation, ActivationState};
pub use cache::Cache;
pub use error::{GetterError, PoolsError};
pub use exec::{Executor, PoolConfig, Pools, Saturation};
pub use getter::{Delivery, Getter};
pub use join::{Gate, Join, Operator};
pub use link::Link;
pub use path::{ActiveObserver, OpenSwapObserver, Path};
pub use publisher::{Publisher, Subscriber, SubscriberId};
pub use versioned::{Value, Versioned};
