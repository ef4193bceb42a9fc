#![forbid(unsafe_code)]

//! Tag-addressed hierarchical derived values on top of `braid-core`.
//!
//! A [`Tree`] keeps a registry of [`Node`]s, each one a local source path
//! joined with its parent's folded branch value through the tree's
//! associative operator. Construction is lazy and exactly-once;
//! [`Tree::transaction`] overwrites several nodes atomically and refolds
//! the affected subtree with a single coordinated dispatch;
//! [`Tree::snapshot`] yields a consistent non-live [`SimpleTree`] copy.

pub mod error;
pub mod node;
pub mod snapshot;
pub mod tree;

pub use error::TreeError;
pub use node::Node;
pub use snapshot::{SimpleNode, SimpleTree};
pub use tree::Tree;
