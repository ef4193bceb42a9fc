#![forbid(unsafe_code)]

//! Tree error types.
//!
//! Every variant is programmer misuse surfaced loudly; expected propagation
//! conditions (dedup, gating, CAS misses) never reach this enum. The build
//! result is sticky, so the error type is `Clone` to let every later access
//! report the same failure.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// A tag was registered twice during construction. Fatal: the
    /// tag-to-node addressing invariant would otherwise be silently
    /// violated, so the build aborts and stays failed.
    #[error("duplicate node tag: {tag}")]
    DuplicateTag { tag: String },

    /// Lookup or transaction entry named a tag no node carries.
    #[error("unknown node tag: {tag}")]
    UnknownTag { tag: String },

    /// A transaction with no entries has nothing to dispatch.
    #[error("transaction requires at least one entry")]
    EmptyTransaction,

    /// A node handle outlived the tree it belongs to.
    #[error("node handle outlived its tree")]
    Detached,
}
