#![forbid(unsafe_code)]

//! Error types for the propagation core.
//!
//! Expected local conditions — a CAS miss, dedup suppression, an unsatisfied
//! join gate — are booleans or silently absorbed, never errors. The enums
//! here cover programmer misuse, which surfaces immediately instead of
//! degrading silently.

use thiserror::Error;

/// Misuse of a [`Getter`](crate::getter::Getter).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GetterError {
    /// The getter was read (or asked for guaranteed delivery) while not
    /// activated.
    #[error("getter is not activated")]
    NotActivated,

    /// The getter is active but no value has been committed yet.
    #[error("no value committed yet")]
    Empty,
}

/// Misuse of the process-wide pool configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolsError {
    /// [`install`](crate::exec::install) was called after the pools were
    /// already built, by an earlier install or by first use.
    #[error("process-wide pools already installed")]
    AlreadyInstalled,
}
