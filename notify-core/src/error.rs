//! Client-less error types: spec validation and the object-store error
//! surface the engine treats as given (spec.md §6, §7).

use crate::metadata::ObjectKey;
use thiserror::Error;

/// Errors raised while validating a `NotificationSpec` at admission time.
///
/// The engine never mutates `spec` (spec.md §3 "Lifecycle"), so these are
/// only ever surfaced by the in-memory store's `Create`/`Update`, standing
/// in for whatever CRD validation webhook would reject these in a real
/// cluster (spec.md §1, out of scope to implement here).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("channels must not be empty")]
    EmptyChannels,
    #[error("channel {0:?} listed more than once")]
    DuplicateChannel(String),
    #[error("retryPolicy.maxAttempts must be >= 1")]
    InvalidMaxAttempts,
    #[error("retryPolicy.initialBackoffSeconds must be >= 1")]
    InvalidInitialBackoff,
    #[error("retryPolicy.backoffMultiplier must be >= 1")]
    InvalidBackoffMultiplier,
    #[error("retryPolicy.maxBackoffSeconds must be >= initialBackoffSeconds")]
    InvalidMaxBackoff,
}

/// The object-store error surface (spec.md §6 `Get`/`UpdateStatus`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(ObjectKey),
    #[error("status update for {0} conflicted with a concurrent writer")]
    Conflict(ObjectKey),
    #[error("object {0} failed validation: {1}")]
    Invalid(ObjectKey, ValidationError),
}
