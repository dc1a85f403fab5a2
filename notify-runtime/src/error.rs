//! The reconciler's own error seam, mirroring `kube_runtime::controller::Error`
//! in shape: a small enum distinguishing errors the reconciler itself raises
//! from ones the object store surfaces.

use notify_core::error::StoreError;
use thiserror::Error;

/// Errors that can terminate a single reconcile attempt (spec.md §7).
///
/// Per spec §7's propagation policy, only `Store` ever causes the reconciler
/// to return an error to the work queue (triggering queue-level backoff);
/// every other failure mode is represented in status + audit instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("object store rejected a write: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the audit emitter's `flush` (spec.md §4.5).
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink is unavailable: {0}")]
    SinkUnavailable(String),
    #[error("audit sink rejected the event permanently: {0}")]
    Fatal(String),
}
