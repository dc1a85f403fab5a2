//! Injectable wall-clock seam.
//!
//! `Attempt::timestamp` and the eligibility/backoff comparisons in
//! `reconciler` both need real wall-clock time in production (status timestamps
//! are meant to read naturally next to other UTC timestamps in the object),
//! but `tokio::time::{pause, advance}` has no effect on `chrono::Utc::now()`.
//! Routing every reconciler read of "now" through this trait lets integration
//! tests substitute a clock that advances in lockstep with virtual tokio
//! time, the same way `kube-runtime`'s tests substitute a fake `Stream` for
//! real I/O rather than relying on wall-clock sleeps.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The production clock: `chrono::Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
