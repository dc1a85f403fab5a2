//! Shared, client-less types for the notification controller.
//!
//! This crate holds everything the reconciliation engine in `notify-runtime`
//! treats as a given: the `NotificationRequest` data model (spec.md §3), the
//! typed object store abstraction the engine reads and writes through, and
//! the watch-event shape that drives reconciliation.

pub mod error;
pub mod metadata;
pub mod model;
pub mod store;
pub mod watch;

pub use error::{StoreError, ValidationError};
pub use metadata::{ObjectKey, ObjectMeta, Uid};
pub use model::{
    Attempt, AttemptStatus, AuditEvent, AuditEventType, AuditOutcome, ChannelKind, ChannelOutcome,
    ChannelState, CorrelationId, NotificationRequest, NotificationSpec, NotificationStatus,
    NotificationType, Phase, Priority, RetryPolicySpec,
};
pub use store::ObjectStore;
pub use watch::WatchEvent;
