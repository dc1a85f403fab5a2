//! Object metadata shared by every `NotificationRequest`.
//!
//! Mirrors the subset of Kubernetes' `ObjectMeta` the engine actually reads:
//! identity (`namespace`/`name`/`uid`), the optimistic-concurrency token
//! (`resource_version`), and `generation`/`deletion_timestamp` for lifecycle
//! decisions.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A server-assigned identifier that is stable for the lifetime of one
/// incarnation of an object, and never reused across a delete/recreate of
/// the same `(namespace, name)`.
///
/// Used as the default correlation id and the idempotency anchor (spec.md
/// §3, §5): a new `Uid` means a fresh attempt log, a fresh correlation id,
/// and no carried-over counters, even if the `(namespace, name)` is recycled.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uid(pub String);

impl Uid {
    /// Generate a new random identifier, formatted like a UUIDv4 so it reads
    /// naturally next to real Kubernetes UIDs in logs and audit events.
    pub fn new_random() -> Self {
        let mut rng = rand::rng();
        let bytes: [u8; 16] = rng.random();
        Self(format_as_uuid(bytes))
    }
}

fn format_as_uuid(mut bytes: [u8; 16]) -> String {
    // Set version (4) and variant (RFC 4122) bits so this looks like a real UUID.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespace + name identity of a `NotificationRequest`, independent of its
/// `Uid`. Used as the work-queue key (spec.md §2, §5): `(namespace, name)`
/// identifies a *slot*, while `Uid` identifies a *lifetime* occupying it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata carried by every `NotificationRequest`, engine-relevant subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: Uid,
    /// Optimistic-concurrency token; bumped by the object store on every
    /// successful write. Compared by `StatusWriter` before each status
    /// update.
    pub resource_version: String,
    /// The spec generation; only bumped when `spec` changes. Compared
    /// against `NotificationStatus::observed_generation` so that spec edits
    /// after a terminal phase do not re-open the lifecycle.
    pub generation: i64,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub finalizers: Vec<String>,
}

impl ObjectMeta {
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Build a fresh object identity for a newly-created resource.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: Uid::new_random(),
            resource_version: "1".to_string(),
            generation: 1,
            deletion_timestamp: None,
            finalizers: Vec::new(),
        }
    }
}
