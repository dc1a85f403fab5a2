//! Change events produced by the typed object store (spec.md §2 step 1,
//! §6). Mirrors `kube_core::watch::WatchEvent`, trimmed to the three event
//! kinds the engine's work queue actually reacts to.

use crate::model::NotificationRequest;

/// A single change notification for a `NotificationRequest`.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(NotificationRequest),
    Modified(NotificationRequest),
    Deleted(NotificationRequest),
}

impl WatchEvent {
    pub fn object(&self) -> &NotificationRequest {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}
