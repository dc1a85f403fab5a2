//! The typed object store abstraction the engine reads and writes through
//! (spec.md §1 "given: a typed object store", §6).
//!
//! `ObjectStore` stands in for the Kubernetes API server from this engine's
//! point of view: `get`/`list` are eventually-consistent cache reads,
//! `update_status` is an optimistic-concurrency compare-and-swap on
//! `resource_version`, and `watch` delivers the change feed the work queue is
//! built from. `InMemoryStore` is the reference implementation used by tests
//! and by `notify-controller` when no real cluster is wired in.

use crate::error::{StoreError, ValidationError};
use crate::metadata::ObjectKey;
use crate::model::NotificationRequest;
use crate::watch::WatchEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A typed, namespace-scoped object store (spec.md §6).
///
/// Implementors may be backed by a real API server or, as here, an in-memory
/// map; the engine only ever depends on this trait.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Option<NotificationRequest>;

    async fn list(&self) -> Vec<NotificationRequest>;

    /// Admit a new object. Rejects specs that fail validation (spec.md §3),
    /// standing in for a CRD validation webhook.
    async fn create(&self, request: NotificationRequest) -> Result<NotificationRequest, StoreError>;

    /// Replace `status` on the object at `key`, failing if `expected_resource_version`
    /// no longer matches the stored one (spec.md §4.1 "optimistic concurrency").
    async fn update_status(
        &self,
        key: &ObjectKey,
        expected_resource_version: &str,
        status: crate::model::NotificationStatus,
    ) -> Result<NotificationRequest, StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    /// Subscribe to the change feed. Every `Added`/`Modified`/`Deleted` event
    /// for any object in the store is broadcast to every subscriber
    /// (spec.md §2 step 1).
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Reference `ObjectStore` backed by a `parking_lot::RwLock<HashMap<..>>`
/// plus a `tokio::sync::broadcast` change feed, mirroring the
/// `Writer`/`Store` split in `kube_runtime::reflector::store` but collapsed
/// into a single read-write handle since this engine owns both sides.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<RwLock<HashMap<ObjectKey, NotificationRequest>>>,
    events: Arc<broadcast::Sender<WatchEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(tx),
        }
    }

    fn bump_resource_version(rv: &str) -> String {
        rv.parse::<u64>().map(|n| n + 1).unwrap_or(1).to_string()
    }

    fn validate(request: &NotificationRequest) -> Result<(), ValidationError> {
        let mut seen = std::collections::HashSet::new();
        for channel in &request.spec.channels {
            if !seen.insert(channel.clone()) {
                return Err(ValidationError::DuplicateChannel(channel.to_string()));
            }
        }
        request.spec.validate()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Option<NotificationRequest> {
        self.inner.read().get(key).cloned()
    }

    async fn list(&self) -> Vec<NotificationRequest> {
        self.inner.read().values().cloned().collect()
    }

    async fn create(&self, request: NotificationRequest) -> Result<NotificationRequest, StoreError> {
        Self::validate(&request).map_err(|e| StoreError::Invalid(request.metadata.key(), e))?;
        let key = request.metadata.key();
        self.inner.write().insert(key.clone(), request.clone());
        let _ = self.events.send(WatchEvent::Added(request.clone()));
        Ok(request)
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        expected_resource_version: &str,
        status: crate::model::NotificationStatus,
    ) -> Result<NotificationRequest, StoreError> {
        let mut guard = self.inner.write();
        let existing = guard.get_mut(key).ok_or_else(|| StoreError::NotFound(key.clone()))?;
        if existing.metadata.resource_version != expected_resource_version {
            return Err(StoreError::Conflict(key.clone()));
        }
        existing.status = status;
        existing.metadata.resource_version = Self::bump_resource_version(&existing.metadata.resource_version);
        let updated = existing.clone();
        drop(guard);
        let _ = self.events.send(WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let removed = self
            .inner
            .write()
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let _ = self.events.send(WatchEvent::Deleted(removed));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ObjectMeta;
    use crate::model::{ChannelKind, NotificationSpec, NotificationStatus, NotificationType, Priority, RetryPolicySpec};
    use std::collections::{BTreeMap, BTreeSet};

    fn sample_request(namespace: &str, name: &str) -> NotificationRequest {
        let mut channels = BTreeSet::new();
        channels.insert(ChannelKind::Console);
        NotificationRequest {
            metadata: ObjectMeta::new(namespace, name),
            spec: NotificationSpec {
                type_: NotificationType::Simple,
                priority: Priority::Medium,
                subject: "subject".into(),
                body: "body".into(),
                channels,
                recipients: BTreeMap::new(),
                retry_policy: RetryPolicySpec::default(),
                metadata: BTreeMap::new(),
            },
            status: NotificationStatus::default(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryStore::new();
        let req = sample_request("default", "alert-1");
        let key = req.metadata.key();
        store.create(req.clone()).await.unwrap();
        let fetched = store.get(&key).await.unwrap();
        assert_eq!(fetched.metadata.name, "alert-1");
    }

    #[tokio::test]
    async fn create_rejects_empty_channels() {
        let store = InMemoryStore::new();
        let mut req = sample_request("default", "alert-2");
        req.spec.channels.clear();
        let err = store.create(req).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_, ValidationError::EmptyChannels)));
    }

    #[tokio::test]
    async fn update_status_detects_conflict() {
        let store = InMemoryStore::new();
        let req = sample_request("default", "alert-3");
        let key = req.metadata.key();
        store.create(req).await.unwrap();
        let err = store
            .update_status(&key, "stale", NotificationStatus::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_status_bumps_resource_version_and_emits_event() {
        let store = InMemoryStore::new();
        let req = sample_request("default", "alert-4");
        let key = req.metadata.key();
        let rv = req.metadata.resource_version.clone();
        let mut rx = store.watch();
        store.create(req).await.unwrap();
        let _added = rx.recv().await.unwrap();

        let updated = store
            .update_status(&key, &rv, NotificationStatus::default())
            .await
            .unwrap();
        assert_ne!(updated.metadata.resource_version, rv);
        let modified = rx.recv().await.unwrap();
        assert!(matches!(modified, WatchEvent::Modified(_)));
    }
}
