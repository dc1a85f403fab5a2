//! The Delivery Reconciliation Engine: watches `NotificationRequest`
//! objects via a [`notify_core::store::ObjectStore`] and drives each one's
//! multi-channel fan-out, retry, circuit breaking, status update, and audit
//! emission to a terminal phase.
//!
//! Module layout mirrors `kube_runtime`'s: a small capability trait per
//! seam (`ChannelDeliverer`, `AuditSink`, `ObjectStore`), a control loop
//! (`reconciler`) that depends only on those traits, and process-wide state
//! (`breaker`) encapsulated behind an explicit API rather than left ambient.

pub mod audit;
pub mod breaker;
pub mod channels;
pub mod clock;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod reconciler;
pub mod retry;
pub mod sanitizer;
pub mod scheduler;
pub mod status;

pub use audit::{AuditEmitter, AuditSink, InMemoryAuditSink};
pub use breaker::{BreakerRegistry, BreakerState};
pub use channels::{ChannelDeliverer, DelivererRegistry, DeliveryContext, DeliveryError};
pub use clock::{Clock, SystemClock};
pub use config::EngineConfig;
pub use error::ReconcileError;
pub use orchestrator::{AttemptOutcome, DeliveryOrchestrator};
pub use reconciler::{Reconciler, RequeueDecision};
pub use retry::{classify, ErrorClass, RetryPolicy};
pub use scheduler::SchedulerHandle;
pub use status::StatusWriter;

use notify_core::metadata::ObjectKey;
use notify_core::store::ObjectStore;
use notify_core::watch::WatchEvent;
use std::sync::Arc;
use std::time::Duration;

/// Wires a store's watch feed into the scheduler (spec.md §2 step 1-2: the
/// typed object store produces change events; each event enqueues the
/// request key into the work queue).
pub fn spawn_watch_bridge<S: ObjectStore + 'static>(store: &S, scheduler: SchedulerHandle)
where
    S: Clone,
{
    let mut events = store.watch();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let key = match &event {
                        WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => {
                            obj.metadata.key()
                        }
                    };
                    scheduler.schedule(key, Duration::ZERO);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Convenience bundle for constructing a fully-wired engine, grounded on
/// `Controller::new`'s builder role in the teacher.
pub struct Engine<S> {
    pub store: S,
    pub reconciler: Arc<Reconciler<S>>,
    pub audit: Arc<AuditEmitter>,
    audit_flush_interval: Duration,
}

impl<S: ObjectStore + Clone + 'static> Engine<S> {
    pub fn new(store: S, deliverers: DelivererRegistry, audit_sink: Arc<dyn AuditSink>, config: EngineConfig) -> Self {
        let breakers = BreakerRegistry::new(config.breaker);
        let orchestrator = Arc::new(DeliveryOrchestrator::new(deliverers, breakers, config.channel_deliverer_timeout));
        let status_writer = Arc::new(StatusWriter::new(store.clone(), config.status_error_max_bytes));
        let audit = Arc::new(AuditEmitter::new(audit_sink, config.audit_buffer_size));
        let reconciler = Arc::new(Reconciler::new(store.clone(), orchestrator, status_writer, audit.clone()));
        Self {
            store,
            reconciler,
            audit,
            audit_flush_interval: config.audit_flush_interval,
        }
    }

    /// Run the engine until the due-key channel closes. Spawns the audit
    /// flush loop and the scheduler actor, bridges the store's watch feed
    /// into it, and drives `workers` reconcile workers (spec.md §5
    /// "Scheduling model", §4.5 "flush goroutine").
    pub async fn run(&self, workers: usize) {
        let flush_loop = self.audit.clone().spawn_flush_loop(self.audit_flush_interval);
        let (scheduler, due) = scheduler::spawn();
        spawn_watch_bridge(&self.store, scheduler.clone());
        for key in object_keys(&self.store).await {
            scheduler.schedule(key, Duration::ZERO);
        }
        reconciler::run(self.reconciler.clone(), scheduler, due, workers).await;
        flush_loop.abort();
        // Drain whatever accumulated since the last tick before returning.
        let _ = self.audit.flush().await;
    }
}

async fn object_keys<S: ObjectStore>(store: &S) -> Vec<ObjectKey> {
    store.list().await.into_iter().map(|r| r.metadata.key()).collect()
}
