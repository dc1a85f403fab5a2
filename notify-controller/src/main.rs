//! Notification controller entry point.
//!
//! Wires an in-memory object store, the reference channel deliverers, and
//! an in-memory audit sink into the delivery reconciliation engine and runs
//! it. A real deployment would substitute a Kubernetes-backed
//! `ObjectStore`, real channel transports, and a durable `AuditSink`
//! without touching `notify-runtime` itself.

use std::sync::Arc;

use notify_core::store::InMemoryStore;
use notify_runtime::channels::{ConsoleDeliverer, DelivererRegistry, LogDeliverer};
use notify_runtime::{EngineConfig, Engine, InMemoryAuditSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = EngineConfig::from_env();
    let store = InMemoryStore::new();

    let deliverers = DelivererRegistry::new();
    deliverers.register(notify_core::model::ChannelKind::Console, Arc::new(ConsoleDeliverer));
    deliverers.register(notify_core::model::ChannelKind::Log, Arc::new(LogDeliverer));

    let audit_sink = Arc::new(InMemoryAuditSink::new());

    let engine = Engine::new(store, deliverers, audit_sink, config.clone());

    tracing::info!(workers = config.work_queue_workers, "starting notification controller");
    engine.run(config.work_queue_workers).await;

    Ok(())
}
