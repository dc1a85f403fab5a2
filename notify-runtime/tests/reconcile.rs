//! End-to-end reconcile-loop scenarios against `InMemoryStore` and reference
//! deliverers, mirroring the concrete scenarios in spec.md §8.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use notify_core::metadata::{ObjectKey, ObjectMeta};
use notify_core::model::{
    ChannelKind, NotificationRequest, NotificationSpec, NotificationType, Phase, Priority,
    RetryPolicySpec,
};
use notify_core::store::{InMemoryStore, ObjectStore};
use notify_runtime::audit::{AuditEmitter, InMemoryAuditSink};
use notify_runtime::breaker::BreakerRegistry;
use notify_runtime::channels::{
    ChannelDeliverer, ConsoleDeliverer, DelivererRegistry, DeliveryContext, DeliveryError,
    LogDeliverer, SanitizedMessage,
};
use notify_runtime::clock::Clock;
use notify_runtime::config::BreakerConfig;
use notify_runtime::orchestrator::DeliveryOrchestrator;
use notify_runtime::reconciler::{Reconciler, RequeueDecision};
use notify_runtime::status::StatusWriter;

/// A clock the test advances in lockstep with `tokio::time::advance`, since
/// pausing the tokio runtime's clock has no effect on `chrono::Utc::now()`.
#[derive(Clone)]
struct ManualClock(Arc<StdMutex<DateTime<Utc>>>);

impl ManualClock {
    fn new() -> Self {
        Self(Arc::new(StdMutex::new(Utc::now())))
    }

    fn advance(&self, by: Duration) {
        let mut guard = self.0.lock().unwrap();
        *guard += chrono::Duration::from_std(by).expect("duration fits in chrono::Duration");
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

struct AlwaysSucceeds {
    calls: Arc<AtomicU32>,
}

impl AlwaysSucceeds {
    fn new() -> Self {
        Self { calls: Arc::new(AtomicU32::new(0)) }
    }
}

#[async_trait]
impl ChannelDeliverer for AlwaysSucceeds {
    async fn deliver(&self, _ctx: &DeliveryContext, _message: &SanitizedMessage) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails with a fixed HTTP status, counting calls.
struct AlwaysFailsWith {
    status: u16,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl ChannelDeliverer for AlwaysFailsWith {
    async fn deliver(&self, _ctx: &DeliveryContext, _message: &SanitizedMessage) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::Http(self.status))
    }
}

/// Fails with a fixed non-HTTP permanent error ("disk full").
struct AlwaysFailsPermanently {
    message: &'static str,
}

#[async_trait]
impl ChannelDeliverer for AlwaysFailsPermanently {
    async fn deliver(&self, _ctx: &DeliveryContext, _message: &SanitizedMessage) -> Result<(), DeliveryError> {
        Err(DeliveryError::MalformedRecipient(self.message.to_string()))
    }
}

fn spec_with(channels: impl IntoIterator<Item = ChannelKind>, retry: RetryPolicySpec) -> NotificationSpec {
    NotificationSpec {
        type_: NotificationType::Simple,
        priority: Priority::Medium,
        subject: "build failed".into(),
        body: "see logs".into(),
        channels: channels.into_iter().collect::<BTreeSet<_>>(),
        recipients: Default::default(),
        retry_policy: retry,
        metadata: Default::default(),
    }
}

fn request(namespace: &str, name: &str, spec: NotificationSpec) -> NotificationRequest {
    NotificationRequest {
        metadata: ObjectMeta::new(namespace, name),
        spec,
        status: Default::default(),
    }
}

struct Harness {
    store: InMemoryStore,
    reconciler: Reconciler<InMemoryStore>,
    sink: Arc<InMemoryAuditSink>,
    audit: Arc<AuditEmitter>,
}

fn build_harness(deliverers: DelivererRegistry, clock: Option<Arc<dyn Clock>>) -> Harness {
    let store = InMemoryStore::new();
    let breakers = BreakerRegistry::new(BreakerConfig::default());
    let orchestrator = Arc::new(DeliveryOrchestrator::new(deliverers, breakers, Duration::from_secs(5)));
    let status_writer = Arc::new(StatusWriter::new(store.clone(), 1024));
    let sink = Arc::new(InMemoryAuditSink::new());
    let audit = Arc::new(AuditEmitter::new(sink.clone(), 256));
    let mut reconciler = Reconciler::new(store.clone(), orchestrator, status_writer, audit.clone());
    if let Some(clock) = clock {
        reconciler = reconciler.with_clock(clock);
    }
    Harness { store, reconciler, sink, audit }
}

/// Drive `reconcile_once` until it returns `None`, advancing a manual clock
/// (when present) and virtual tokio time by each requeue delay in between.
async fn drive_to_terminal(
    harness: &Harness,
    key: &ObjectKey,
    manual_clock: Option<&ManualClock>,
    max_steps: usize,
) -> NotificationRequest {
    for _ in 0..max_steps {
        let decision = harness.reconciler.reconcile_once(key).await.expect("reconcile_once succeeds");
        match decision {
            RequeueDecision::After(delay) if delay > Duration::ZERO => {
                if let Some(clock) = manual_clock {
                    clock.advance(delay);
                }
                tokio::time::advance(delay).await;
            }
            RequeueDecision::After(_) => {}
            RequeueDecision::None => break,
        }
    }
    harness.store.get(key).await.expect("object still present")
}

#[tokio::test(start_paused = true)]
async fn scenario_1_happy_path_single_channel() {
    let deliverers = DelivererRegistry::new();
    let console = Arc::new(AlwaysSucceeds::new());
    deliverers.register(ChannelKind::Console, console.clone());

    let harness = build_harness(deliverers, None);
    let req = request("default", "alert-1", spec_with([ChannelKind::Console], RetryPolicySpec::default()));
    let key = req.metadata.key();
    harness.store.create(req).await.unwrap();

    let final_req = drive_to_terminal(&harness, &key, None, 10).await;

    assert_eq!(final_req.status.phase, Phase::Sent);
    assert_eq!(final_req.status.successful_deliveries, 1);
    assert_eq!(final_req.status.failed_deliveries, 0);
    assert_eq!(console.calls.load(Ordering::SeqCst), 1);
    assert_eq!(final_req.status.delivery_attempts.len(), 1);

    harness.audit.flush().await.unwrap();
    let events = harness.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_action, "sent");
}

#[tokio::test(start_paused = true)]
async fn scenario_2_partial_success_no_retries() {
    let deliverers = DelivererRegistry::new();
    deliverers.register(ChannelKind::Console, Arc::new(AlwaysSucceeds::new()));
    deliverers.register(ChannelKind::Log, Arc::new(AlwaysSucceeds::new()));
    deliverers.register(ChannelKind::File, Arc::new(AlwaysFailsPermanently { message: "disk full" }));

    let harness = build_harness(deliverers, None);
    let retry = RetryPolicySpec { max_attempts: 1, ..RetryPolicySpec::default() };
    let req = request(
        "default",
        "alert-2",
        spec_with([ChannelKind::Console, ChannelKind::Log, ChannelKind::File], retry),
    );
    let key = req.metadata.key();
    harness.store.create(req).await.unwrap();

    let final_req = drive_to_terminal(&harness, &key, None, 10).await;

    assert_eq!(final_req.status.phase, Phase::PartiallySent);
    assert_eq!(final_req.status.successful_deliveries, 2);
    assert_eq!(final_req.status.failed_deliveries, 1);
    assert_eq!(final_req.status.delivery_attempts.len(), 3);

    harness.audit.flush().await.unwrap();
    let events = harness.sink.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events.iter().filter(|e| e.event_action == "sent" && e.event_outcome == notify_core::model::AuditOutcome::Success).count(), 2);
    assert_eq!(events.iter().filter(|e| e.event_outcome == notify_core::model::AuditOutcome::Failure).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_3_all_channels_fail_bounded_retries_with_backoff_gaps() {
    let deliverers = DelivererRegistry::new();
    let slack = Arc::new(AlwaysFailsWith { status: 503, calls: Arc::new(AtomicU32::new(0)) });
    deliverers.register(ChannelKind::Slack, slack.clone());

    let clock = ManualClock::new();
    let harness = build_harness(deliverers, Some(Arc::new(clock.clone())));

    let retry = RetryPolicySpec {
        max_attempts: 3,
        initial_backoff_seconds: 1,
        backoff_multiplier: 2.0,
        max_backoff_seconds: 60,
    };
    let req = request("default", "alert-3", spec_with([ChannelKind::Slack], retry));
    let key = req.metadata.key();
    harness.store.create(req).await.unwrap();

    let final_req = drive_to_terminal(&harness, &key, Some(&clock), 20).await;

    assert_eq!(final_req.status.phase, Phase::Failed);
    assert_eq!(final_req.status.successful_deliveries, 0);
    assert_eq!(final_req.status.failed_deliveries, 1);
    assert_eq!(slack.calls.load(Ordering::SeqCst), 3);

    let attempts: Vec<_> = final_req
        .status
        .delivery_attempts
        .iter()
        .filter(|a| a.channel == ChannelKind::Slack)
        .collect();
    assert_eq!(attempts.len(), 3);
    let gap1 = attempts[1].timestamp - attempts[0].timestamp;
    let gap2 = attempts[2].timestamp - attempts[1].timestamp;
    assert!(gap1 >= chrono::Duration::seconds(1), "first retry gap was {gap1}");
    assert!(gap2 >= chrono::Duration::seconds(2), "second retry gap was {gap2}");
}

#[tokio::test(start_paused = true)]
async fn scenario_4_permanent_classification_short_circuits() {
    let deliverers = DelivererRegistry::new();
    let slack = Arc::new(AlwaysFailsWith { status: 401, calls: Arc::new(AtomicU32::new(0)) });
    deliverers.register(ChannelKind::Slack, slack.clone());

    let harness = build_harness(deliverers, None);
    let req = request("default", "alert-4", spec_with([ChannelKind::Slack], RetryPolicySpec::default()));
    let key = req.metadata.key();
    harness.store.create(req).await.unwrap();

    let final_req = drive_to_terminal(&harness, &key, None, 10).await;

    assert_eq!(final_req.status.phase, Phase::Failed);
    assert_eq!(slack.calls.load(Ordering::SeqCst), 1);
    assert_eq!(final_req.status.delivery_attempts.len(), 1);

    harness.audit.flush().await.unwrap();
    let events = harness.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_outcome, notify_core::model::AuditOutcome::Failure);
}

#[tokio::test(start_paused = true)]
async fn scenario_5_correlation_id_override() {
    let deliverers = DelivererRegistry::new();
    deliverers.register(ChannelKind::Console, Arc::new(AlwaysSucceeds::new()));

    let harness = build_harness(deliverers, None);
    let mut spec = spec_with([ChannelKind::Console], RetryPolicySpec::default());
    spec.metadata.insert("remediationRequestName".to_string(), "rem-42".to_string());
    let req = request("default", "alert-5", spec);
    let key = req.metadata.key();
    harness.store.create(req).await.unwrap();

    drive_to_terminal(&harness, &key, None, 10).await;

    harness.audit.flush().await.unwrap();
    let events = harness.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].correlation_id.0, "rem-42");
}

#[tokio::test(start_paused = true)]
async fn scenario_6_rapid_create_delete_lifecycle() {
    let deliverers = DelivererRegistry::new();
    let console = Arc::new(AlwaysSucceeds::new());
    deliverers.register(ChannelKind::Console, console.clone());
    let harness = build_harness(deliverers, None);

    for i in 0..10 {
        let name = format!("flap-{i}");
        let req = request("default", &name, spec_with([ChannelKind::Console], RetryPolicySpec::default()));
        let key = req.metadata.key();
        harness.store.create(req).await.unwrap();

        // Observe reconciliation begin (moves Empty -> Pending), then delete
        // before it can complete.
        let _ = harness.reconciler.reconcile_once(&key).await.unwrap();
        harness.store.delete(&key).await.unwrap();

        // A stale trigger for the now-deleted key must be a no-op, not a panic.
        let decision = harness.reconciler.reconcile_once(&key).await.unwrap();
        assert_eq!(decision, RequeueDecision::None);
        assert!(harness.store.get(&key).await.is_none());
    }

    assert!(harness.store.list().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_7_concurrent_load_mostly_succeeds() {
    let deliverers = DelivererRegistry::new();
    deliverers.register(ChannelKind::Console, Arc::new(ConsoleDeliverer));
    deliverers.register(ChannelKind::Log, Arc::new(LogDeliverer));
    let harness = Arc::new(build_harness(deliverers, None));

    let mut keys = Vec::new();
    for i in 0..50 {
        let name = format!("load-{i}");
        let req = request("default", &name, spec_with([ChannelKind::Console], RetryPolicySpec::default()));
        keys.push(req.metadata.key());
        harness.store.create(req).await.unwrap();
    }

    let mut handles = Vec::new();
    for key in keys.clone() {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move { drive_to_terminal(&harness, &key, None, 10).await }));
    }

    let mut sent = 0;
    for handle in handles {
        let final_req = handle.await.unwrap();
        if final_req.status.phase == Phase::Sent {
            sent += 1;
            assert_eq!(final_req.status.total_attempts, 1);
        }
    }

    assert!(sent as f64 >= 0.9 * keys.len() as f64, "only {sent}/{} terminated as Sent", keys.len());
}
