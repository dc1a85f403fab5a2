//! The control loop itself (spec.md §4.1): given a request key, drive the
//! corresponding object closer to a terminal phase, or requeue with a
//! computed delay. Mirrors the shape of `kube_runtime::controller::applier`
//! and `Runner`'s single-flight-per-key execution, collapsed into one
//! struct since this engine owns both the reconcile function and its own
//! driving loop.

use chrono::Utc;
use notify_core::metadata::ObjectKey;
use notify_core::model::{
    Attempt, AttemptStatus, AuditOutcome, ChannelKind, ChannelState, NotificationRequest,
    NotificationStatus, Phase,
};
use notify_core::store::ObjectStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, Instrument};

use crate::audit::AuditEmitter;
use crate::clock::{Clock, SystemClock};
use crate::error::ReconcileError;
use crate::orchestrator::{AttemptOutcome, DeliveryOrchestrator};
use crate::retry::RetryPolicy;
use crate::scheduler::SchedulerHandle;
use crate::status::StatusWriter;

/// What the driving loop should do after one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequeueDecision {
    None,
    After(Duration),
}

pub struct Reconciler<S> {
    store: S,
    orchestrator: Arc<DeliveryOrchestrator>,
    status_writer: Arc<StatusWriter<S>>,
    audit: Arc<AuditEmitter>,
    clock: Arc<dyn Clock>,
}

impl<S: ObjectStore + Clone + 'static> Reconciler<S> {
    pub fn new(
        store: S,
        orchestrator: Arc<DeliveryOrchestrator>,
        status_writer: Arc<StatusWriter<S>>,
        audit: Arc<AuditEmitter>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            status_writer,
            audit,
            clock: Arc::new(SystemClock),
        }
    }

    /// Substitute the wall clock (tests only need this; production wiring
    /// always gets `SystemClock` from `new`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// One execution of the control loop for one request key (spec.md §4.1
    /// algorithm, steps 1-10).
    pub async fn reconcile_once(&self, key: &ObjectKey) -> Result<RequeueDecision, ReconcileError> {
        let Some(request) = self.store.get(key).await else {
            // Step 2: resource deleted; idempotent no-op.
            return Ok(RequeueDecision::None);
        };

        if request.metadata.is_deleting() {
            return Ok(RequeueDecision::None);
        }

        let span = info_span!("reconcile", namespace = %key.namespace, name = %key.name);
        self.reconcile_inner(request).instrument(span).await
    }

    async fn reconcile_inner(&self, request: NotificationRequest) -> Result<RequeueDecision, ReconcileError> {
        let key = request.metadata.key();

        // Step 3: terminal phases are absorbing.
        if request.status.phase.is_terminal() {
            return Ok(RequeueDecision::None);
        }

        // Step 4: first observation moves (empty) -> Pending and returns;
        // the next reconcile continues the work.
        if matches!(request.status.phase, Phase::Empty) {
            let mut status = request.status.clone();
            status.phase = Phase::Pending;
            status.observed_generation = request.metadata.generation;
            self.status_writer
                .commit(&key, request.metadata.resource_version.clone(), status, |current| {
                    let mut status = current.status.clone();
                    status.phase = Phase::Pending;
                    status.observed_generation = current.metadata.generation;
                    status
                })
                .await?;
            return Ok(RequeueDecision::After(Duration::ZERO));
        }

        let max_attempts = request.spec.retry_policy.max_attempts;
        let policy = RetryPolicy::new(request.spec.retry_policy);
        let now = self.clock.now();

        // Step 5: rebuild per-channel state and find eligible channels.
        let states = ChannelState::rebuild_all(&request.spec.channels, &request.status.delivery_attempts, max_attempts);
        let eligible = eligible_channels(&states, &policy, max_attempts, now);

        if eligible.is_empty() {
            if let Some(wait) = next_eligible_wait(&states, &policy, max_attempts, now) {
                // Step 6: nothing to do yet; requeue at the nearest future time.
                return Ok(RequeueDecision::After(wait));
            }
            // Every channel has reached a terminal outcome; commit the
            // terminal status if we haven't already (covers the case where
            // a previous reconcile's write raced a crash before the phase
            // was observed as terminal).
            let status = finalize_status(&request, &states, max_attempts, now);
            self.status_writer
                .commit(&key, request.metadata.resource_version.clone(), status, |current| {
                    let states =
                        ChannelState::rebuild_all(&current.spec.channels, &current.status.delivery_attempts, max_attempts);
                    finalize_status(current, &states, max_attempts, now)
                })
                .await?;
            return Ok(RequeueDecision::None);
        }

        // Step 7: fan out to every eligible channel.
        let outcomes = self.orchestrator.fan_out(&request, &eligible).await;
        let correlation_id = request.correlation_id();
        let resource_id = request.metadata.name.clone();

        let mut new_attempts = Vec::new();
        for channel in &eligible {
            let Some(outcome) = outcomes.get(channel) else { continue };
            let attempts_made = states.get(channel).map(|s| s.attempts).unwrap_or(0);
            let attempt_index = attempts_made + 1;
            let (status_kind, error, audit_outcome) = match outcome {
                AttemptOutcome::Success => (AttemptStatus::Success, None, AuditOutcome::Success),
                AttemptOutcome::Failed { class, message } => {
                    let capped = self.status_writer.cap_error_text(message);
                    let status_kind = match class {
                        crate::retry::ErrorClass::Permanent => AttemptStatus::FailedPermanent,
                        crate::retry::ErrorClass::Transient => AttemptStatus::FailedTransient,
                    };
                    if policy.should_retry(*class, attempt_index) {
                        debug!(%channel, attempt_index, "channel delivery failed, will retry");
                    } else {
                        debug!(%channel, attempt_index, "channel delivery failed, retry budget exhausted or permanent");
                    }
                    (status_kind, Some(capped), AuditOutcome::Failure)
                }
            };
            let attempt = Attempt {
                channel: channel.clone(),
                timestamp: now,
                status: status_kind,
                error: error.clone(),
                attempt_index_within_channel: attempt_index,
            };
            let event = AuditEmitter::build_event(
                resource_id.clone(),
                correlation_id.clone(),
                channel,
                attempt_index,
                audit_outcome,
                error.as_deref(),
                now,
            );
            self.audit.emit(event).await;
            new_attempts.push(attempt);
        }

        let status = merge_status(&request, &new_attempts, max_attempts, now);
        let new_attempts_for_retry = new_attempts.clone();
        let updated = self
            .status_writer
            .commit(&key, request.metadata.resource_version.clone(), status, move |current| {
                merge_status(current, &new_attempts_for_retry, max_attempts, now)
            })
            .await?;

        if updated.status.phase.is_terminal() {
            info!(namespace = %key.namespace, name = %key.name, phase = %updated.status.phase, "request reached terminal phase");
            return Ok(RequeueDecision::None);
        }

        let states = ChannelState::rebuild_all(&updated.spec.channels, &updated.status.delivery_attempts, max_attempts);
        match next_eligible_wait(&states, &policy, max_attempts, now) {
            Some(wait) => Ok(RequeueDecision::After(wait)),
            None => Ok(RequeueDecision::After(Duration::ZERO)),
        }
    }
}

fn eligible_channels(
    states: &std::collections::BTreeMap<ChannelKind, ChannelState>,
    policy: &RetryPolicy,
    max_attempts: u32,
    now: chrono::DateTime<Utc>,
) -> Vec<ChannelKind> {
    states
        .values()
        .filter(|state| !state.is_terminal(max_attempts))
        .filter(|state| match state.last_attempt {
            // Never attempted: eligible immediately (spec.md §4.1 step 5).
            None => true,
            Some(last) => {
                let wait = policy.backoff(state.attempts);
                match chrono::Duration::from_std(wait) {
                    Ok(wait) => now >= last + wait,
                    Err(_) => true,
                }
            }
        })
        .map(|state| state.channel.clone())
        .collect()
}

fn next_eligible_wait(
    states: &std::collections::BTreeMap<ChannelKind, ChannelState>,
    policy: &RetryPolicy,
    max_attempts: u32,
    now: chrono::DateTime<Utc>,
) -> Option<Duration> {
    states
        .values()
        .filter(|state| !state.is_terminal(max_attempts))
        .filter_map(|state| {
            let last = state.last_attempt?;
            let wait = policy.backoff(state.attempts);
            let target = last + chrono::Duration::from_std(wait).ok()?;
            let remaining = (target - now).to_std().unwrap_or(Duration::ZERO);
            Some(remaining)
        })
        .min()
}

fn merge_status(
    base: &NotificationRequest,
    new_attempts: &[Attempt],
    max_attempts: u32,
    now: chrono::DateTime<Utc>,
) -> NotificationStatus {
    let mut attempts_log = base.status.delivery_attempts.clone();
    attempts_log.extend(new_attempts.iter().cloned());
    let states = ChannelState::rebuild_all(&base.spec.channels, &attempts_log, max_attempts);
    build_status(base, attempts_log, &states, max_attempts, now)
}

fn finalize_status(
    base: &NotificationRequest,
    states: &std::collections::BTreeMap<ChannelKind, ChannelState>,
    max_attempts: u32,
    now: chrono::DateTime<Utc>,
) -> NotificationStatus {
    build_status(base, base.status.delivery_attempts.clone(), states, max_attempts, now)
}

fn build_status(
    base: &NotificationRequest,
    attempts_log: Vec<Attempt>,
    states: &std::collections::BTreeMap<ChannelKind, ChannelState>,
    max_attempts: u32,
    now: chrono::DateTime<Utc>,
) -> NotificationStatus {
    let total_attempts: u32 = states.values().map(|s| s.attempts).sum();
    let successful: u32 = states
        .values()
        .filter(|s| matches!(s.outcome, notify_core::model::ChannelOutcome::Succeeded))
        .count() as u32;
    let failed: u32 = states.values().filter(|s| s.counts_as_failed(max_attempts)).count() as u32;

    let all_terminal = states.values().all(|s| s.is_terminal(max_attempts));

    let phase = if !all_terminal {
        Phase::Sending
    } else if failed == 0 {
        Phase::Sent
    } else if successful == 0 {
        Phase::Failed
    } else {
        Phase::PartiallySent
    };

    let completion_time = if phase.is_terminal() {
        base.status.completion_time.or(Some(now))
    } else {
        None
    };

    NotificationStatus {
        phase,
        delivery_attempts: attempts_log,
        successful_deliveries: successful,
        failed_deliveries: failed,
        total_attempts,
        completion_time,
        observed_generation: base.metadata.generation,
    }
}

/// Drives reconciles for due keys with at-most-one-in-flight-per-key
/// semantics (spec.md §4.1 "Contract", §5 "work queue ... per-key
/// single-flighting"), modeled on `kube_runtime::controller::runner::Runner`.
pub async fn run<S: ObjectStore + Clone + 'static>(
    reconciler: Arc<Reconciler<S>>,
    scheduler: SchedulerHandle,
    mut due: mpsc::UnboundedReceiver<ObjectKey>,
    workers: usize,
) {
    let in_flight: Arc<Mutex<HashSet<ObjectKey>>> = Arc::new(Mutex::new(HashSet::new()));
    let (work_tx, work_rx) = async_channel(workers);

    let dispatcher = {
        let in_flight = in_flight.clone();
        let scheduler = scheduler.clone();
        async move {
            while let Some(key) = due.recv().await {
                if in_flight.lock().contains(&key) {
                    // Another execution is in flight; defer this trigger
                    // rather than running concurrently for the same key.
                    scheduler.schedule(key, Duration::from_millis(50));
                    continue;
                }
                in_flight.lock().insert(key.clone());
                let _ = work_tx.send(key).await;
            }
        }
    };

    let workers_fut = (0..workers.max(1)).map(|_| {
        let reconciler = reconciler.clone();
        let scheduler = scheduler.clone();
        let in_flight = in_flight.clone();
        let work_rx = work_rx.clone();
        async move {
            while let Ok(key) = work_rx.recv().await {
                match reconciler.reconcile_once(&key).await {
                    Ok(RequeueDecision::After(delay)) => scheduler.schedule(key.clone(), delay),
                    Ok(RequeueDecision::None) => {}
                    Err(err) => {
                        tracing::error!(namespace = %key.namespace, name = %key.name, error = %err, "reconcile failed, requeuing");
                        scheduler.schedule(key.clone(), Duration::from_secs(1));
                    }
                }
                in_flight.lock().remove(&key);
            }
        }
    });

    futures::future::join(dispatcher, futures::future::join_all(workers_fut)).await;
}

/// A tiny bounded MPMC channel built on `async-channel`-like semantics
/// using `tokio::sync::mpsc` plus cloneable receiver via a shared mutex,
/// since only this module needs multi-consumer fan-out.
fn async_channel<T: Send + 'static>(capacity: usize) -> (mpsc::Sender<T>, SharedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, SharedReceiver { inner: Arc::new(tokio::sync::Mutex::new(rx)) })
}

#[derive(Clone)]
struct SharedReceiver<T> {
    inner: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T> SharedReceiver<T> {
    async fn recv(&self) -> Result<T, ()> {
        self.inner.lock().await.recv().await.ok_or(())
    }
}
