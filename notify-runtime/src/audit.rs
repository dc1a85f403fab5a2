//! Buffered, correlation-carrying audit event emission (spec.md §4.5),
//! grounded in `kube_runtime::events::recorder::EventRecorder::publish`.

use async_trait::async_trait;
use notify_core::model::{
    AuditEvent, AuditEventType, AuditOutcome, ChannelKind, CorrelationId, ACTOR_ID, ACTOR_TYPE,
    RESOURCE_TYPE,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::error::AuditError;

/// `Emit(ctx, event) -> error`; `Flush(ctx) -> error` (spec.md §6).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Reference `AuditSink` that just retains events; stands in for the real
/// audit store (spec.md §1 "out of scope: the audit store's persistence").
#[derive(Default)]
pub struct InMemoryAuditSink {
    received: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.received.lock().push(event.clone());
        Ok(())
    }
}

/// Bounded queue with a flush task; producers block when full rather than
/// dropping events (spec.md §5 "audit buffer").
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
    buffer: Arc<Mutex<VecDeque<AuditEvent>>>,
    capacity: usize,
    notify: Arc<Notify>,
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        Self {
            sink,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Build a `notification.message.sent`/`notification.message.failed`
    /// event for one channel attempt (spec.md §3 `AuditEvent`, §4.5).
    pub fn build_event(
        resource_id: impl Into<String>,
        correlation_id: CorrelationId,
        channel: &ChannelKind,
        attempt_index: u32,
        outcome: AuditOutcome,
        error_text: Option<&str>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> AuditEvent {
        let event_type = match outcome {
            AuditOutcome::Success => AuditEventType::MessageSent,
            AuditOutcome::Failure => AuditEventType::MessageFailed,
        };
        let mut event_data = serde_json::json!({
            "channel": channel.to_string(),
            "attemptIndex": attempt_index,
        });
        if let Some(err) = error_text {
            event_data["error"] = serde_json::Value::String(err.to_string());
        }
        AuditEvent {
            event_type,
            event_category: "notification",
            event_action: "sent",
            event_outcome: outcome,
            actor_type: ACTOR_TYPE,
            actor_id: ACTOR_ID,
            resource_type: RESOURCE_TYPE,
            resource_id: resource_id.into(),
            correlation_id,
            event_data,
            timestamp: now,
        }
    }

    /// Enqueue an event, blocking (async) while the buffer is at capacity
    /// (spec.md §5 "producers block when the buffer is full rather than
    /// dropping events").
    pub async fn emit(&self, event: AuditEvent) {
        loop {
            {
                let mut buffer = self.buffer.lock();
                if buffer.len() < self.capacity {
                    buffer.push_back(event);
                    self.notify.notify_one();
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Drain the buffer, blocking until every buffered event has been
    /// durably accepted by the sink or dropped after a fatal,
    /// non-retryable error (spec.md §4.5 "flush() ... idempotent and
    /// blocking"). At-least-once: on a transient sink error the event is
    /// retained and retried on the next flush.
    pub async fn flush(&self) -> Result<(), AuditError> {
        loop {
            let next = { self.buffer.lock().front().cloned() };
            let Some(event) = next else { return Ok(()) };
            match self.sink.emit(&event).await {
                Ok(()) => {
                    self.buffer.lock().pop_front();
                    self.notify.notify_one();
                }
                Err(AuditError::Fatal(reason)) => {
                    error!(%reason, "audit sink rejected event permanently; dropping");
                    self.buffer.lock().pop_front();
                    self.notify.notify_one();
                }
                Err(err @ AuditError::SinkUnavailable(_)) => {
                    warn!(error = %err, "audit sink unavailable, will retry on next flush");
                    return Err(err);
                }
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Spawn the background flush loop that drains the buffer into the sink
    /// on a fixed interval (spec.md §4.5 "buffered ... flush goroutine"),
    /// the production counterpart of the explicit `flush()` calls tests make
    /// directly. A transient sink error is logged and retried on the next
    /// tick rather than propagated, since there is no caller here to return
    /// it to.
    pub fn spawn_flush_loop(self: Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if self.flush().await.is_err() {
                    // already logged by `flush` itself; the buffered events
                    // remain queued and are retried on the next tick.
                }
            }
        })
    }
}
