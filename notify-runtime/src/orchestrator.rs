//! Per-channel fan-out and result aggregation (spec.md §4.2).

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use notify_core::model::{ChannelKind, NotificationRequest};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn};

use crate::breaker::{breaker_open_message, BreakerRegistry, BreakerState};
use crate::channels::{sanitize_message, DelivererRegistry, DeliveryContext, DeliveryError};
use crate::retry::{classify, ErrorClass};

/// The outcome of one channel's attempt within a single fan-out
/// (spec.md §4.2 `fanOut(request, channels) -> map<channel, Outcome>`).
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success,
    Failed { class: ErrorClass, message: String },
}

pub struct DeliveryOrchestrator {
    deliverers: DelivererRegistry,
    breakers: BreakerRegistry,
    default_timeout: Duration,
    max_concurrency: usize,
}

impl DeliveryOrchestrator {
    pub fn new(deliverers: DelivererRegistry, breakers: BreakerRegistry, default_timeout: Duration) -> Self {
        Self {
            deliverers,
            breakers,
            default_timeout,
            max_concurrency: 16,
        }
    }

    pub fn deliverers(&self) -> &DelivererRegistry {
        &self.deliverers
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Invoke every channel in `channels` concurrently (deduplicated — a
    /// `BTreeSet` can't repeat a channel, but admission-level duplicates are
    /// defended against anyway per spec.md §4.2 "Dedup within a single
    /// fan-out"), merging outcomes in deterministic channel-ascending order
    /// before returning (spec.md §5 "Ordering guarantees").
    pub async fn fan_out(
        &self,
        request: &NotificationRequest,
        channels: &[ChannelKind],
    ) -> BTreeMap<ChannelKind, AttemptOutcome> {
        let message = sanitize_message(request);
        let recipients = &request.spec.recipients;
        let concurrency = self.max_concurrency.min(channels.len().max(1));

        let results = stream::iter(channels.iter().cloned())
            .map(|channel| {
                let message = message.clone();
                let recipient = recipients.get(&channel).cloned();
                let timeout = self.default_timeout;
                async move {
                    let outcome = self.attempt(&channel, recipient, timeout, &message).await;
                    (channel, outcome)
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        results.into_iter().collect()
    }

    async fn attempt(
        &self,
        channel: &ChannelKind,
        recipient: Option<String>,
        timeout: Duration,
        message: &crate::channels::SanitizedMessage,
    ) -> AttemptOutcome {
        match self.breakers.state(channel) {
            BreakerState::Open => {
                let msg = breaker_open_message(channel);
                debug!(%channel, "short-circuited by open breaker");
                return AttemptOutcome::Failed {
                    class: ErrorClass::Transient,
                    message: msg,
                };
            }
            BreakerState::Closed | BreakerState::HalfOpen => {}
        }

        let Some(deliverer) = self.deliverers.get(channel) else {
            warn!(%channel, "no deliverer registered");
            return AttemptOutcome::Failed {
                class: ErrorClass::Permanent,
                message: DeliveryError::NoDeliverer.to_string(),
            };
        };

        let ctx = DeliveryContext { timeout, recipient };
        let call = AssertUnwindSafe(deliverer.deliver(&ctx, message)).catch_unwind();
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            // ProgrammerError (spec.md §7): a panicking deliverer must not
            // abort the fan-out or the worker running it; recovered here and
            // reported as a transient failure for this channel only.
            Ok(Err(panic)) => {
                let reason = panic_payload_message(&panic);
                warn!(%channel, %reason, "deliverer panicked, recovering as a transient failure");
                Err(DeliveryError::Other(format!("deliverer panicked: {reason}")))
            }
            Err(_) => Err(DeliveryError::Timeout),
        };

        match result {
            Ok(()) => {
                self.breakers.record_success(channel);
                AttemptOutcome::Success
            }
            Err(err) => {
                let class = classify(&err);
                match class {
                    ErrorClass::Permanent => self.breakers.record_permanent_failure(channel),
                    ErrorClass::Transient => self.breakers.record_transient_failure(channel),
                }
                warn!(%channel, error = %err, ?class, "channel delivery failed");
                AttemptOutcome::Failed {
                    class,
                    message: err.to_string(),
                }
            }
        }
    }
}

/// Best-effort extraction of a panic's message, for the warn log only; the
/// classification itself never depends on the payload's contents.
fn panic_payload_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
