//! The `NotificationRequest` data model (spec.md §3).

use crate::error::ValidationError;
use crate::metadata::ObjectMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Affects payload formatting only (spec.md §3).
///
/// Serializes/deserializes as a bare string (`"simple"` or any other tag),
/// rather than the default externally-tagged enum representation, so a
/// `Custom` variant round-trips as plain text instead of `{"custom": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationType {
    Simple,
    /// Forward-compatible escape hatch for formatting variants this engine
    /// doesn't special-case.
    Custom(String),
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationType::Simple => f.write_str("simple"),
            NotificationType::Custom(s) => f.write_str(s),
        }
    }
}

impl Serialize for NotificationType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NotificationType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "simple" => NotificationType::Simple,
            _ => NotificationType::Custom(raw),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// A channel kind is a closed enumerated set at the spec level, but the
/// registry that maps kinds to `ChannelDeliverer`s is an open, tagged-variant
/// set (spec.md §9 "Variants vs inheritance") — hence `Custom` rather than a
/// hard compile-time enum ceiling.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelKind {
    Console,
    Log,
    File,
    Slack,
    Email,
    Custom(String),
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Console => f.write_str("console"),
            ChannelKind::Log => f.write_str("log"),
            ChannelKind::File => f.write_str("file"),
            ChannelKind::Slack => f.write_str("slack"),
            ChannelKind::Email => f.write_str("email"),
            ChannelKind::Custom(s) => f.write_str(s),
        }
    }
}

/// Serializes as a bare string, matching the tagged-variant-open-set design
/// called out in spec.md §9: known kinds use their short name, anything
/// else round-trips through `Custom`. This also makes `ChannelKind` usable
/// as a JSON object key in `recipients` (spec.md §3).
impl Serialize for ChannelKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChannelKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "console" => ChannelKind::Console,
            "log" => ChannelKind::Log,
            "file" => ChannelKind::File,
            "slack" => ChannelKind::Slack,
            "email" => ChannelKind::Email,
            _ => ChannelKind::Custom(raw),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicySpec {
    pub max_attempts: u32,
    pub initial_backoff_seconds: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: u64,
}

impl Default for RetryPolicySpec {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_seconds: 1,
            backoff_multiplier: 2.0,
            max_backoff_seconds: 60,
        }
    }
}

impl RetryPolicySpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts < 1 {
            return Err(ValidationError::InvalidMaxAttempts);
        }
        if self.initial_backoff_seconds < 1 {
            return Err(ValidationError::InvalidInitialBackoff);
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ValidationError::InvalidBackoffMultiplier);
        }
        if self.max_backoff_seconds < self.initial_backoff_seconds {
            return Err(ValidationError::InvalidMaxBackoff);
        }
        Ok(())
    }

    /// `backoff(n) = min(maxBackoffSeconds, initialBackoffSeconds *
    /// backoffMultiplier^(n-1))` (spec.md §4.1), `n` = attempts already made
    /// for the channel. The first retry uses `backoff(1)`.
    pub fn backoff_seconds(&self, attempts_made: u32) -> u64 {
        debug_assert!(attempts_made >= 1);
        let exponent = (attempts_made - 1) as i32;
        let raw = self.initial_backoff_seconds as f64 * self.backoff_multiplier.powi(exponent);
        if !raw.is_finite() || raw >= self.max_backoff_seconds as f64 {
            self.max_backoff_seconds
        } else {
            raw as u64
        }
    }
}

/// The immutable (for this engine's purposes) part of a `NotificationRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSpec {
    #[serde(rename = "type")]
    pub type_: NotificationType,
    pub priority: Priority,
    pub subject: String,
    pub body: String,
    pub channels: BTreeSet<ChannelKind>,
    pub recipients: BTreeMap<ChannelKind, String>,
    #[serde(default)]
    pub retry_policy: RetryPolicySpec,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NotificationSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.channels.is_empty() {
            return Err(ValidationError::EmptyChannels);
        }
        self.retry_policy.validate()?;
        Ok(())
    }

    /// `metadata["remediationRequestName"]`, when present and non-empty,
    /// overrides the audit correlation id (spec.md §3, §4.5).
    pub fn correlation_override(&self) -> Option<&str> {
        self.metadata
            .get("remediationRequestName")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Engine-assigned high-level phase (spec.md §3, §4.1 phase machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Empty,
    Pending,
    Sending,
    Sent,
    PartiallySent,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Sent | Phase::PartiallySent | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Empty => "",
            Phase::Pending => "Pending",
            Phase::Sending => "Sending",
            Phase::Sent => "Sent",
            Phase::PartiallySent => "PartiallySent",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Per-attempt outcome (spec.md §3 `Attempt.status∈{success,failed}`,
/// refined here into `FailedPermanent`/`FailedTransient` so that
/// `ChannelState::rebuild_all` can reconstruct §3 `ChannelState.outcome`
/// purely from `deliveryAttempts`, as §4.1 step 5 requires — the original
/// two-value enum can't distinguish a terminal failure from a retryable one
/// once replayed from the log).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    FailedPermanent,
    FailedTransient,
    /// A synthetic entry folding older attempts' counts together under
    /// `StatusWriter` size pressure (spec.md §4.4, §9 open question).
    RolledUp,
}

/// One invocation of a channel deliverer (spec.md §3 `Attempt`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub channel: ChannelKind,
    pub timestamp: DateTime<Utc>,
    pub status: AttemptStatus,
    pub error: Option<String>,
    /// 1-based index of this attempt among attempts made for `channel`; for
    /// a `RolledUp` entry, the count of attempts it summarizes.
    pub attempt_index_within_channel: u32,
}

/// Terminal (or pending) outcome of one channel, reconstructed from
/// `deliveryAttempts` at the start of each reconcile (spec.md §3
/// `ChannelState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelOutcome {
    Pending,
    Succeeded,
    FailedPermanent,
    FailedTransientRetryable,
}

impl ChannelOutcome {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelOutcome::Succeeded | ChannelOutcome::FailedPermanent)
    }
}

/// Per-channel in-memory reconcile state (spec.md §3 `ChannelState`).
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub channel: ChannelKind,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub outcome: ChannelOutcome,
    pub terminal_error: Option<String>,
}

impl ChannelState {
    pub fn has_retry_budget(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }

    /// A channel has reached a terminal outcome once it has succeeded,
    /// failed permanently, or exhausted its retry budget while still
    /// transiently failing (spec.md §4.1 eligibility rule, read backwards).
    pub fn is_terminal(&self, max_attempts: u32) -> bool {
        self.outcome.is_terminal()
            || (self.outcome == ChannelOutcome::FailedTransientRetryable && !self.has_retry_budget(max_attempts))
    }

    /// Whether this channel's terminal state should count toward
    /// `failedDeliveries` (spec.md §3: "counts of unique channels that
    /// ultimately ... failed").
    pub fn counts_as_failed(&self, max_attempts: u32) -> bool {
        matches!(self.outcome, ChannelOutcome::FailedPermanent)
            || (self.outcome == ChannelOutcome::FailedTransientRetryable && !self.has_retry_budget(max_attempts))
    }

    fn fresh(channel: ChannelKind) -> Self {
        Self {
            channel,
            attempts: 0,
            last_attempt: None,
            outcome: ChannelOutcome::Pending,
            terminal_error: None,
        }
    }

    /// Rebuild every channel's state from the append-only attempt log
    /// (spec.md §4.1 step 5). `max_attempts` stops a channel from being
    /// reconsidered once its retry budget is exhausted, even if its last
    /// recorded attempt was a transient failure.
    pub fn rebuild_all(
        channels: &BTreeSet<ChannelKind>,
        attempts_log: &[Attempt],
        max_attempts: u32,
    ) -> BTreeMap<ChannelKind, ChannelState> {
        let mut states: BTreeMap<ChannelKind, ChannelState> = channels
            .iter()
            .cloned()
            .map(|c| (c.clone(), ChannelState::fresh(c)))
            .collect();

        for attempt in attempts_log {
            let Some(state) = states.get_mut(&attempt.channel) else {
                // Attempt for a channel no longer in spec.channels; ignore.
                continue;
            };
            match attempt.status {
                AttemptStatus::Success => {
                    state.attempts += 1;
                    state.last_attempt = Some(attempt.timestamp);
                    state.outcome = ChannelOutcome::Succeeded;
                    state.terminal_error = None;
                }
                AttemptStatus::FailedPermanent => {
                    state.attempts += 1;
                    state.last_attempt = Some(attempt.timestamp);
                    state.terminal_error = attempt.error.clone();
                    state.outcome = ChannelOutcome::FailedPermanent;
                }
                AttemptStatus::FailedTransient => {
                    state.attempts += 1;
                    state.last_attempt = Some(attempt.timestamp);
                    state.terminal_error = attempt.error.clone();
                    // Permanent classification latches even if a later replay
                    // somehow recorded a transient entry; otherwise the
                    // channel stays retryable until `max_attempts` is
                    // exhausted, which `ChannelState::is_terminal` checks.
                    if state.outcome != ChannelOutcome::FailedPermanent {
                        state.outcome = ChannelOutcome::FailedTransientRetryable;
                    }
                }
                AttemptStatus::RolledUp => {
                    state.attempts += attempt.attempt_index_within_channel;
                    state.last_attempt = Some(attempt.timestamp);
                }
            }
        }
        states
    }
}

/// Engine-owned observed state of a `NotificationRequest` (spec.md §3
/// `Status`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationStatus {
    pub phase: Phase,
    pub delivery_attempts: Vec<Attempt>,
    pub successful_deliveries: u32,
    pub failed_deliveries: u32,
    pub total_attempts: u32,
    pub completion_time: Option<DateTime<Utc>>,
    pub observed_generation: i64,
}

impl NotificationStatus {
    /// Invariant: `successfulDeliveries + failedDeliveries <= |channels|`
    /// (spec.md §3).
    pub fn counts_consistent(&self, channel_count: usize) -> bool {
        (self.successful_deliveries + self.failed_deliveries) as usize <= channel_count
    }
}

/// Correlation id joining every audit event produced across one request
/// lifecycle (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    #[serde(rename = "notification.message.sent")]
    MessageSent,
    #[serde(rename = "notification.message.failed")]
    MessageFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One audit record per channel attempt (spec.md §3 `AuditEvent`, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub event_category: &'static str,
    pub event_action: &'static str,
    pub event_outcome: AuditOutcome,
    pub actor_type: &'static str,
    pub actor_id: &'static str,
    pub resource_type: &'static str,
    pub resource_id: String,
    pub correlation_id: CorrelationId,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

pub const ACTOR_TYPE: &str = "service";
pub const ACTOR_ID: &str = "notification-controller";
pub const RESOURCE_TYPE: &str = "NotificationRequest";

/// The observed object (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub metadata: ObjectMeta,
    pub spec: NotificationSpec,
    #[serde(default)]
    pub status: NotificationStatus,
}

impl NotificationRequest {
    /// The id used for every audit event in this request's lifecycle:
    /// `metadata["remediationRequestName"]` if present and non-empty,
    /// otherwise the object's `Uid` (spec.md §4.5).
    pub fn correlation_id(&self) -> CorrelationId {
        match self.spec.correlation_override() {
            Some(name) => CorrelationId(name.to_string()),
            None => CorrelationId(self.metadata.uid.0.clone()),
        }
    }
}
