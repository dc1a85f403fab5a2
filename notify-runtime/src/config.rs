//! Engine-wide configuration (spec.md §6's configuration table).
//!
//! `EngineConfig` is built programmatically, either via `Default` or by
//! `notify-controller`'s `main` reading a handful of environment variables;
//! there is no general-purpose flag/config-file framework here (out of
//! scope, spec.md §1).

use notify_core::model::RetryPolicySpec;
use std::time::Duration;

/// Circuit breaker tuning for one channel kind (spec.md §4.3).
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Initial cooldown once the breaker opens.
    pub initial_cooldown: Duration,
    /// Cooldown ceiling across successive open cycles.
    pub max_cooldown: Duration,
    /// Cooldown multiplier applied on each successive open cycle.
    pub cooldown_multiplier: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            initial_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
            cooldown_multiplier: 2.0,
        }
    }
}

/// Engine-wide configuration (spec.md §6).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of the reconciler worker pool.
    pub work_queue_workers: usize,
    /// Used when `spec.retryPolicy` is omitted from an admitted request.
    pub default_retry_policy: RetryPolicySpec,
    /// Breaker tuning shared across all channel kinds; spec.md §4.3 defines
    /// this per channel kind but gives a single set of defaults, so this
    /// engine applies one configuration to every channel's breaker.
    pub breaker: BreakerConfig,
    /// Cap for status error-text truncation (spec.md §4.4).
    pub status_error_max_bytes: usize,
    /// Audit emitter buffer capacity before producers block (spec.md §4.5, §5).
    pub audit_buffer_size: usize,
    /// Interval between automatic buffer flushes.
    pub audit_flush_interval: Duration,
    /// Default per-channel deliverer timeout (spec.md §5).
    pub channel_deliverer_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_queue_workers: 4,
            default_retry_policy: RetryPolicySpec::default(),
            breaker: BreakerConfig::default(),
            status_error_max_bytes: 1024,
            audit_buffer_size: 256,
            audit_flush_interval: Duration::from_secs(5),
            channel_deliverer_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Overlay a handful of environment variables onto the defaults, the
    /// closest thing to spec.md §6's configuration surface this engine
    /// implements without a flag-parsing framework.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("NOTIFY_WORK_QUEUE_WORKERS") {
            if let Ok(n) = v.parse() {
                cfg.work_queue_workers = n;
            }
        }
        if let Ok(v) = std::env::var("NOTIFY_BREAKER_THRESHOLD") {
            if let Ok(n) = v.parse() {
                cfg.breaker.failure_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("NOTIFY_STATUS_ERROR_MAX_BYTES") {
            if let Ok(n) = v.parse() {
                cfg.status_error_max_bytes = n;
            }
        }
        cfg
    }
}
