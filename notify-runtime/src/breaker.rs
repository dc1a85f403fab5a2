//! Per-channel-kind circuit breaker (spec.md §4.3).
//!
//! The breaker is process-wide and channel-scoped rather than
//! request-scoped (spec.md §5 "Idempotency of rapid create/delete"): a
//! `(namespace, name)` recycled across a delete/recreate gets a fresh
//! attempt log and correlation id, but the channel it talks to keeps
//! whatever health accounting the process has already learned.

use notify_core::model::ChannelKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    open_cycles: u32,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            open_until: None,
            open_cycles: 0,
        }
    }

    /// Advance `Open -> HalfOpen` once the cooldown has elapsed. Must be
    /// called before every read of `state` (spec.md §4.3 "probe time
    /// reached").
    fn poll_cooldown(&mut self, now: Instant) {
        if self.state == BreakerState::Open {
            if let Some(until) = self.open_until {
                if now >= until {
                    self.state = BreakerState::HalfOpen;
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.open_until = None;
        self.open_cycles = 0;
    }

    fn open(&mut self, cfg: &BreakerConfig, now: Instant) {
        self.open_cycles += 1;
        let factor = cfg.cooldown_multiplier.powi((self.open_cycles - 1) as i32);
        let cooldown = cfg
            .initial_cooldown
            .mul_f64(factor.max(1.0))
            .min(cfg.max_cooldown);
        self.state = BreakerState::Open;
        self.open_until = Some(now + cooldown);
    }

    fn record_transient_failure(&mut self, cfg: &BreakerConfig, now: Instant) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= cfg.failure_threshold {
                    self.open(cfg, now);
                }
            }
            BreakerState::Open => {
                // Shouldn't normally be reached (open short-circuits before
                // a deliverer call), but extend the cooldown defensively.
                self.open(cfg, now);
            }
            BreakerState::HalfOpen => {
                self.open(cfg, now);
            }
        }
    }

    fn record_permanent_failure(&mut self, cfg: &BreakerConfig, now: Instant) {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= cfg.failure_threshold {
                    self.open(cfg, now);
                }
            }
            BreakerState::HalfOpen => self.open(cfg, now),
            BreakerState::Open => {}
        }
    }
}

/// Process-wide registry of per-channel-kind breakers (spec.md §4.3, §9
/// "Global mutable state").
#[derive(Clone)]
pub struct BreakerRegistry {
    breakers: Arc<Mutex<HashMap<ChannelKind, Breaker>>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Returns the breaker's state as of now, advancing `Open -> HalfOpen`
    /// if the cooldown has elapsed.
    pub fn state(&self, channel: &ChannelKind) -> BreakerState {
        let now = Instant::now();
        let mut guard = self.breakers.lock();
        let breaker = guard.entry(channel.clone()).or_insert_with(Breaker::new);
        breaker.poll_cooldown(now);
        breaker.state
    }

    pub fn record_success(&self, channel: &ChannelKind) {
        let mut guard = self.breakers.lock();
        guard.entry(channel.clone()).or_insert_with(Breaker::new).record_success();
    }

    pub fn record_transient_failure(&self, channel: &ChannelKind) {
        let now = Instant::now();
        let mut guard = self.breakers.lock();
        guard
            .entry(channel.clone())
            .or_insert_with(Breaker::new)
            .record_transient_failure(&self.config, now);
    }

    pub fn record_permanent_failure(&self, channel: &ChannelKind) {
        let now = Instant::now();
        let mut guard = self.breakers.lock();
        guard
            .entry(channel.clone())
            .or_insert_with(Breaker::new)
            .record_permanent_failure(&self.config, now);
    }
}

/// The specific error string the orchestrator must carry for a breaker-open
/// short-circuit (spec.md §4.2).
pub fn breaker_open_message(channel: &ChannelKind) -> String {
    format!("{channel} circuit breaker is open (too many failures, preventing cascading failures)")
}
