//! Consecutive-failure circuit breaker
//!
//! CLOSED until `failure_threshold` failures arrive back to back, then OPEN
//! for `open_duration`. There is no timer: the first `can_proceed` after the
//! window closes the circuit again and the following calls decide its fate.
//! Reaching the threshold resets the consecutive counter, so a failing trial
//! call does not reopen the circuit on its own.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(10),
        }
    }
}

impl From<&config::ResilienceConfig> for CircuitBreakerConfig {
    fn from(cfg: &config::ResilienceConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold.max(1),
            open_duration: Duration::from_millis(cfg.open_duration_ms),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    open_until: Option<Instant>,
    open_until_wall: Option<DateTime<Utc>>,
}

/// Point-in-time view for `/stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub is_open: bool,
    pub failures: u32,
    pub open_until: Option<DateTime<Utc>>,
    pub total_failures: u64,
    pub total_successes: u64,
    pub error_rate: f64,
}

/// One instance per guarded dependency; share it behind an `Arc`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False while open. Closes the circuit once the open window has passed.
    pub fn can_proceed(&self) -> bool {
        let mut state = self.state.lock();
        match state.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                state.open_until = None;
                state.open_until_wall = None;
                info!(breaker = %self.name, "Circuit breaker closing after cool-down");
                true
            }
            None => true,
        }
    }

    /// Clears the consecutive failure count
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.total_successes += 1;
    }

    /// Counts a failure and opens the circuit once the threshold is reached.
    ///
    /// Opening records `dispatch_circuit_open_total` for this breaker.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        state.total_failures += 1;

        if state.consecutive_failures >= self.config.failure_threshold {
            let open_until_wall = Utc::now()
                + chrono::Duration::from_std(self.config.open_duration)
                    .unwrap_or_else(|_| chrono::Duration::zero());
            state.open_until = Some(Instant::now() + self.config.open_duration);
            state.open_until_wall = Some(open_until_wall);
            error!(
                breaker = %self.name,
                failures = state.consecutive_failures,
                open_until = %open_until_wall.to_rfc3339(),
                "Circuit breaker opened"
            );
            state.consecutive_failures = 0;
            observability::metrics::record_circuit_open(&self.name);
        }
    }

    /// Snapshot for reporting. Like [`CircuitBreaker::can_proceed`], this
    /// closes an expired circuit.
    pub fn stats(&self) -> BreakerStats {
        let is_open = !self.can_proceed();
        let state = self.state.lock();
        let total = state.total_failures + state.total_successes;
        BreakerStats {
            is_open,
            failures: state.consecutive_failures,
            open_until: state.open_until_wall,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
            error_rate: if total == 0 {
                0.0
            } else {
                state.total_failures as f64 / total as f64
            },
        }
    }

    /// Forget everything, including the totals
    pub fn reset(&self) {
        *self.state.lock() = BreakerState::default();
        info!(breaker = %self.name, "Circuit breaker manually reset");
    }
}
