//! Prometheus exporter and the metric names shared by Orbit crates
//!
//! Without an installed recorder every helper here is a no-op, so library
//! code can record unconditionally.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

pub const MATCH_TOTAL: &str = "dispatch_match_total";
pub const MATCH_DURATION: &str = "dispatch_match_duration_seconds";
pub const CLAIM_SKIPPED_TOTAL: &str = "dispatch_claim_skipped_total";
pub const CIRCUIT_OPEN_TOTAL: &str = "dispatch_circuit_open_total";
pub const PUBLISHED_TOTAL: &str = "realtime_published_total";
pub const CONNECTIONS_TERMINATED_TOTAL: &str = "realtime_connections_terminated_total";
pub const ACTIVE_CONNECTIONS: &str = "realtime_active_connections";
pub const FRAMES_DROPPED_TOTAL: &str = "realtime_frames_dropped_total";

/// Start the Prometheus exporter; metrics are served at `/metrics`.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Terminal outcome of one match request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched,
    NoDriver,
    Duplicate,
    Unavailable,
    Failed,
}

impl MatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOutcome::Matched => "matched",
            MatchOutcome::NoDriver => "no_driver",
            MatchOutcome::Duplicate => "duplicate",
            MatchOutcome::Unavailable => "unavailable",
            MatchOutcome::Failed => "failed",
        }
    }
}

/// Records `dispatch_match_total` and the match latency when dropped.
///
/// ```ignore
/// let mut timer = MatchTimer::start();
/// let result = engine.match_driver(point, None).await;
/// timer.set_outcome(MatchOutcome::Matched);
/// ```
pub struct MatchTimer {
    start: Instant,
    outcome: MatchOutcome,
}

impl MatchTimer {
    /// Outcome defaults to `Failed` until set
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            outcome: MatchOutcome::Failed,
        }
    }

    pub fn set_outcome(&mut self, outcome: MatchOutcome) {
        self.outcome = outcome;
    }
}

impl Drop for MatchTimer {
    fn drop(&mut self) {
        let outcome = self.outcome.as_str();
        counter!(MATCH_TOTAL, "outcome" => outcome).increment(1);
        histogram!(MATCH_DURATION, "outcome" => outcome).record(self.start.elapsed().as_secs_f64());
    }
}

/// A candidate was passed over during the claim sequence
pub fn record_claim_skipped(reason: &'static str) {
    counter!(CLAIM_SKIPPED_TOTAL, "reason" => reason).increment(1);
}

/// A breaker transitioned to open
pub fn record_circuit_open(breaker: &str) {
    counter!(CIRCUIT_OPEN_TOTAL, "breaker" => breaker.to_string()).increment(1);
}

/// Frames handed to subscribers by one publish
pub fn record_published(delivered: usize) {
    counter!(PUBLISHED_TOTAL).increment(delivered as u64);
}

/// An outbound frame was discarded because the connection's queue was full
pub fn record_frame_dropped() {
    counter!(FRAMES_DROPPED_TOTAL).increment(1);
}

/// The liveness sweep dropped a connection that missed its ping
pub fn record_connection_terminated() {
    counter!(CONNECTIONS_TERMINATED_TOTAL).increment(1);
}

/// Current number of attached WebSocket connections
pub fn set_active_connections(count: usize) {
    gauge!(ACTIVE_CONNECTIONS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_without_recorder() {
        // No recorder installed: all of these must be silent no-ops
        record_claim_skipped("lock_held");
        record_circuit_open("store");
        record_published(3);
        record_frame_dropped();
        record_connection_terminated();
        set_active_connections(2);

        let mut timer = MatchTimer::start();
        timer.set_outcome(MatchOutcome::NoDriver);
        drop(timer);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(MatchOutcome::Matched.as_str(), "matched");
        assert_eq!(MatchOutcome::NoDriver.as_str(), "no_driver");
        assert_eq!(MatchOutcome::Unavailable.as_str(), "unavailable");
    }
}
