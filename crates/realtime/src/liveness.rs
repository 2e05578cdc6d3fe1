//! Heartbeat sweep
//!
//! On every tick a connection that has not answered the previous ping is
//! terminated; every other connection is marked suspect and pinged again.
//! A connection therefore survives one missed beat and is dropped on the
//! second, up to two intervals after it went quiet. Termination closes the
//! socket, and the connection's disconnect hook clears its subscriptions.

use parking_lot::Mutex;
use serde::Serialize;
use server::ConnectionPool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub terminated: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
}

/// Ping or evict every connection in `pool`
pub fn sweep(pool: &ConnectionPool) -> SweepReport {
    let mut report = SweepReport::default();

    for conn in pool.snapshot() {
        if !conn.is_alive() {
            info!(conn_id = conn.id(), "Terminating unresponsive connection");
            conn.terminate();
            observability::metrics::record_connection_terminated();
            report.terminated += 1;
            continue;
        }
        conn.mark_suspect();
        conn.ping();
        report.pinged += 1;
    }

    debug!(
        pinged = report.pinged,
        terminated = report.terminated,
        "Heartbeat sweep complete"
    );
    report
}

/// Counted from current connection state on every call
pub fn connection_stats(pool: &ConnectionPool) -> ConnectionStats {
    let connections = pool.snapshot();
    let alive = connections
        .iter()
        .filter(|conn| conn.is_alive() && conn.is_open())
        .count();
    ConnectionStats {
        total: connections.len(),
        alive,
        dead: connections.len() - alive,
    }
}

struct Running {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the periodic ping sweep over a [`ConnectionPool`].
///
/// A connection that has not answered the previous ping by the next sweep
/// is terminated.
pub struct LivenessMonitor {
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl LivenessMonitor {
    /// Sweep every `interval` once initialized
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start sweeping `pool`. A sweep already running is replaced.
    pub fn initialize(&self, pool: ConnectionPool) {
        let token = CancellationToken::new();
        let interval = self.interval;
        let stop = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep(&pool);
                    }
                }
            }
        });

        if let Some(previous) = self.running.lock().replace(Running { token, task }) {
            previous.token.cancel();
        }
        info!(interval_s = interval.as_secs(), "Heartbeat monitoring started");
    }

    /// Halt the sweep. No-op if not running.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.token.cancel();
            running.task.abort();
            info!("Heartbeat monitoring stopped");
        }
    }

    /// A sweep task is active
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
