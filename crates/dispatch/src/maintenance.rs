//! Dead-driver sweep
//!
//! Drivers stop sending locations without telling anyone. Their liveness
//! marker expires, but the geo set keeps the position. The sweep removes
//! every geo member whose `driver:alive:{id}` is gone so searches stop
//! returning them.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::guarded::GuardedStore;
use crate::keys;

/// One pass over the geo set. Returns how many members were removed.
pub async fn cleanup_dead_drivers(store: &GuardedStore, geo_key: &str) -> Result<usize> {
    let members = store.geo_members(geo_key).await?;
    let mut removed = 0;

    for driver_id in &members {
        match store.exists(&keys::driver_alive(driver_id)).await {
            Ok(true) => {}
            Ok(false) => match store.geo_remove(geo_key, driver_id).await {
                Ok(_) => {
                    debug!(driver_id = %driver_id, "Removed dead driver");
                    removed += 1;
                }
                Err(e) => warn!(driver_id = %driver_id, error = %e, "Failed to remove dead driver"),
            },
            Err(e) => warn!(driver_id = %driver_id, error = %e, "Liveness check failed"),
        }
    }

    if removed > 0 {
        info!(scanned = members.len(), removed, "Dead driver sweep complete");
    }
    Ok(removed)
}

/// Run [`cleanup_dead_drivers`] every `every` until `shutdown` fires
pub fn spawn_cleanup_task(
    store: GuardedStore,
    geo_key: String,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Dead driver sweep stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = cleanup_dead_drivers(&store, &geo_key).await {
                        warn!(error = %e, "Dead driver sweep failed");
                    }
                }
            }
        }
    })
}
