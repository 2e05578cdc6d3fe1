//! Demo fleet for local runs

use chrono::Utc;
use common::{DriverStatus, GeoPoint};
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::guarded::GuardedStore;
use crate::keys;

/// Liveness given to seeded drivers so they survive the sweep for a while
pub const SEED_ALIVE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
pub struct SeedDriver {
    pub id: &'static str,
    pub lat: f64,
    pub lng: f64,
    pub status: DriverStatus,
}

/// Five drivers around Manhattan; `driver-4` is busy
pub const DEMO_DRIVERS: [SeedDriver; 5] = [
    SeedDriver { id: "driver-1", lat: 40.7128, lng: -74.0060, status: DriverStatus::Available },
    SeedDriver { id: "driver-2", lat: 40.7580, lng: -73.9855, status: DriverStatus::Available },
    SeedDriver { id: "driver-3", lat: 40.7489, lng: -73.9680, status: DriverStatus::Available },
    SeedDriver { id: "driver-4", lat: 40.7614, lng: -73.9776, status: DriverStatus::Busy },
    SeedDriver { id: "driver-5", lat: 40.7306, lng: -73.9352, status: DriverStatus::Available },
];

/// Write position, state hash and liveness marker for each driver
pub async fn seed_drivers(store: &GuardedStore, geo_key: &str, drivers: &[SeedDriver]) -> Result<usize> {
    let now = Utc::now().timestamp_millis().to_string();

    for driver in drivers {
        store
            .geo_add(geo_key, driver.id, GeoPoint::new(driver.lat, driver.lng))
            .await?;
        store
            .hset(
                &keys::driver_state(driver.id),
                vec![
                    (keys::STATUS_FIELD.to_string(), driver.status.as_str().to_string()),
                    (keys::LAST_ASSIGNED_FIELD.to_string(), now.clone()),
                ],
            )
            .await?;
        store
            .set_with_ttl(&keys::driver_alive(driver.id), "1", SEED_ALIVE_TTL)
            .await?;

        info!(
            driver_id = driver.id,
            lat = driver.lat,
            lng = driver.lng,
            status = %driver.status,
            "Seeded driver"
        );
    }

    Ok(drivers.len())
}

/// Load the fixed demo fleet around Manhattan. Returns how many were written.
pub async fn seed_demo_drivers(store: &GuardedStore, geo_key: &str) -> Result<usize> {
    seed_drivers(store, geo_key, &DEMO_DRIVERS).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::guarded::StoreDeadlines;
    use crate::store::{DriverStore, InMemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_seed_writes_everything() {
        let store = Arc::new(InMemoryStore::new());
        let guarded = GuardedStore::new(
            store.clone(),
            Arc::new(CircuitBreaker::new("store", CircuitBreakerConfig::default())),
            StoreDeadlines::default(),
        );

        let count = seed_demo_drivers(&guarded, keys::DEFAULT_GEO_KEY).await.unwrap();
        assert_eq!(count, 5);
        assert_eq!(store.geo_members(keys::DEFAULT_GEO_KEY).await.unwrap().len(), 5);
        assert!(store.exists("driver:alive:driver-3").await.unwrap());

        let busy = store.hgetall("driver:state:driver-4").await.unwrap();
        assert_eq!(busy["status"], "BUSY");
        let free = store.hgetall("driver:state:driver-1").await.unwrap();
        assert_eq!(free["status"], "AVAILABLE");
    }
}
