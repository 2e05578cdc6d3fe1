//! Spatial lookups and location writes against the driver geo set

use common::{DriverId, GeoPoint};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::guarded::GuardedStore;
use crate::keys;

/// A driver near the search center
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub driver_id: DriverId,
    pub distance_m: f64,
}

/// Radius search over the geo index, filtered to drivers with a live heartbeat
#[derive(Clone)]
pub struct DriverLocator {
    store: GuardedStore,
    geo_key: String,
    alive_ttl: Duration,
}

impl DriverLocator {
    pub fn new(store: GuardedStore, geo_key: impl Into<String>, alive_ttl: Duration) -> Self {
        Self {
            store,
            geo_key: geo_key.into(),
            alive_ttl,
        }
    }

    pub fn geo_key(&self) -> &str {
        &self.geo_key
    }

    /// Up to `limit` drivers within `radius_m`, nearest first
    #[instrument(skip(self), fields(geo_key = %self.geo_key))]
    pub async fn find_nearby(
        &self,
        center: GeoPoint,
        radius_m: u32,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let hits = self
            .store
            .geo_radius(&self.geo_key, center, f64::from(radius_m), limit)
            .await?;

        debug!(count = hits.len(), "Nearby drivers");
        Ok(hits
            .into_iter()
            .map(|hit| Candidate {
                driver_id: DriverId::new(hit.member),
                distance_m: hit.distance_m,
            })
            .collect())
    }

    /// Move the driver in the geo set and refresh its liveness marker
    pub async fn update_location(&self, driver_id: &DriverId, point: GeoPoint) -> Result<()> {
        self.store
            .geo_add(&self.geo_key, driver_id.as_str(), point)
            .await?;
        self.store
            .set_with_ttl(&keys::driver_alive(driver_id.as_str()), "1", self.alive_ttl)
            .await?;

        debug!(driver_id = %driver_id, %point, "Driver location updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::guarded::StoreDeadlines;
    use crate::store::{DriverStore, InMemoryStore};
    use std::sync::Arc;

    fn locator(store: Arc<InMemoryStore>) -> DriverLocator {
        let store: Arc<dyn DriverStore> = store;
        DriverLocator::new(
            GuardedStore::new(
                store,
                Arc::new(CircuitBreaker::new("store", CircuitBreakerConfig::default())),
                StoreDeadlines::default(),
            ),
            keys::DEFAULT_GEO_KEY,
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_update_then_find() {
        let store = Arc::new(InMemoryStore::new());
        let locator = locator(store.clone());
        let center = GeoPoint::new(40.7128, -74.0060);

        locator
            .update_location(&DriverId::new("driver-1"), GeoPoint::new(40.7140, -74.0050))
            .await
            .unwrap();
        locator
            .update_location(&DriverId::new("driver-2"), GeoPoint::new(40.7306, -73.9866))
            .await
            .unwrap();

        let near = locator.find_nearby(center, 1_000, 10).await.unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].driver_id.as_str(), "driver-1");

        let all = locator.find_nearby(center, 5_000, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].distance_m <= all[1].distance_m);

        assert!(store.exists("driver:alive:driver-1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_marker_expires() {
        let store = Arc::new(InMemoryStore::new());
        let locator = locator(store.clone());

        locator
            .update_location(&DriverId::new("driver-1"), GeoPoint::new(40.0, -74.0))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(!store.exists("driver:alive:driver-1").await.unwrap());
        // Position stays until the maintenance sweep removes it
        assert_eq!(
            store.geo_members(keys::DEFAULT_GEO_KEY).await.unwrap(),
            vec!["driver-1"]
        );
    }
}
