//! Expanding-radius matching
//!
//! One request walks the radii `initial, initial + step, ...` capped at the
//! ceiling, queries up to `candidate_limit` drivers per radius and tries to
//! claim them strictly nearest first. The first claim wins. Candidates are
//! never tried in parallel and a candidate lost to a racing request is not
//! retried within the same pass.
//!
//! # Latency bound
//!
//! Requests carry no overall deadline; each store call has its own. With
//! the default budgets a request spends at most, per radius, one search
//! (300 ms) plus three point calls (200 ms each) for each of 10 candidates,
//! i.e. 6.3 s, and at most 5 radii: 31.5 s in the worst case, plus one
//! idempotency call. In practice the store breaker opens after five
//! consecutive failures and the remaining calls fail immediately.

use common::{DriverId, GeoPoint};
use observability::metrics::{MatchOutcome, MatchTimer};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::claim::DriverClaims;
use crate::error::{DispatchError, Result};
use crate::guarded::{GuardedStore, StoreDeadlines};
use crate::idempotency::IdempotencyGuard;
use crate::locator::DriverLocator;
use crate::store::DriverStore;

/// Radius schedule and per-radius fan-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPolicy {
    pub initial_radius_m: u32,
    pub radius_step_m: u32,
    pub max_radius_m: u32,
    pub candidate_limit: usize,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            initial_radius_m: 3_000,
            radius_step_m: 2_000,
            max_radius_m: 10_000,
            candidate_limit: 10,
        }
    }
}

impl From<&config::MatchingConfig> for SearchPolicy {
    fn from(cfg: &config::MatchingConfig) -> Self {
        Self {
            initial_radius_m: cfg.initial_radius_m,
            radius_step_m: cfg.radius_step_m,
            max_radius_m: cfg.max_radius_m,
            candidate_limit: cfg.candidate_limit,
        }
    }
}

impl SearchPolicy {
    /// Strictly increasing radii. The last step is clamped to the ceiling,
    /// so the ceiling itself is always searched.
    pub fn radii(&self) -> Vec<u32> {
        let ceiling = self.max_radius_m.max(self.initial_radius_m);
        let step = self.radius_step_m.max(1);

        let mut radii = Vec::new();
        let mut radius = self.initial_radius_m;
        loop {
            radii.push(radius);
            if radius >= ceiling {
                break;
            }
            radius = radius.saturating_add(step).min(ceiling);
        }
        radii
    }
}

/// Result of a successful match
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverMatch {
    pub driver_id: DriverId,
    /// Meters from the request point
    pub distance: f64,
    /// Radius at which the driver was found
    pub search_radius: u32,
    /// 1-based radius pass
    pub attempt_count: u32,
}

/// Finds and claims the nearest available driver for a pickup point.
///
/// All store traffic goes through the guarded store; the matching breaker
/// wraps each whole request.
pub struct MatchingEngine {
    breaker: Arc<CircuitBreaker>,
    store: GuardedStore,
    locator: DriverLocator,
    claims: DriverClaims,
    idempotency: IdempotencyGuard,
    policy: SearchPolicy,
    idempotency_ttl: Duration,
}

impl MatchingEngine {
    pub fn new(
        store: GuardedStore,
        breaker: Arc<CircuitBreaker>,
        locator: DriverLocator,
        claims: DriverClaims,
        policy: SearchPolicy,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            breaker,
            idempotency: IdempotencyGuard::new(store.clone()),
            store,
            locator,
            claims,
            policy,
            idempotency_ttl,
        }
    }

    /// Wire up both breakers, the guarded store and the sub-components
    pub fn from_config(store: Arc<dyn DriverStore>, config: &config::OrbitConfig) -> Self {
        let breaker_config = CircuitBreakerConfig::from(&config.resilience);
        let store_breaker = Arc::new(CircuitBreaker::new("store", breaker_config.clone()));
        let matching_breaker = Arc::new(CircuitBreaker::new("matching", breaker_config));

        let guarded = GuardedStore::new(
            store,
            store_breaker,
            StoreDeadlines::from(&config.resilience),
        );
        let locator = DriverLocator::new(
            guarded.clone(),
            config.store.geo_key.clone(),
            Duration::from_secs(config.drivers.alive_ttl_seconds),
        );
        let claims = DriverClaims::new(
            guarded.clone(),
            Duration::from_millis(config.matching.lock_ttl_ms),
        );

        Self::new(
            guarded,
            matching_breaker,
            locator,
            claims,
            SearchPolicy::from(&config.matching),
            Duration::from_secs(config.matching.idempotency_ttl_seconds),
        )
    }

    /// Breaker around whole match requests
    pub fn matching_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Breaker around individual store calls
    pub fn store_breaker(&self) -> &Arc<CircuitBreaker> {
        self.store.breaker()
    }

    pub fn store(&self) -> &GuardedStore {
        &self.store
    }

    pub fn locator(&self) -> &DriverLocator {
        &self.locator
    }

    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.idempotency
    }

    pub fn policy(&self) -> &SearchPolicy {
        &self.policy
    }

    /// Claim the nearest available driver to `point`.
    ///
    /// Coordinates are expected to be validated by the caller.
    #[instrument(skip(self), fields(lat = point.lat, lng = point.lng))]
    pub async fn match_driver(&self, point: GeoPoint, request_key: Option<&str>) -> Result<DriverMatch> {
        let mut timer = MatchTimer::start();

        if !self.breaker.can_proceed() {
            warn!("Matching circuit open, rejecting request");
            timer.set_outcome(MatchOutcome::Unavailable);
            return Err(DispatchError::MatchingUnavailable);
        }

        if let Some(key) = request_key {
            if let Err(e) = self.idempotency.ensure_idempotent(key, self.idempotency_ttl).await {
                // Duplicates count against the breaker as a load signal
                self.breaker.record_failure();
                timer.set_outcome(MatchOutcome::Duplicate);
                return Err(e);
            }
        }

        match self.search(point).await {
            Ok(Some(matched)) => {
                self.breaker.record_success();
                timer.set_outcome(MatchOutcome::Matched);
                info!(
                    driver_id = %matched.driver_id,
                    distance_m = matched.distance,
                    radius_m = matched.search_radius,
                    attempt = matched.attempt_count,
                    "Driver matched"
                );
                Ok(matched)
            }
            Ok(None) => {
                self.breaker.record_failure();
                timer.set_outcome(MatchOutcome::NoDriver);
                warn!(radius_m = self.policy.max_radius_m, "No driver available");
                Err(DispatchError::NoDriverAvailable {
                    radius_m: self.policy.max_radius_m,
                })
            }
            Err(e) if e.is_dependency_failure() => {
                self.breaker.record_failure();
                timer.set_outcome(MatchOutcome::Unavailable);
                error!(error = %e, "Store dependency failed during matching");
                Err(DispatchError::MatchingUnavailable)
            }
            Err(e) => {
                self.breaker.record_failure();
                error!(error = %e, "Matching failed");
                Err(e)
            }
        }
    }

    /// Radius loop. `None` once every radius is exhausted.
    async fn search(&self, point: GeoPoint) -> Result<Option<DriverMatch>> {
        for (pass, radius_m) in self.policy.radii().into_iter().enumerate() {
            let attempt = pass as u32 + 1;
            let candidates = self
                .locator
                .find_nearby(point, radius_m, self.policy.candidate_limit)
                .await?;
            debug!(attempt, radius_m, candidates = candidates.len(), "Search pass");

            for candidate in candidates {
                if self.claims.try_claim(&candidate.driver_id).await.is_claimed() {
                    return Ok(Some(DriverMatch {
                        driver_id: candidate.driver_id,
                        distance: candidate.distance_m,
                        search_radius: radius_m,
                        attempt_count: attempt,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Free a claimed driver. Never fails; problems are logged.
    pub async fn release_driver(&self, driver_id: &DriverId) {
        self.claims.release(driver_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_radii_clamp_to_ceiling() {
        assert_eq!(
            SearchPolicy::default().radii(),
            vec![3_000, 5_000, 7_000, 9_000, 10_000]
        );
    }

    #[test]
    fn test_radii_edge_cases() {
        let exact = SearchPolicy {
            initial_radius_m: 1_000,
            radius_step_m: 1_000,
            max_radius_m: 3_000,
            candidate_limit: 10,
        };
        assert_eq!(exact.radii(), vec![1_000, 2_000, 3_000]);

        let single = SearchPolicy {
            initial_radius_m: 5_000,
            radius_step_m: 2_000,
            max_radius_m: 5_000,
            candidate_limit: 10,
        };
        assert_eq!(single.radii(), vec![5_000]);

        let zero_step = SearchPolicy {
            radius_step_m: 0,
            ..exact
        };
        assert_eq!(zero_step.radii().len(), 2_001);
    }

    #[test]
    fn test_match_serializes_camel_case() {
        let m = DriverMatch {
            driver_id: DriverId::new("driver-1"),
            distance: 12.5,
            search_radius: 3_000,
            attempt_count: 1,
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["driverId"], "driver-1");
        assert_eq!(json["searchRadius"], 3_000);
        assert_eq!(json["attemptCount"], 1);
    }
}
