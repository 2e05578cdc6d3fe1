//! Per-driver lock and status flip
//!
//! A claim is three guarded calls: read the state hash, take
//! `lock:driver:{id}` with set-if-absent and a short TTL, then write
//! `status = BUSY`. The lock is never renewed. If the process dies between
//! lock and status write, the TTL frees the driver again.

use chrono::Utc;
use common::{DriverId, DriverStatus};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::guarded::GuardedStore;
use crate::keys;

/// Why a candidate was passed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAvailable,
    Locked,
    StoreError,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotAvailable => "not_available",
            SkipReason::Locked => "locked",
            SkipReason::StoreError => "store_error",
        }
    }
}

/// Result of one claim attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    Skipped(SkipReason),
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

/// Atomic driver claims: check availability, lock, then mark busy
#[derive(Clone)]
pub struct DriverClaims {
    store: GuardedStore,
    lock_ttl: Duration,
}

impl DriverClaims {
    pub fn new(store: GuardedStore, lock_ttl: Duration) -> Self {
        Self { store, lock_ttl }
    }

    /// Try to take the driver. Never fails: any error is a skip.
    pub async fn try_claim(&self, driver_id: &DriverId) -> ClaimOutcome {
        let outcome = self.claim_sequence(driver_id).await;
        if let ClaimOutcome::Skipped(reason) = outcome {
            observability::metrics::record_claim_skipped(reason.as_str());
        }
        outcome
    }

    async fn claim_sequence(&self, driver_id: &DriverId) -> ClaimOutcome {
        let id = driver_id.as_str();

        let state = match self.store.hgetall(&keys::driver_state(id)).await {
            Ok(state) => state,
            Err(e) => {
                warn!(driver_id = id, error = %e, "Reading driver state failed, skipping");
                return ClaimOutcome::Skipped(SkipReason::StoreError);
            }
        };
        let status = state
            .get(keys::STATUS_FIELD)
            .and_then(|s| DriverStatus::parse(s));
        if status != Some(DriverStatus::Available) {
            debug!(driver_id = id, ?status, "Driver not available");
            return ClaimOutcome::Skipped(SkipReason::NotAvailable);
        }

        let token = Uuid::new_v4().to_string();
        match self
            .store
            .set_if_absent(&keys::driver_lock(id), &token, Some(self.lock_ttl))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(driver_id = id, "Driver locked by another request");
                return ClaimOutcome::Skipped(SkipReason::Locked);
            }
            Err(e) => {
                warn!(driver_id = id, error = %e, "Acquiring driver lock failed, skipping");
                return ClaimOutcome::Skipped(SkipReason::StoreError);
            }
        }

        let fields = vec![
            (keys::STATUS_FIELD.to_string(), DriverStatus::Busy.as_str().to_string()),
            (
                keys::LAST_ASSIGNED_FIELD.to_string(),
                Utc::now().timestamp_millis().to_string(),
            ),
        ];
        if let Err(e) = self.store.hset(&keys::driver_state(id), fields).await {
            // The lock stays until its TTL so nobody else grabs a half-claimed driver
            warn!(driver_id = id, error = %e, "Marking driver busy failed, skipping");
            return ClaimOutcome::Skipped(SkipReason::StoreError);
        }

        info!(driver_id = id, "Driver claimed");
        ClaimOutcome::Claimed
    }

    /// Drop the lock and mark the driver available again. Both writes are
    /// attempted regardless of each other; failures are logged only.
    pub async fn release(&self, driver_id: &DriverId) {
        let id = driver_id.as_str();
        let lock_key = keys::driver_lock(id);
        let state_key = keys::driver_state(id);

        let (unlocked, reset) = tokio::join!(
            self.store.del(&lock_key),
            self.store.hset(
                &state_key,
                vec![(
                    keys::STATUS_FIELD.to_string(),
                    DriverStatus::Available.as_str().to_string(),
                )],
            ),
        );

        if let Err(e) = &unlocked {
            warn!(driver_id = id, error = %e, "Failed to delete driver lock");
        }
        if let Err(e) = &reset {
            warn!(driver_id = id, error = %e, "Failed to reset driver status");
        }
        if unlocked.is_ok() && reset.is_ok() {
            info!(driver_id = id, "Driver released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::guarded::StoreDeadlines;
    use crate::store::{DriverStore, InMemoryStore, MockDriverStore, StoreError};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn claims(store: Arc<dyn DriverStore>) -> DriverClaims {
        DriverClaims::new(
            GuardedStore::new(
                store,
                Arc::new(CircuitBreaker::new("store", CircuitBreakerConfig::default())),
                StoreDeadlines::default(),
            ),
            Duration::from_millis(5_000),
        )
    }

    async fn with_status(store: &InMemoryStore, id: &str, status: &str) {
        store
            .hset(
                &keys::driver_state(id),
                vec![(keys::STATUS_FIELD.to_string(), status.to_string())],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_claim_marks_busy_and_locks() {
        let store = Arc::new(InMemoryStore::new());
        with_status(&store, "d1", "AVAILABLE").await;
        let claims = claims(store.clone());
        let id = DriverId::new("d1");

        assert_eq!(claims.try_claim(&id).await, ClaimOutcome::Claimed);

        let state = store.hgetall("driver:state:d1").await.unwrap();
        assert_eq!(state["status"], "BUSY");
        assert!(state["lastAssignedAt"].parse::<i64>().unwrap() > 0);
        assert!(store.exists("lock:driver:d1").await.unwrap());

        assert_eq!(
            claims.try_claim(&id).await,
            ClaimOutcome::Skipped(SkipReason::NotAvailable)
        );
    }

    #[tokio::test]
    async fn test_unknown_or_missing_status_is_skipped() {
        let store = Arc::new(InMemoryStore::new());
        with_status(&store, "d1", "OFFLINE").await;
        let claims = claims(store);

        assert_eq!(
            claims.try_claim(&DriverId::new("d1")).await,
            ClaimOutcome::Skipped(SkipReason::NotAvailable)
        );
        assert_eq!(
            claims.try_claim(&DriverId::new("ghost")).await,
            ClaimOutcome::Skipped(SkipReason::NotAvailable)
        );
    }

    #[tokio::test]
    async fn test_existing_lock_is_skipped_without_status_change() {
        let store = Arc::new(InMemoryStore::new());
        with_status(&store, "d1", "AVAILABLE").await;
        store.set_if_absent("lock:driver:d1", "other", None).await.unwrap();
        let claims = claims(store.clone());

        assert_eq!(
            claims.try_claim(&DriverId::new("d1")).await,
            ClaimOutcome::Skipped(SkipReason::Locked)
        );
        let state = store.hgetall("driver:state:d1").await.unwrap();
        assert_eq!(state["status"], "AVAILABLE");
    }

    #[tokio::test]
    async fn test_store_failure_is_a_skip() {
        let mut mock = MockDriverStore::new();
        mock.expect_hgetall().returning(|_| {
            Ok(HashMap::from([("status".to_string(), "AVAILABLE".to_string())]))
        });
        mock.expect_set_if_absent()
            .returning(|_, _, _| Err(StoreError::Redis("timeout".into())));
        let claims = claims(Arc::new(mock));

        assert_eq!(
            claims.try_claim(&DriverId::new("d1")).await,
            ClaimOutcome::Skipped(SkipReason::StoreError)
        );
    }

    #[tokio::test]
    async fn test_release_restores_availability() {
        let store = Arc::new(InMemoryStore::new());
        with_status(&store, "d1", "AVAILABLE").await;
        let claims = claims(store.clone());
        let id = DriverId::new("d1");

        assert!(claims.try_claim(&id).await.is_claimed());
        claims.release(&id).await;

        assert!(!store.exists("lock:driver:d1").await.unwrap());
        assert!(claims.try_claim(&id).await.is_claimed());
    }

    #[tokio::test]
    async fn test_release_attempts_both_writes() {
        let mut mock = MockDriverStore::new();
        mock.expect_del()
            .times(1)
            .returning(|_| Err(StoreError::Redis("down".into())));
        mock.expect_hset()
            .withf(|key, fields| {
                key == "driver:state:d1" && fields == &vec![("status".to_string(), "AVAILABLE".to_string())]
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let claims = claims(Arc::new(mock));

        claims.release(&DriverId::new("d1")).await;
    }
}
