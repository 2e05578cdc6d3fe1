//! Breaker-and-deadline wrapper around a [`DriverStore`]
//!
//! Every store call made by the dispatch core goes through here. A call is
//! refused with `StoreUnavailable` while the store breaker is open, bounded
//! by its deadline otherwise, and its outcome is fed back into the breaker.

use common::GeoPoint;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{DispatchError, Result};
use crate::store::{DriverStore, GeoMember, StoreResult};
use crate::timeout::{with_timeout, POINT_DEADLINE, SEARCH_DEADLINE};

/// Per-call budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreDeadlines {
    pub point: Duration,
    pub search: Duration,
}

impl Default for StoreDeadlines {
    fn default() -> Self {
        Self {
            point: POINT_DEADLINE,
            search: SEARCH_DEADLINE,
        }
    }
}

impl From<&config::ResilienceConfig> for StoreDeadlines {
    fn from(cfg: &config::ResilienceConfig) -> Self {
        Self {
            point: Duration::from_millis(cfg.point_timeout_ms),
            search: Duration::from_millis(cfg.search_timeout_ms),
        }
    }
}

/// Cheap to clone; clones share the store and the breaker
#[derive(Clone)]
pub struct GuardedStore {
    store: Arc<dyn DriverStore>,
    breaker: Arc<CircuitBreaker>,
    deadlines: StoreDeadlines,
}

impl GuardedStore {
    pub fn new(
        store: Arc<dyn DriverStore>,
        breaker: Arc<CircuitBreaker>,
        deadlines: StoreDeadlines,
    ) -> Self {
        Self {
            store,
            breaker,
            deadlines,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn deadlines(&self) -> StoreDeadlines {
        self.deadlines
    }

    async fn guard<T, F>(&self, label: &str, deadline: Duration, operation: F) -> Result<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        if !self.breaker.can_proceed() {
            return Err(DispatchError::StoreUnavailable);
        }

        match with_timeout(operation, deadline, label).await {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.breaker.record_failure();
                Err(err.into())
            }
            Err(timeout) => {
                self.breaker.record_failure();
                Err(timeout)
            }
        }
    }

    /// Guarded [`DriverStore::set_if_absent`]
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        self.guard("set-nx", self.deadlines.point, self.store.set_if_absent(key, value, ttl))
            .await
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.guard("set", self.deadlines.point, self.store.set_with_ttl(key, value, ttl))
            .await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.guard("get", self.deadlines.point, self.store.get(key)).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.guard("exists", self.deadlines.point, self.store.exists(key)).await
    }

    pub async fn del(&self, key: &str) -> Result<bool> {
        self.guard("del", self.deadlines.point, self.store.del(key)).await
    }

    pub async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        self.guard("hset", self.deadlines.point, self.store.hset(key, fields))
            .await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.guard("hgetall", self.deadlines.point, self.store.hgetall(key))
            .await
    }

    pub async fn geo_add(&self, key: &str, member: &str, point: GeoPoint) -> Result<()> {
        self.guard("geo-add", self.deadlines.point, self.store.geo_add(key, member, point))
            .await
    }

    /// Guarded [`DriverStore::geo_radius`], under the search deadline
    pub async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius_m: f64,
        count: usize,
    ) -> Result<Vec<GeoMember>> {
        self.guard(
            "geo-radius",
            self.deadlines.search,
            self.store.geo_radius(key, center, radius_m, count),
        )
        .await
    }

    /// Full scan of the geo set; used by maintenance only
    pub async fn geo_members(&self, key: &str) -> Result<Vec<String>> {
        self.guard("geo-members", self.deadlines.search, self.store.geo_members(key))
            .await
    }

    pub async fn geo_remove(&self, key: &str, member: &str) -> Result<bool> {
        self.guard("geo-remove", self.deadlines.point, self.store.geo_remove(key, member))
            .await
    }
}
