//! Capability contract the dispatch core needs from its shared store

use async_trait::async_trait;
use common::GeoPoint;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Store error: {0}")]
    Other(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Redis(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One hit from a radius query
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMember {
    pub member: String,
    pub distance_m: f64,
}

/// Primitives of a key/value store with expiry, hashes and a geo index.
///
/// `set_if_absent` must be atomic: it is the only cross-process mutual
/// exclusion in the system.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DriverStore: Send + Sync {
    /// Set `key` only if it does not exist. Returns whether the set happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool>;

    /// Overwrite `key` and set its expiry
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Returns whether a key was removed
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Write `fields` into the hash at `key`, creating it if needed
    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> StoreResult<()>;

    /// Empty map when the key is absent
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Add or move `member` in the geo index
    async fn geo_add(&self, key: &str, member: &str, point: GeoPoint) -> StoreResult<()>;

    /// Up to `count` members within `radius_m`, nearest first
    async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius_m: f64,
        count: usize,
    ) -> StoreResult<Vec<GeoMember>>;

    /// Every member of the geo index, in no particular order
    async fn geo_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Returns whether `member` was in the index
    async fn geo_remove(&self, key: &str, member: &str) -> StoreResult<bool>;
}
