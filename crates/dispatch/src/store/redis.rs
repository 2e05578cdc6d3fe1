//! Redis backend
//!
//! Commands go through a cloned `ConnectionManager`, which multiplexes
//! one connection and reconnects on its own.

use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use common::GeoPoint;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::traits::{DriverStore, GeoMember, StoreResult};
use config::RedisConfig;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a managed connection; it reconnects on its own after drops.
    ///
    /// # Errors
    ///
    /// Fails if the first connection cannot be established.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let url = config.connection_url();
        info!(
            host = %config.host,
            port = config.port,
            db = config.db_index,
            from_url = config.url.is_some(),
            "Connecting to Redis"
        );

        let client = ::redis::Client::open(url.as_str())?;
        let conn = client.get_connection_manager().await?;

        info!("Redis connection ready");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl DriverStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn()).await?;
        Ok(reply.is_some())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.conn().get(key).await?)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.conn().exists(key).await?)
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let removed: i64 = self.conn().del(key).await?;
        Ok(removed > 0)
    }

    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.conn().hset_multiple::<_, _, _, ()>(key, &fields).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self.conn().hgetall(key).await?)
    }

    async fn geo_add(&self, key: &str, member: &str, point: GeoPoint) -> StoreResult<()> {
        ::redis::cmd("GEOADD")
            .arg(key)
            .arg(point.lng)
            .arg(point.lat)
            .arg(member)
            .query_async::<_, i64>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius_m: f64,
        count: usize,
    ) -> StoreResult<Vec<GeoMember>> {
        let hits: Vec<(String, f64)> = ::redis::cmd("GEORADIUS")
            .arg(key)
            .arg(center.lng)
            .arg(center.lat)
            .arg(radius_m)
            .arg("m")
            .arg("WITHDIST")
            .arg("COUNT")
            .arg(count)
            .arg("ASC")
            .query_async(&mut self.conn())
            .await?;

        Ok(hits
            .into_iter()
            .map(|(member, distance_m)| GeoMember { member, distance_m })
            .collect())
    }

    async fn geo_members(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self.conn().zrange(key, 0, -1).await?)
    }

    async fn geo_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let removed: i64 = self.conn().zrem(key, member).await?;
        Ok(removed > 0)
    }
}
