//! Shared store backends

mod memory;
mod redis;
mod traits;

pub use self::redis::RedisStore;
pub use memory::InMemoryStore;
pub use traits::*;

#[cfg(test)]
pub use traits::MockDriverStore;

use config::{StoreConfig, StoreKind};
use std::sync::Arc;
use tracing::info;

/// Build the backend selected by `store.type`
pub async fn create_store(config: &StoreConfig) -> StoreResult<Arc<dyn DriverStore>> {
    match config.store_type {
        StoreKind::Memory => {
            info!("Creating in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreKind::Redis => {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| StoreError::Other("Redis config required for Redis store".into()))?;
            let store = RedisStore::connect(redis).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_store(&StoreConfig::default()).await.unwrap();
        assert!(!store.exists("anything").await.unwrap());
    }

    #[tokio::test]
    async fn test_redis_without_section_fails() {
        let config = StoreConfig {
            store_type: StoreKind::Redis,
            ..StoreConfig::default()
        };
        assert!(create_store(&config).await.is_err());
    }
}
