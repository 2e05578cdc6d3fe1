//! Process-local store
//!
//! Single-process stand-in for Redis: same semantics for conditional set,
//! expiry, hashes and radius queries. Expired keys are dropped lazily when
//! touched. Expiry runs on the tokio clock so paused-time tests can drive it.

use async_trait::async_trait;
use common::GeoPoint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::traits::{DriverStore, GeoMember, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Geo(HashMap<String, GeoPoint>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Other(format!("WRONGTYPE operation against key '{}'", key))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the live (unexpired) entries
    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        f(&mut entries)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DriverStore for InMemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        Ok(self.with_entries(|entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            true
        }))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.with_entries(|entries| entries.contains_key(key)))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        Ok(self.with_entries(|entries| entries.remove(key).is_some()))
    }

    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> StoreResult<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Hash(hash) => {
                    hash.extend(fields);
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn geo_add(&self, key: &str, member: &str, point: GeoPoint) -> StoreResult<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Geo(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Geo(members) => {
                    members.insert(member.to_string(), point);
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius_m: f64,
        count: usize,
    ) -> StoreResult<Vec<GeoMember>> {
        self.with_entries(|entries| {
            let members = match entries.get(key).map(|e| &e.value) {
                None => return Ok(Vec::new()),
                Some(Value::Geo(members)) => members,
                Some(_) => return Err(wrong_type(key)),
            };

            let mut hits: Vec<GeoMember> = members
                .iter()
                .map(|(member, point)| GeoMember {
                    member: member.clone(),
                    distance_m: center.distance_m(point),
                })
                .filter(|hit| hit.distance_m <= radius_m)
                .collect();
            hits.sort_by(|a, b| {
                a.distance_m
                    .total_cmp(&b.distance_m)
                    .then_with(|| a.member.cmp(&b.member))
            });
            hits.truncate(count);
            Ok(hits)
        })
    }

    async fn geo_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.with_entries(|entries| match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::Geo(members)) => {
                let mut names: Vec<String> = members.keys().cloned().collect();
                names.sort();
                Ok(names)
            }
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn geo_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.with_entries(|entries| match entries.get_mut(key).map(|e| &mut e.value) {
            None => Ok(false),
            Some(Value::Geo(members)) => Ok(members.remove(member).is_some()),
            Some(_) => Err(wrong_type(key)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_and_expiry() {
        let store = InMemoryStore::new();
        let ttl = Some(Duration::from_millis(5_000));

        assert!(store.set_if_absent("lock:driver:a", "1", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:driver:a", "2", ttl).await.unwrap());
        assert_eq!(store.get("lock:driver:a").await.unwrap().as_deref(), Some("1"));

        tokio::time::advance(Duration::from_millis(5_001)).await;
        assert!(!store.exists("lock:driver:a").await.unwrap());
        assert!(store.set_if_absent("lock:driver:a", "3", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_fields_merge() {
        let store = InMemoryStore::new();
        store
            .hset("driver:state:a", vec![("status".into(), "AVAILABLE".into())])
            .await
            .unwrap();
        store
            .hset("driver:state:a", vec![("lastAssignedAt".into(), "1".into())])
            .await
            .unwrap();

        let hash = store.hgetall("driver:state:a").await.unwrap();
        assert_eq!(hash.len(), 2);
        assert_eq!(hash["status"], "AVAILABLE");
        assert!(store.hgetall("driver:state:missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_geo_radius_orders_and_limits() {
        let store = InMemoryStore::new();
        let center = GeoPoint::new(40.7128, -74.0060);
        store.geo_add("geo", "far", GeoPoint::new(40.7580, -73.9855)).await.unwrap();
        store.geo_add("geo", "near", GeoPoint::new(40.7130, -74.0062)).await.unwrap();
        store.geo_add("geo", "mid", GeoPoint::new(40.7200, -74.0000)).await.unwrap();

        let hits = store.geo_radius("geo", center, 3_000.0, 10).await.unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.member.as_str()).collect();
        assert_eq!(names, vec!["near", "mid"]);
        assert!(hits[0].distance_m < hits[1].distance_m);

        let limited = store.geo_radius("geo", center, 10_000.0, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].member, "near");
    }

    #[tokio::test]
    async fn test_geo_members_and_remove() {
        let store = InMemoryStore::new();
        store.geo_add("geo", "b", GeoPoint::new(1.0, 1.0)).await.unwrap();
        store.geo_add("geo", "a", GeoPoint::new(1.0, 1.0)).await.unwrap();

        assert_eq!(store.geo_members("geo").await.unwrap(), vec!["a", "b"]);
        assert!(store.geo_remove("geo", "a").await.unwrap());
        assert!(!store.geo_remove("geo", "a").await.unwrap());
        assert_eq!(store.geo_members("geo").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = InMemoryStore::new();
        store.set_with_ttl("k", "v", Duration::from_secs(10)).await.unwrap();
        assert!(store.hgetall("k").await.is_err());
        assert!(store.geo_add("k", "m", GeoPoint::new(0.0, 0.0)).await.is_err());
    }
}
