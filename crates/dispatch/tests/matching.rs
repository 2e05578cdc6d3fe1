//! End-to-end behaviour of the matching engine over the in-memory store

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::GeoPoint;
use dispatch::seed::{seed_demo_drivers, seed_drivers, SeedDriver};
use dispatch::store::{DriverStore, GeoMember, InMemoryStore, StoreResult};
use dispatch::{keys, DispatchError, MatchingEngine};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const CENTROID: GeoPoint = GeoPoint {
    lat: 40.74234,
    lng: -73.97446,
};

fn config_with_threshold(threshold: u32) -> config::OrbitConfig {
    let mut config = config::OrbitConfig::default();
    config.resilience.failure_threshold = threshold;
    config
}

async fn seeded_engine() -> (Arc<InMemoryStore>, MatchingEngine) {
    let store = Arc::new(InMemoryStore::new());
    let engine = MatchingEngine::from_config(store.clone(), &config::OrbitConfig::default());
    seed_demo_drivers(engine.store(), keys::DEFAULT_GEO_KEY)
        .await
        .unwrap();
    (store, engine)
}

async fn status_of(store: &InMemoryStore, id: &str) -> String {
    store
        .hgetall(&keys::driver_state(id))
        .await
        .unwrap()
        .get("status")
        .cloned()
        .unwrap_or_default()
}

#[tokio::test]
async fn test_seeded_scenario_match_release_rematch() {
    let (store, engine) = seeded_engine().await;

    let first = engine.match_driver(CENTROID, None).await.unwrap();
    assert_eq!(first.driver_id.as_str(), "driver-3");
    assert_eq!(first.search_radius, 3_000);
    assert_eq!(first.attempt_count, 1);
    assert!(first.distance > 0.0 && first.distance < 3_000.0);
    assert_eq!(status_of(&store, "driver-3").await, "BUSY");

    // Next nearest available
    let second = engine.match_driver(CENTROID, None).await.unwrap();
    assert_eq!(second.driver_id.as_str(), "driver-2");

    engine.release_driver(&first.driver_id).await;
    assert_eq!(status_of(&store, "driver-3").await, "AVAILABLE");

    let again = engine.match_driver(CENTROID, None).await.unwrap();
    assert_eq!(again.driver_id.as_str(), "driver-3");

    let stats = engine.matching_breaker().stats();
    assert_eq!(stats.total_successes, 3);
    assert_eq!(stats.total_failures, 0);
}

#[tokio::test]
async fn test_busy_driver_is_never_matched() {
    let (_store, engine) = seeded_engine().await;
    // Standing on top of the busy driver
    let at_busy = GeoPoint::new(40.7614, -73.9776);

    for _ in 0..4 {
        let matched = engine.match_driver(at_busy, None).await.unwrap();
        assert_ne!(matched.driver_id.as_str(), "driver-4");
    }
    assert_matches!(
        engine.match_driver(at_busy, None).await,
        Err(DispatchError::NoDriverAvailable { radius_m: 10_000 })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_requests_single_driver_exactly_one_wins() {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(MatchingEngine::from_config(
        store.clone(),
        &config_with_threshold(1_000),
    ));
    let only = [SeedDriver {
        id: "solo",
        lat: 40.7128,
        lng: -74.0060,
        status: common::DriverStatus::Available,
    }];
    seed_drivers(engine.store(), keys::DEFAULT_GEO_KEY, &only)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.match_driver(GeoPoint::new(40.713, -74.006), None).await })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(m) => {
                assert_eq!(m.driver_id.as_str(), "solo");
                winners += 1;
            }
            Err(e) => assert_matches!(e, DispatchError::NoDriverAvailable { .. }),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(status_of(&store, "solo").await, "BUSY");
}

#[tokio::test]
async fn test_duplicate_key_rejected_without_mutation() {
    let (store, engine) = seeded_engine().await;

    engine.match_driver(CENTROID, Some("ride-42")).await.unwrap();

    let mut before = HashMap::new();
    for id in ["driver-1", "driver-2", "driver-3", "driver-4", "driver-5"] {
        let locked = store.exists(&keys::driver_lock(id)).await.unwrap();
        before.insert(id, (store.hgetall(&keys::driver_state(id)).await.unwrap(), locked));
    }

    assert_matches!(
        engine.match_driver(CENTROID, Some("ride-42")).await,
        Err(DispatchError::DuplicateRequest { key }) if key == "ride-42"
    );

    for (id, snapshot) in before {
        let locked = store.exists(&keys::driver_lock(id)).await.unwrap();
        let state = store.hgetall(&keys::driver_state(id)).await.unwrap();
        assert_eq!((state, locked), snapshot, "{} changed", id);
    }

    // Counted against the matching breaker
    assert_eq!(engine.matching_breaker().stats().total_failures, 1);
}

/// Records every radius query
struct CountingStore {
    inner: InMemoryStore,
    radii: Mutex<Vec<f64>>,
}

#[async_trait]
impl DriverStore for CountingStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.inner.set_with_ttl(key, value, ttl).await
    }
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }
    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.inner.del(key).await
    }
    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> StoreResult<()> {
        self.inner.hset(key, fields).await
    }
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }
    async fn geo_add(&self, key: &str, member: &str, point: GeoPoint) -> StoreResult<()> {
        self.inner.geo_add(key, member, point).await
    }
    async fn geo_radius(&self, key: &str, center: GeoPoint, radius_m: f64, count: usize) -> StoreResult<Vec<GeoMember>> {
        self.radii.lock().push(radius_m);
        self.inner.geo_radius(key, center, radius_m, count).await
    }
    async fn geo_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.geo_members(key).await
    }
    async fn geo_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.geo_remove(key, member).await
    }
}

#[tokio::test]
async fn test_empty_fleet_exhausts_after_five_passes() {
    let store = Arc::new(CountingStore {
        inner: InMemoryStore::new(),
        radii: Mutex::new(Vec::new()),
    });
    let engine = MatchingEngine::from_config(store.clone(), &config::OrbitConfig::default());

    assert_matches!(
        engine.match_driver(CENTROID, None).await,
        Err(DispatchError::NoDriverAvailable { radius_m: 10_000 })
    );
    assert_eq!(
        *store.radii.lock(),
        vec![3_000.0, 5_000.0, 7_000.0, 9_000.0, 10_000.0]
    );
}

#[tokio::test]
async fn test_far_driver_found_on_later_pass() {
    let store = Arc::new(InMemoryStore::new());
    let engine = MatchingEngine::from_config(store, &config::OrbitConfig::default());
    // Roughly 6 km north of the request
    let far = [SeedDriver {
        id: "far",
        lat: 40.7668,
        lng: -73.9744,
        status: common::DriverStatus::Available,
    }];
    seed_drivers(engine.store(), keys::DEFAULT_GEO_KEY, &far).await.unwrap();

    let matched = engine
        .match_driver(GeoPoint::new(40.7128, -73.9744), None)
        .await
        .unwrap();
    assert_eq!(matched.search_radius, 7_000);
    assert_eq!(matched.attempt_count, 3);
}

#[tokio::test]
async fn test_open_matching_breaker_fails_fast() {
    let store = Arc::new(InMemoryStore::new());
    let engine = MatchingEngine::from_config(store, &config::OrbitConfig::default());

    for _ in 0..5 {
        engine.match_driver(CENTROID, None).await.unwrap_err();
    }
    assert!(engine.matching_breaker().stats().is_open);
    assert_matches!(
        engine.match_driver(CENTROID, None).await,
        Err(DispatchError::MatchingUnavailable)
    );
}

/// Returns ten candidates instantly, then hangs on every point call
struct StallingStore;

#[async_trait]
impl DriverStore for StallingStore {
    async fn set_if_absent(&self, _: &str, _: &str, _: Option<Duration>) -> StoreResult<bool> {
        std::future::pending().await
    }
    async fn set_with_ttl(&self, _: &str, _: &str, _: Duration) -> StoreResult<()> {
        std::future::pending().await
    }
    async fn get(&self, _: &str) -> StoreResult<Option<String>> {
        std::future::pending().await
    }
    async fn exists(&self, _: &str) -> StoreResult<bool> {
        std::future::pending().await
    }
    async fn del(&self, _: &str) -> StoreResult<bool> {
        std::future::pending().await
    }
    async fn hset(&self, _: &str, _: Vec<(String, String)>) -> StoreResult<()> {
        std::future::pending().await
    }
    async fn hgetall(&self, _: &str) -> StoreResult<HashMap<String, String>> {
        std::future::pending().await
    }
    async fn geo_add(&self, _: &str, _: &str, _: GeoPoint) -> StoreResult<()> {
        std::future::pending().await
    }
    async fn geo_radius(&self, _: &str, _: GeoPoint, _: f64, count: usize) -> StoreResult<Vec<GeoMember>> {
        Ok((0..count)
            .map(|i| GeoMember {
                member: format!("driver-{}", i),
                distance_m: i as f64 * 10.0,
            })
            .collect())
    }
    async fn geo_members(&self, _: &str) -> StoreResult<Vec<String>> {
        std::future::pending().await
    }
    async fn geo_remove(&self, _: &str, _: &str) -> StoreResult<bool> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_worst_case_latency_is_bounded() {
    let engine = MatchingEngine::from_config(Arc::new(StallingStore), &config_with_threshold(10_000));

    let started = tokio::time::Instant::now();
    let result = engine.match_driver(CENTROID, Some("slow-ride")).await;
    let elapsed = started.elapsed();

    // The idempotency call degrades open, every claim read times out
    assert_matches!(result, Err(DispatchError::NoDriverAvailable { .. }));
    // 200 ms idempotency + 5 passes x 10 candidates x 200 ms
    assert!(elapsed >= Duration::from_millis(10_200), "elapsed {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(31_700), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_store_breaker_cuts_stalls_short() {
    let engine = MatchingEngine::from_config(Arc::new(StallingStore), &config::OrbitConfig::default());

    let started = tokio::time::Instant::now();
    let result = engine.match_driver(CENTROID, None).await;

    // Five timeouts open the store breaker; the next search is refused
    assert_matches!(result, Err(DispatchError::MatchingUnavailable));
    assert!(started.elapsed() <= Duration::from_millis(1_100));
    assert!(engine.store_breaker().stats().is_open);
}
