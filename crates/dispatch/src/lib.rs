//! Driver dispatch for Orbit
//!
//! Matches ride requests to the nearest available driver. The search
//! widens in fixed steps until a driver is claimed or the ceiling radius is
//! exhausted. Every call into the shared store goes through a
//! [`GuardedStore`], which adds a per-call deadline and a circuit breaker.
//! Claims are serialized across processes by the store's conditional set.
//!
//! ```ignore
//! let store = dispatch::store::create_store(&config.store).await?;
//! let engine = MatchingEngine::from_config(store, &config);
//! let matched = engine.match_driver(GeoPoint::new(40.75, -73.98), Some("req-1")).await?;
//! ```

pub mod circuit_breaker;
pub mod claim;
pub mod engine;
pub mod error;
pub mod guarded;
pub mod idempotency;
pub mod keys;
pub mod locator;
pub mod maintenance;
pub mod seed;
pub mod store;
pub mod timeout;

#[cfg(feature = "api")]
pub mod api;

pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use claim::{ClaimOutcome, DriverClaims, SkipReason};
pub use engine::{DriverMatch, MatchingEngine, SearchPolicy};
pub use error::{DispatchError, Result};
pub use guarded::{GuardedStore, StoreDeadlines};
pub use idempotency::IdempotencyGuard;
pub use locator::{Candidate, DriverLocator};
pub use store::{DriverStore, GeoMember, InMemoryStore, RedisStore, StoreError, StoreResult};
