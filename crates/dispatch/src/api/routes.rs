//! HTTP routes for the dispatch API

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::*;

/// Create the dispatch router
///
/// Routes:
/// - POST /match                     - Match the nearest available driver
/// - POST /drivers/:driver_id/release - Release a claimed driver
/// - POST /drivers/:driver_id/location - Record a driver position
/// - GET  /stats                      - Breaker and connection stats
/// - POST /stats/reset                - Reset both breakers
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/match", post(match_driver))
        .route("/drivers/:driver_id/release", post(release_driver))
        .route("/drivers/:driver_id/location", post(update_location))
        .route("/stats", get(get_stats))
        .route("/stats/reset", post(reset_breakers))
        .with_state(state)
}
