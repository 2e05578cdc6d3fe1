//! HTTP API for dispatch

pub mod handlers;
pub mod routes;

pub use handlers::{ApiError, ApiState, StatsProvider};
pub use routes::create_router;
