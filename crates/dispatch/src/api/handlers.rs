//! HTTP API handlers for dispatch

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::{DriverId, GeoPoint};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::engine::{DriverMatch, MatchingEngine};
use crate::error::DispatchError;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Extra section for `/stats`, e.g. live connection counts
pub trait StatsProvider: Send + Sync {
    fn section(&self) -> &'static str;
    fn stats(&self) -> serde_json::Value;
}

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<MatchingEngine>,
    pub extra_stats: Vec<Arc<dyn StatsProvider>>,
}

impl ApiState {
    pub fn new(engine: Arc<MatchingEngine>) -> Self {
        Self {
            engine,
            extra_stats: Vec::new(),
        }
    }

    /// Append `provider`'s section to `/stats`
    pub fn with_stats(mut self, provider: Arc<dyn StatsProvider>) -> Self {
        self.extra_stats.push(provider);
        self
    }
}

/// Error body: `{"success": false, "error": {"code", "message"}}`
#[derive(Debug)]
pub struct ApiError(pub DispatchError);

impl ApiError {
    /// HTTP status for the wrapped error
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
            DispatchError::DuplicateRequest { .. } => StatusCode::CONFLICT,
            DispatchError::NoDriverAvailable { .. } => StatusCode::NOT_FOUND,
            DispatchError::MatchingUnavailable | DispatchError::StoreUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(DispatchError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self.0 {
            // Internal details stay in the logs
            DispatchError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let body = json!({
            "success": false,
            "error": {
                "code": self.0.code(),
                "message": message,
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub lat: f64,
    pub lng: f64,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub success: bool,
    #[serde(flatten)]
    pub matched: DriverMatch,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub lat: f64,
    pub lng: f64,
}

/// Match the nearest available driver
///
/// The idempotency key comes from the body or the `Idempotency-Key` header;
/// the body wins when both are present.
pub async fn match_driver(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<MatchRequest>, JsonRejection>,
) -> Result<Json<MatchResponse>, ApiError> {
    let Json(req) = body?;
    let point = GeoPoint::validated(req.lat, req.lng).map_err(DispatchError::from)?;

    let key = req.idempotency_key.filter(|k| !k.is_empty()).or_else(|| {
        headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    });

    let matched = state.engine.match_driver(point, key.as_deref()).await?;
    Ok(Json(MatchResponse {
        success: true,
        matched,
    }))
}

/// Release a claimed driver. Always succeeds from the caller's view.
pub async fn release_driver(
    State(state): State<ApiState>,
    Path(driver_id): Path<String>,
) -> Json<serde_json::Value> {
    let driver_id = DriverId::new(driver_id);
    state.engine.release_driver(&driver_id).await;
    Json(json!({
        "success": true,
        "driverId": driver_id,
    }))
}

/// Record a driver position and refresh its liveness
pub async fn update_location(
    State(state): State<ApiState>,
    Path(driver_id): Path<String>,
    body: Result<Json<LocationRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(req) = body?;
    if driver_id.trim().is_empty() {
        return Err(DispatchError::Validation("driver id must not be empty".into()).into());
    }
    let point = GeoPoint::validated(req.lat, req.lng).map_err(DispatchError::from)?;

    let driver_id = DriverId::new(driver_id);
    state.engine.locator().update_location(&driver_id, point).await?;
    Ok(Json(json!({
        "success": true,
        "driverId": driver_id,
    })))
}

/// Breaker stats plus any registered extra sections
pub async fn get_stats(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let mut body = json!({
        "success": true,
        "breakers": {
            "store": state.engine.store_breaker().stats(),
            "matching": state.engine.matching_breaker().stats(),
        }
    });
    if let Some(map) = body.as_object_mut() {
        for provider in &state.extra_stats {
            map.insert(provider.section().to_string(), provider.stats());
        }
    }
    Json(body)
}

/// `POST /stats/reset`: close both breakers and clear their counters
pub async fn reset_breakers(State(state): State<ApiState>) -> Json<serde_json::Value> {
    state.engine.store_breaker().reset();
    state.engine.matching_breaker().reset();
    info!("Circuit breakers reset via API");
    Json(json!({ "success": true }))
}
