//! Health endpoints

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

/// Last known state of a dependency, e.g. the shared store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub healthy: bool,
    pub detail: Option<String>,
}

/// State behind the health routes.
///
/// Dependency entries are pushed by whoever watches them, e.g. the store
/// connect step at startup.
pub struct HealthState {
    pub service_name: String,
    pub environment: String,
    pub start_time: Instant,
    dependencies: RwLock<Vec<DependencyStatus>>,
}

impl HealthState {
    pub fn new(service_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            environment: environment.into(),
            start_time: Instant::now(),
            dependencies: RwLock::new(Vec::new()),
        }
    }

    /// Whole seconds since construction
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Insert or replace the entry for `status.name`
    pub fn update_dependency(&self, status: DependencyStatus) {
        let mut deps = self.dependencies.write();
        deps.retain(|d| d.name != status.name);
        deps.push(status);
    }

    /// Copy of the current dependency entries
    pub fn dependencies(&self) -> Vec<DependencyStatus> {
        self.dependencies.read().clone()
    }

    /// True when every recorded dependency is healthy, or none are recorded
    pub fn is_healthy(&self) -> bool {
        self.dependencies.read().iter().all(|d| d.healthy)
    }
}

/// Liveness check. Always 200 while the process serves requests.
pub async fn health_handler(State(state): State<Arc<HealthState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "env": state.environment,
    }))
}

/// Uptime plus per-dependency status. Answers 503 if any dependency is down.
pub async fn detailed_health_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<Value>) {
    let healthy = state.is_healthy();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": state.service_name,
        "env": state.environment,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "dependencies": state.dependencies(),
    });

    (status_code, Json(body))
}

/// `GET /health` and `GET /health/detailed`
pub fn health_routes(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/detailed", get(detailed_health_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_dependency_tracking() {
        let state = HealthState::new("orbit", "test");
        assert!(state.is_healthy());

        state.update_dependency(DependencyStatus {
            name: "store".to_string(),
            healthy: false,
            detail: Some("circuit open".to_string()),
        });
        assert!(!state.is_healthy());

        state.update_dependency(DependencyStatus {
            name: "store".to_string(),
            healthy: true,
            detail: None,
        });
        assert!(state.is_healthy());
        assert_eq!(state.dependencies().len(), 1);
    }

    #[tokio::test]
    async fn test_health_reports_env() {
        let app = health_routes(Arc::new(HealthState::new("orbit", "production")));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!({ "status": "ok", "env": "production" }));
    }

    #[tokio::test]
    async fn test_detailed_health_degraded() {
        let state = Arc::new(HealthState::new("orbit", "test"));
        state.update_dependency(DependencyStatus {
            name: "store".to_string(),
            healthy: false,
            detail: None,
        });

        let response = health_routes(state)
            .oneshot(Request::get("/health/detailed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
