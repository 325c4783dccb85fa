//! Health / heartbeat endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health), components(schemas(HealthResponse)))]
pub struct HealthApi;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: String,
    pub version: String,
    /// Whether the inference runtime answered a model listing.
    pub runtime_reachable: bool,
    pub active_sessions: usize,
}

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Always HTTP 200; an unreachable runtime is reported, not treated as failure.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthResponse)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        runtime_reachable: state.registry.list_running().await.is_ok(),
        active_sessions: state.sessions.len(),
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::{MockRuntime, test_state};

    #[tokio::test]
    async fn health_reports_version_and_runtime() {
        let Json(body) = get_health(State(test_state(MockRuntime::new()).await)).await;
        assert_eq!(body.status, "ok");
        assert!(!body.version.is_empty());
        assert!(body.runtime_reachable);
    }

    #[tokio::test]
    async fn health_stays_ok_when_runtime_is_down() {
        let Json(body) = get_health(State(test_state(MockRuntime::unreachable()).await)).await;
        assert_eq!(body.status, "ok");
        assert!(!body.runtime_reachable);
    }
}
