//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Session identity on every `/api` route
//! - Optional OpenAPI document (disable with `PERSONA_ENABLE_OPENAPI=false`)
//! - Health / heartbeat route

pub mod api;
pub mod doc;
mod health;

use axum::{Router, middleware};
use std::sync::Arc;
use tower::ServiceBuilder;

use crate::middleware::{cors, session, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = api::router(&state).layer(middleware::from_fn_with_state(
        state.clone(),
        session::session_middleware,
    ));

    let mut app = Router::new()
        .merge(health::router())
        .nest("/api", api_router);

    if state.config.enable_openapi {
        app = app.merge(doc::router());
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::middleware::trace::X_TRACE_ID;
    use crate::test_support::{MockRuntime, test_state};

    #[tokio::test]
    async fn openapi_document_lists_api_paths() {
        let app = build(test_state(MockRuntime::new()).await);
        let req = Request::builder().uri("/api-docs/openapi.json").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        for path in ["/api/send_message", "/api/characters/{key}", "/api/models/download", "/health"] {
            assert!(doc["paths"].get(path).is_some(), "missing {path}");
        }
    }

    #[tokio::test]
    async fn openapi_document_can_be_disabled() {
        let state = test_state(MockRuntime::new()).await;
        let mut config = (*state.config).clone();
        config.enable_openapi = false;
        let state = Arc::new(AppState { config: Arc::new(config), ..(*state).clone() });

        let req = Request::builder().uri("/api-docs/openapi.json").body(Body::empty()).unwrap();
        let resp = build(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn every_response_carries_a_trace_id() {
        let app = build(test_state(MockRuntime::new()).await);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.headers().get(X_TRACE_ID).is_some());
    }
}
