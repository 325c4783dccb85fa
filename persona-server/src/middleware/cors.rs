use crate::state::AppState;
use axum::http::{HeaderName, Method};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::session::X_SESSION_ID;
use super::trace::X_TRACE_ID;

/// CORS for the browser front-end.  Session and trace ids are exposed so the
/// client can read them back from responses.
pub fn cors_layer(state: Arc<AppState>) -> CorsLayer {
    let exposed = [HeaderName::from_static(X_SESSION_ID), HeaderName::from_static(X_TRACE_ID)];
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS];

    let origins: Vec<axum::http::HeaderValue> = state
        .config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        // Wildcard; credentials (the session cookie) can't be combined with it.
        CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods(methods)
            .expose_headers(exposed)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                HeaderName::from_static(X_SESSION_ID),
                HeaderName::from_static(X_TRACE_ID),
            ])
            .allow_methods(methods)
            .allow_credentials(true)
            .expose_headers(exposed)
    }
}
