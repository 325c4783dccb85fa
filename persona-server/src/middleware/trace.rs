use crate::error::ServerError;
use crate::state::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::{BodyExt, Limited, LengthLimitError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

pub static X_TRACE_ID: &str = "x-trace-id";

/// JSON request bodies up to this size are logged verbatim.
const LOGGED_BODY_LIMIT: usize = 1024;

/// Largest JSON request body buffered; anything bigger is answered with 413.
pub const MAX_JSON_BODY: usize = 1024 * 1024;

pub async fn trace_middleware(
    State(_state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
    );

    async move {
        info!("→ request started");
        let trace_header = HeaderValue::from_str(&trace_id.to_string()).ok();

        let (parts, body) = req.into_parts();
        // Only JSON bodies are buffered; uploads and streams pass through untouched.
        let body = if is_json(&parts.headers) {
            buffer_and_log(body).await.map(Body::from)
        } else {
            Ok(body)
        };

        let mut response = match body {
            Ok(body) => {
                let mut req = Request::from_parts(parts, body);
                if let Some(value) = &trace_header {
                    req.headers_mut().insert(X_TRACE_ID, value.clone());
                }
                next.run(req).await
            }
            Err(e) => e.into_response(),
        };
        if let Some(value) = trace_header {
            response.headers_mut().insert(X_TRACE_ID, value);
        }

        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "← response finished"
        );
        response
    }
    .instrument(span)
    .await
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"))
}

/// Read a JSON body of at most [`MAX_JSON_BODY`] bytes.
async fn buffer_and_log(body: Body) -> Result<Bytes, ServerError> {
    let bytes = match Limited::new(body, MAX_JSON_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(limit = MAX_JSON_BODY, "request body rejected: over limit");
            return Err(ServerError::PayloadTooLarge(format!(
                "request body exceeds {MAX_JSON_BODY} bytes"
            )));
        }
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return Err(ServerError::Validation(format!("failed to read request body: {e}")));
        }
    };
    if bytes.len() <= LOGGED_BODY_LIMIT {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            info!(body = %text, "request body");
        }
    } else {
        info!(size = bytes.len(), "request body [skipped]");
    }
    Ok(bytes)
}

#[cfg(test)]
mod test {
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::*;
    use crate::routes;
    use crate::test_support::{MockRuntime, test_state};

    fn json_post(body: Body) -> Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/send_message")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn oversized_json_body_is_rejected_before_the_handler() {
        let app = routes::build(test_state(MockRuntime::new()).await);

        let payload = format!(r#"{{"message":"{}"}}"#, "a".repeat(MAX_JSON_BODY));
        let resp = app.oneshot(json_post(Body::from(payload))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(resp.headers().get(X_TRACE_ID).is_some());

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "payload_too_large");
    }

    #[tokio::test]
    async fn broken_json_body_stream_is_a_bad_request() {
        let app = routes::build(test_state(MockRuntime::new()).await);
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(br#"{"message":"#)),
            Err(std::io::Error::other("connection reset")),
        ];
        let body = Body::from_stream(futures::stream::iter(chunks));

        let resp = app.oneshot(json_post(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().unwrap().contains("failed to read request body"));
    }
}
