//! Session identity middleware.
//!
//! Reads the session token from the `x-session-id` header, falling back to
//! the `persona_session` cookie.  Unknown or missing tokens get a fresh
//! session.  The resolved id is handed to handlers as a [`SessionId`]
//! extension and echoed back in both the header and the cookie.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::ServerError;
use crate::state::AppState;

pub static X_SESSION_ID: &str = "x-session-id";
pub static SESSION_COOKIE: &str = "persona_session";

/// The caller's session id, resolved by [`session_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for SessionId {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionId>()
            .cloned()
            .ok_or_else(|| ServerError::Internal("session middleware is not installed".into()))
    }
}

fn token_from(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(X_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_owned());
    }
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_owned())
        .filter(|t| !t.is_empty())
}

pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = token_from(req.headers());
    let (id, created) = match state.sessions.resolve(token.as_deref()) {
        Ok(resolved) => resolved,
        Err(e) => return e.into_response(),
    };
    if created && token.is_some() {
        debug!(session_id = %id, "unknown session token; issued a new session");
    }
    req.extensions_mut().insert(SessionId(id.clone()));

    let mut response = next.run(req).await;
    // The handler may have ended the session; expire the cookie instead.
    let cookie = if state.sessions.contains(&id) {
        if let Ok(value) = HeaderValue::from_str(&id) {
            response.headers_mut().insert(X_SESSION_ID, value);
        }
        format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax")
    } else {
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
    };
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
    response
}
