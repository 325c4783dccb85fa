//! Request / response types for the `/api` surface.
//!
//! Every successful response is wrapped in [`ApiResponse`]; failures are
//! rendered by [`crate::error::ServerError`] with the same `success` flag.

pub mod characters;
pub mod chat;
pub mod models;

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Success envelope: `{"success": true, "data": ...}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

/// Payload for operations that only acknowledge success.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
