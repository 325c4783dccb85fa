//! Conversation routes: text messages and image uploads.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use tracing::debug;
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::middleware::SessionId;
use crate::schemas::chat::{ImageReplyResponse, MessageResponse, SendMessageRequest};
use crate::schemas::ApiResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(send_message, upload_image),
    components(schemas(SendMessageRequest, MessageResponse, ImageReplyResponse))
)]
pub struct ChatApi;

/// Register conversation routes.  `max_upload` bounds the multipart body.
pub fn router(max_upload: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/send_message", post(send_message))
        .route(
            "/upload_image",
            // Headroom for the multipart framing around the file itself.
            post(upload_image).layer(DefaultBodyLimit::max(max_upload + 64 * 1024)),
        )
}

#[utoipa::path(
    post,
    path = "/api/send_message",
    tag = "chat",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Bot reply (may carry is_error=true)", body = ApiResponse<MessageResponse>),
        (status = 400, description = "Empty message or no character selected"),
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ServerError> {
    req.validate()?;
    let reply = state.conversation.send_text(&session_id.0, &req.message).await?;
    Ok(ApiResponse::ok(reply.to_response()))
}

#[utoipa::path(
    post,
    path = "/api/upload_image",
    tag = "chat",
    request_body(content_type = "multipart/form-data", description = "Image in the `file` field"),
    responses(
        (status = 200, description = "Caption and bot reply", body = ApiResponse<ImageReplyResponse>),
        (status = 400, description = "No file, not an image, too large, or no character selected"),
    )
)]
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<ImageReplyResponse>>, ServerError> {
    let max_bytes = state.config.max_upload_bytes();
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::Validation(format!("Failed to read multipart field: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_owned();
        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ServerError::Validation(format!("Failed to read file chunk: {e}")))?
        {
            bytes.extend_from_slice(&chunk);
            if bytes.len() > max_bytes {
                return Err(ServerError::Validation(format!(
                    "File too large: exceeds maximum of {}MB",
                    state.config.max_upload_mb
                )));
            }
        }
        debug!(file_name = %file_name, size_bytes = bytes.len(), "received image upload");
        upload = Some((file_name, bytes));
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| ServerError::Validation("No file uploaded".into()))?;
    let reply = state.conversation.send_image(&session_id.0, &bytes, &file_name).await?;
    let filename = std::path::Path::new(&file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_owned();

    Ok(ApiResponse::ok(ImageReplyResponse {
        filename,
        caption: reply.image_caption.clone(),
        reply: reply.to_response(),
    }))
}
