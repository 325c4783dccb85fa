//! Session bootstrap and selection routes.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::warn;
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::middleware::SessionId;
use crate::schemas::characters::CharacterResponse;
use crate::schemas::chat::{
    InitialDataResponse, SelectCharacterRequest, SelectModelRequest, SessionResponse,
};
use crate::schemas::models::ModelCatalogResponse;
use crate::schemas::{Ack, ApiResponse};
use crate::services::registry::ModelRegistry;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        get_initial_data,
        get_session,
        delete_session,
        reset_chat,
        select_chat_model,
        select_image_model,
        select_character
    ),
    components(schemas(
        InitialDataResponse,
        SessionResponse,
        SelectModelRequest,
        SelectCharacterRequest,
        Ack
    ))
)]
pub struct SessionApi;

/// Register session routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/get_initial_data", get(get_initial_data))
        .route("/session", get(get_session).delete(delete_session))
        .route("/reset_chat", post(reset_chat))
        .route("/select_chat_model", post(select_chat_model))
        .route("/select_image_model", post(select_image_model))
        .route("/select_character", post(select_character))
}

/// Installed models split by use; an unreachable runtime yields empty lists.
pub(crate) async fn catalog_or_empty(registry: &ModelRegistry) -> ModelCatalogResponse {
    match registry.catalog().await {
        Ok(catalog) => catalog.into(),
        Err(e) => {
            warn!(error = %e, "model catalog unavailable; returning empty lists");
            ModelCatalogResponse::default()
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/get_initial_data",
    tag = "session",
    responses(
        (status = 200, description = "Session, models and characters", body = ApiResponse<InitialDataResponse>),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn get_initial_data(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
) -> Result<Json<ApiResponse<InitialDataResponse>>, ServerError> {
    let session = state.sessions.get(&session_id.0).await?;
    let models = catalog_or_empty(&state.registry).await;
    let characters = state.characters.list().await?;
    let current_character = session
        .active_character_key
        .as_deref()
        .and_then(|key| characters.iter().find(|c| c.key == key))
        .map(|c| c.to_response());

    Ok(ApiResponse::ok(InitialDataResponse {
        session: session.to_response(),
        models,
        characters: characters.iter().map(|c| c.to_response()).collect(),
        current_character,
    }))
}

#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    responses(
        (status = 200, description = "Current session with history", body = ApiResponse<SessionResponse>),
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
) -> Result<Json<ApiResponse<SessionResponse>>, ServerError> {
    let session = state.sessions.get(&session_id.0).await?;
    Ok(ApiResponse::ok(session.to_response()))
}

#[utoipa::path(
    delete,
    path = "/api/session",
    tag = "session",
    responses(
        (status = 200, description = "Session ended", body = ApiResponse<Ack>),
        (status = 404, description = "Session not found"),
    )
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
) -> Result<Json<ApiResponse<Ack>>, ServerError> {
    state.sessions.remove(&session_id.0)?;
    Ok(ApiResponse::ok(Ack::new("Session ended")))
}

#[utoipa::path(
    post,
    path = "/api/reset_chat",
    tag = "session",
    responses(
        (status = 200, description = "History cleared", body = ApiResponse<Ack>),
    )
)]
pub async fn reset_chat(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
) -> Result<Json<ApiResponse<Ack>>, ServerError> {
    state.conversation.reset(&session_id.0).await?;
    Ok(ApiResponse::ok(Ack::new("Chat reset successfully")))
}

#[utoipa::path(
    post,
    path = "/api/select_chat_model",
    tag = "session",
    request_body = SelectModelRequest,
    responses(
        (status = 200, description = "Chat model selected", body = ApiResponse<SessionResponse>),
        (status = 400, description = "Empty model name"),
        (status = 404, description = "Model not installed"),
    )
)]
pub async fn select_chat_model(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Json(req): Json<SelectModelRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, ServerError> {
    req.validate()?;
    let session = state.conversation.select_chat_model(&session_id.0, &req.model).await?;
    Ok(ApiResponse::ok(session.to_response()))
}

#[utoipa::path(
    post,
    path = "/api/select_image_model",
    tag = "session",
    request_body = SelectModelRequest,
    responses(
        (status = 200, description = "Caption model selected", body = ApiResponse<SessionResponse>),
        (status = 400, description = "Empty model name"),
        (status = 404, description = "Model not installed"),
    )
)]
pub async fn select_image_model(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Json(req): Json<SelectModelRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, ServerError> {
    req.validate()?;
    let session = state.conversation.select_caption_model(&session_id.0, &req.model).await?;
    Ok(ApiResponse::ok(session.to_response()))
}

#[utoipa::path(
    post,
    path = "/api/select_character",
    tag = "session",
    request_body = SelectCharacterRequest,
    responses(
        (status = 200, description = "Character selected; history cleared", body = ApiResponse<CharacterResponse>),
        (status = 404, description = "Unknown character"),
    )
)]
pub async fn select_character(
    State(state): State<Arc<AppState>>,
    session_id: SessionId,
    Json(req): Json<SelectCharacterRequest>,
) -> Result<Json<ApiResponse<CharacterResponse>>, ServerError> {
    req.validate()?;
    let character = state.conversation.select_character(&session_id.0, &req.character).await?;
    Ok(ApiResponse::ok(character.to_response()))
}
