//! Character CRUD routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::schemas::characters::{CharacterResponse, CreateCharacterRequest, UpdateCharacterRequest};
use crate::schemas::{Ack, ApiResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_characters, create_character, get_character, update_character, delete_character),
    components(schemas(CharacterResponse, CreateCharacterRequest, UpdateCharacterRequest))
)]
pub struct CharactersApi;

/// Register character routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/characters", get(list_characters).post(create_character))
        .route(
            "/characters/{key}",
            get(get_character).put(update_character).delete(delete_character),
        )
}

#[utoipa::path(
    get,
    path = "/api/characters",
    tag = "characters",
    responses(
        (status = 200, description = "Built-ins first, then custom characters", body = ApiResponse<Vec<CharacterResponse>>),
    )
)]
pub async fn list_characters(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<CharacterResponse>>>, ServerError> {
    let characters = state.characters.list().await?;
    Ok(ApiResponse::ok(characters.iter().map(|c| c.to_response()).collect()))
}

#[utoipa::path(
    post,
    path = "/api/characters",
    tag = "characters",
    request_body = CreateCharacterRequest,
    responses(
        (status = 200, description = "Character created", body = ApiResponse<CharacterResponse>),
        (status = 400, description = "Empty name or key already taken"),
    )
)]
pub async fn create_character(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCharacterRequest>,
) -> Result<Json<ApiResponse<CharacterResponse>>, ServerError> {
    req.validate()?;
    let character = state.characters.create(req.into()).await?;
    Ok(ApiResponse::ok(character.to_response()))
}

#[utoipa::path(
    get,
    path = "/api/characters/{key}",
    tag = "characters",
    params(("key" = String, Path, description = "Character key")),
    responses(
        (status = 200, description = "Character", body = ApiResponse<CharacterResponse>),
        (status = 404, description = "Unknown character"),
    )
)]
pub async fn get_character(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<CharacterResponse>>, ServerError> {
    let character = state.characters.get(&key).await?;
    Ok(ApiResponse::ok(character.to_response()))
}

#[utoipa::path(
    put,
    path = "/api/characters/{key}",
    tag = "characters",
    params(("key" = String, Path, description = "Character key")),
    request_body = UpdateCharacterRequest,
    responses(
        (status = 200, description = "Character updated", body = ApiResponse<CharacterResponse>),
        (status = 400, description = "Empty name or key collision"),
        (status = 403, description = "Built-in characters cannot be re-keyed"),
        (status = 404, description = "Unknown character"),
    )
)]
pub async fn update_character(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<UpdateCharacterRequest>,
) -> Result<Json<ApiResponse<CharacterResponse>>, ServerError> {
    req.validate()?;
    let character = state.conversation.update_character(&key, req.into()).await?;
    Ok(ApiResponse::ok(character.to_response()))
}

#[utoipa::path(
    delete,
    path = "/api/characters/{key}",
    tag = "characters",
    params(("key" = String, Path, description = "Character key")),
    responses(
        (status = 200, description = "Character deleted", body = ApiResponse<Ack>),
        (status = 403, description = "Built-in characters cannot be deleted"),
        (status = 404, description = "Unknown character"),
    )
)]
pub async fn delete_character(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<Ack>>, ServerError> {
    state.characters.delete(&key).await?;
    Ok(ApiResponse::ok(Ack::new(format!("Character '{key}' deleted"))))
}
