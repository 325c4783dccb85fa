//! Model listing, statistics and deletion routes.
//!
//! Listing endpoints degrade to empty results when the runtime is down so the
//! client can still render; deletion reports the failure.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::warn;
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::routes::api::session::catalog_or_empty;
use crate::schemas::models::{
    InstalledModelResponse, ModelCatalogResponse, ModelNameRequest, ModelStatsResponse,
    PopularModelResponse,
};
use crate::schemas::{Ack, ApiResponse};
use crate::services::registry::format_size;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        refresh_models,
        list_models,
        list_running_models,
        model_stats,
        popular_models,
        delete_model
    ),
    components(schemas(
        ModelCatalogResponse,
        InstalledModelResponse,
        ModelStatsResponse,
        PopularModelResponse,
        ModelNameRequest
    ))
)]
pub struct ModelsApi;

/// Register model routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/refresh_models", post(refresh_models))
        .route("/models", get(list_models))
        .route("/models/running", get(list_running_models))
        .route("/models/stats", get(model_stats))
        .route("/models/popular", get(popular_models))
        .route("/models/delete", post(delete_model))
}

#[utoipa::path(
    post,
    path = "/api/refresh_models",
    tag = "models",
    responses(
        (status = 200, description = "Installed models split into chat and caption lists", body = ApiResponse<ModelCatalogResponse>),
    )
)]
pub async fn refresh_models(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<ModelCatalogResponse>> {
    ApiResponse::ok(catalog_or_empty(&state.registry).await)
}

#[utoipa::path(
    get,
    path = "/api/models",
    tag = "models",
    responses(
        (status = 200, description = "Installed models", body = ApiResponse<Vec<InstalledModelResponse>>),
    )
)]
pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<InstalledModelResponse>>> {
    let models = state.registry.list_installed().await.unwrap_or_else(|e| {
        warn!(error = %e, "installed models unavailable");
        Vec::new()
    });
    ApiResponse::ok(models.iter().map(|m| m.to_response()).collect())
}

#[utoipa::path(
    get,
    path = "/api/models/running",
    tag = "models",
    responses(
        (status = 200, description = "Names of models loaded in memory", body = ApiResponse<Vec<String>>),
    )
)]
pub async fn list_running_models(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<String>>> {
    let running = state.registry.list_running().await.unwrap_or_else(|e| {
        warn!(error = %e, "running models unavailable");
        Vec::new()
    });
    ApiResponse::ok(running)
}

#[utoipa::path(
    get,
    path = "/api/models/stats",
    tag = "models",
    responses(
        (status = 200, description = "Installed model count, disk usage and running count", body = ApiResponse<ModelStatsResponse>),
    )
)]
pub async fn model_stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<ModelStatsResponse>> {
    let stats = match state.registry.compute_stats().await {
        Ok(stats) => stats.to_response(),
        Err(e) => {
            warn!(error = %e, "model stats unavailable");
            ModelStatsResponse {
                total_models: 0,
                total_size: 0,
                total_size_label: format_size(0),
                running_count: 0,
            }
        }
    };
    ApiResponse::ok(stats)
}

#[utoipa::path(
    get,
    path = "/api/models/popular",
    tag = "models",
    responses(
        (status = 200, description = "Curated list of models worth pulling", body = ApiResponse<Vec<PopularModelResponse>>),
    )
)]
pub async fn popular_models(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<PopularModelResponse>>> {
    ApiResponse::ok(state.registry.list_popular().iter().map(|m| m.to_response()).collect())
}

#[utoipa::path(
    post,
    path = "/api/models/delete",
    tag = "models",
    request_body = ModelNameRequest,
    responses(
        (status = 200, description = "Model removed from the runtime", body = ApiResponse<Ack>),
        (status = 404, description = "Model not installed"),
        (status = 503, description = "Runtime unreachable"),
    )
)]
pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelNameRequest>,
) -> Result<Json<ApiResponse<Ack>>, ServerError> {
    req.validate()?;
    state.registry.delete(&req.model).await?;
    Ok(ApiResponse::ok(Ack::new(format!("Deleted {}", req.model))))
}
