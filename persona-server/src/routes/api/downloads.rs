//! Model download routes: start, poll, cancel, reset and an SSE event stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::WatchStream;
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::schemas::models::{DownloadJobResponse, DownloadStateResponse, ModelNameRequest};
use crate::schemas::{Ack, ApiResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(start_download, download_progress, cancel_download, reset_download, download_events),
    components(schemas(DownloadJobResponse, DownloadStateResponse))
)]
pub struct DownloadsApi;

/// Register download routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models/download", post(start_download).get(download_progress))
        .route("/models/download/cancel", post(cancel_download))
        .route("/models/download/reset", post(reset_download))
        .route("/models/download/events", get(download_events))
}

#[utoipa::path(
    post,
    path = "/api/models/download",
    tag = "downloads",
    request_body = ModelNameRequest,
    responses(
        (status = 200, description = "Download started", body = ApiResponse<DownloadJobResponse>),
        (status = 400, description = "Empty model name"),
        (status = 409, description = "A download is already in progress"),
    )
)]
pub async fn start_download(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelNameRequest>,
) -> Result<Json<ApiResponse<DownloadJobResponse>>, ServerError> {
    req.validate()?;
    let job = state.downloads.start(&req.model)?;
    Ok(ApiResponse::ok(job.to_response()))
}

#[utoipa::path(
    get,
    path = "/api/models/download",
    tag = "downloads",
    responses(
        (status = 200, description = "Current download, or none", body = ApiResponse<DownloadStateResponse>),
    )
)]
pub async fn download_progress(State(state): State<Arc<AppState>>) -> Json<ApiResponse<DownloadStateResponse>> {
    let job = state.downloads.progress();
    ApiResponse::ok(DownloadStateResponse::from_job(job.as_ref()))
}

#[utoipa::path(
    post,
    path = "/api/models/download/cancel",
    tag = "downloads",
    responses(
        (status = 200, description = "Download cancelled", body = ApiResponse<DownloadJobResponse>),
        (status = 404, description = "No download to cancel"),
        (status = 409, description = "Download already finished"),
    )
)]
pub async fn cancel_download(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<DownloadJobResponse>>, ServerError> {
    let job = state.downloads.cancel()?;
    Ok(ApiResponse::ok(job.to_response()))
}

#[utoipa::path(
    post,
    path = "/api/models/download/reset",
    tag = "downloads",
    responses(
        (status = 200, description = "Finished download cleared", body = ApiResponse<Ack>),
        (status = 409, description = "A download is still running"),
    )
)]
pub async fn reset_download(State(state): State<Arc<AppState>>) -> Result<Json<ApiResponse<Ack>>, ServerError> {
    state.downloads.reset()?;
    Ok(ApiResponse::ok(Ack::new("Download state cleared")))
}

#[utoipa::path(
    get,
    path = "/api/models/download/events",
    tag = "downloads",
    responses(
        (status = 200, description = "`text/event-stream` of download snapshots", body = DownloadStateResponse, content_type = "text/event-stream"),
    )
)]
pub async fn download_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.downloads.subscribe()).map(|job| {
        let snapshot = DownloadStateResponse::from_job(job.as_ref());
        let event = Event::default()
            .event("download")
            .json_data(&snapshot)
            .unwrap_or_else(|_| Event::default().event("download").data("{}"));
        Ok::<_, Infallible>(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
