//! Types for the model listing, statistics and download endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::services::downloads::DownloadJob;
use crate::services::registry::{InstalledModel, ModelCatalog, ModelStats, PopularModel};

/// Request body naming a single model, e.g. `{"model": "llama3.2:3b"}`.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct ModelNameRequest {
    #[validate(length(min = 1, max = 256))]
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ModelCatalogResponse {
    pub chat_models: Vec<String>,
    pub caption_models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InstalledModelResponse {
    pub name: String,
    /// Bytes on disk.
    pub size: u64,
    /// Human-readable size, e.g. `"3.8 GB"`.
    pub size_label: String,
    pub modified: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PopularModelResponse {
    pub name: String,
    pub description: String,
    pub size: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModelStatsResponse {
    pub total_models: usize,
    pub total_size: u64,
    pub total_size_label: String,
    pub running_count: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DownloadJobResponse {
    pub id: String,
    pub model_name: String,
    /// `starting`, `downloading`, `completed`, `error` or `cancelled`.
    pub status: String,
    /// 0–100.
    pub progress: u8,
    pub message: String,
    pub started_at: String,
    pub updated_at: String,
}

/// Download slot snapshot; `job` is `null` when no download is tracked.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DownloadStateResponse {
    pub active: bool,
    pub job: Option<DownloadJobResponse>,
}

impl From<ModelCatalog> for ModelCatalogResponse {
    fn from(c: ModelCatalog) -> Self {
        Self { chat_models: c.chat_models, caption_models: c.caption_models }
    }
}

impl InstalledModel {
    pub fn to_response(&self) -> InstalledModelResponse {
        InstalledModelResponse {
            name: self.name.clone(),
            size: self.size,
            size_label: self.size_label.clone(),
            modified: self.modified.clone(),
            family: self.family.clone(),
            parameter_size: self.parameter_size.clone(),
        }
    }
}

impl PopularModel {
    pub fn to_response(&self) -> PopularModelResponse {
        PopularModelResponse {
            name: self.name.to_owned(),
            description: self.description.to_owned(),
            size: self.size.to_owned(),
        }
    }
}

impl ModelStats {
    pub fn to_response(&self) -> ModelStatsResponse {
        ModelStatsResponse {
            total_models: self.total_models,
            total_size: self.total_size,
            total_size_label: self.total_size_label.clone(),
            running_count: self.running_count,
        }
    }
}

impl DownloadJob {
    pub fn to_response(&self) -> DownloadJobResponse {
        DownloadJobResponse {
            id: self.id.clone(),
            model_name: self.model_name.clone(),
            status: self.status.as_ref().to_owned(),
            progress: self.progress,
            message: self.message.clone(),
            started_at: self.started_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

impl DownloadStateResponse {
    pub fn from_job(job: Option<&DownloadJob>) -> Self {
        Self {
            active: job.is_some_and(|j| !j.status.is_terminal()),
            job: job.map(DownloadJob::to_response),
        }
    }
}
