//! Boundary to the external inference runtime.
//!
//! [`InferenceRuntime`] is the only seam through which the server talks to the
//! model-serving process.  The default implementation is
//! [`ollama::OllamaRuntime`]; tests substitute an in-process double.

pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ollama::OllamaRuntime;

/// Errors surfaced by the runtime boundary.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime process could not be reached at all.
    #[error("inference runtime unreachable: {0}")]
    Unreachable(String),

    /// The runtime answered with an error.
    #[error("inference runtime error: {0}")]
    Request(String),

    /// The runtime answered with something we could not decode.
    #[error("invalid response from inference runtime: {0}")]
    InvalidResponse(String),

    /// The named model is not installed.
    #[error("model '{0}' not found")]
    ModelNotFound(String),
}

/// A model installed in the runtime, as reported by its listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeModel {
    pub name: String,
    pub size: u64,
    pub modified: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One entry of the context sent to a chat model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Incremental progress reported while a model is being pulled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    /// Runtime-provided phase, e.g. `"pulling manifest"` or `"verifying sha256 digest"`.
    pub status: String,
    pub completed: Option<u64>,
    pub total: Option<u64>,
}

impl PullProgress {
    /// Percentage of the current layer, when the runtime reports byte counts.
    pub fn percent(&self) -> Option<u8> {
        match (self.completed, self.total) {
            (Some(done), Some(total)) if total > 0 => {
                Some(((done.min(total) as f64 / total as f64) * 100.0).floor() as u8)
            }
            _ => None,
        }
    }
}

/// Callback invoked for every progress record of a pull.
pub type ProgressFn<'a> = &'a (dyn Fn(PullProgress) + Send + Sync);

/// The external inference runtime.
///
/// Every call may suspend for seconds to minutes; callers must not hold
/// locks protecting unrelated state across these awaits.
#[async_trait]
pub trait InferenceRuntime: Send + Sync + 'static {
    async fn list_models(&self) -> Result<Vec<RuntimeModel>, RuntimeError>;

    /// Names of the models currently loaded in memory.
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError>;

    async fn generate_chat(
        &self,
        model: &str,
        messages: &[PromptMessage],
    ) -> Result<String, RuntimeError>;

    async fn generate_caption(
        &self,
        model: &str,
        image: &[u8],
        prompt: &str,
    ) -> Result<String, RuntimeError>;

    /// Pull `name`, reporting progress until the runtime signals success.
    ///
    /// Dropping the returned future aborts the transfer from our side; the
    /// runtime itself may keep pulling until it notices the closed stream.
    async fn pull_model(&self, name: &str, on_progress: ProgressFn<'_>) -> Result<(), RuntimeError>;

    async fn delete_model(&self, name: &str) -> Result<(), RuntimeError>;
}
