//! In-process inference runtime double used across the test modules.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::entities::SqliteStore;
use crate::runtime::{InferenceRuntime, ProgressFn, PromptMessage, PullProgress, RuntimeError, RuntimeModel};
use crate::state::AppState;

/// One scripted step of a model pull.
#[derive(Debug)]
pub enum PullStep {
    Progress(PullProgress),
    Finish,
    Fail(String),
}

pub fn progress(completed: u64, total: u64) -> PullStep {
    PullStep::Progress(PullProgress {
        status: "pulling layer".into(),
        completed: Some(completed),
        total: Some(total),
    })
}

#[derive(Default)]
pub struct MockRuntime {
    reachable: bool,
    models: Mutex<Vec<RuntimeModel>>,
    running: Vec<String>,
    replies: Mutex<VecDeque<String>>,
    caption: String,
    caption_failure: Option<String>,
    pull_script: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<PullStep>>>,
    /// Every chat call as `(model, messages)`.
    pub chats: Mutex<Vec<(String, Vec<PromptMessage>)>>,
    /// Every caption call as `(model, image_len, prompt)`.
    pub captions: Mutex<Vec<(String, usize, String)>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            reachable: true,
            caption: "a cat on a windowsill".into(),
            ..Default::default()
        }
    }

    /// A runtime whose every call fails as if the process were down.
    pub fn unreachable() -> Self {
        Self { reachable: false, ..Default::default() }
    }

    pub fn with_model(self, name: &str, size: u64) -> Self {
        if let Ok(mut models) = self.models.lock() {
            models.push(RuntimeModel {
                name: name.into(),
                size,
                modified: Some("2025-01-01T00:00:00Z".into()),
                family: None,
                parameter_size: None,
            });
        }
        self
    }

    pub fn with_running(mut self, name: &str) -> Self {
        self.running.push(name.into());
        self
    }

    pub fn with_reply(self, reply: &str) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply.into());
        }
        self
    }

    /// Captioning fails with `message` while chat keeps working.
    pub fn with_caption_failure(mut self, message: &str) -> Self {
        self.caption_failure = Some(message.into());
        self
    }

    /// Drive pulls step by step through the returned sender.  Dropping the
    /// sender without a terminal step finishes the pull successfully.
    pub fn scripted_pull(self) -> (Self, mpsc::UnboundedSender<PullStep>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Self { pull_script: tokio::sync::Mutex::new(Some(rx)), ..self };
        (runtime, tx)
    }

    fn check(&self) -> Result<(), RuntimeError> {
        if self.reachable {
            Ok(())
        } else {
            Err(RuntimeError::Unreachable("connection refused".into()))
        }
    }
}

#[async_trait]
impl InferenceRuntime for MockRuntime {
    async fn list_models(&self) -> Result<Vec<RuntimeModel>, RuntimeError> {
        self.check()?;
        Ok(self.models.lock().map(|m| m.clone()).unwrap_or_default())
    }

    async fn list_running(&self) -> Result<Vec<String>, RuntimeError> {
        self.check()?;
        Ok(self.running.clone())
    }

    async fn generate_chat(&self, model: &str, messages: &[PromptMessage]) -> Result<String, RuntimeError> {
        self.check()?;
        if let Ok(mut chats) = self.chats.lock() {
            chats.push((model.to_owned(), messages.to_vec()));
        }
        let reply = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        Ok(reply.unwrap_or_else(|| "Hello! How can I help?".into()))
    }

    async fn generate_caption(&self, model: &str, image: &[u8], prompt: &str) -> Result<String, RuntimeError> {
        self.check()?;
        if let Ok(mut captions) = self.captions.lock() {
            captions.push((model.to_owned(), image.len(), prompt.to_owned()));
        }
        if let Some(message) = &self.caption_failure {
            return Err(RuntimeError::Request(message.clone()));
        }
        Ok(self.caption.clone())
    }

    async fn pull_model(&self, _name: &str, on_progress: ProgressFn<'_>) -> Result<(), RuntimeError> {
        self.check()?;
        let script = self.pull_script.lock().await.take();
        let Some(mut steps) = script else {
            on_progress(PullProgress { status: "pulling manifest".into(), ..Default::default() });
            on_progress(PullProgress { status: "success".into(), ..Default::default() });
            return Ok(());
        };
        while let Some(step) = steps.recv().await {
            match step {
                PullStep::Progress(p) => on_progress(p),
                PullStep::Finish => return Ok(()),
                PullStep::Fail(message) => return Err(RuntimeError::Request(message)),
            }
        }
        Ok(())
    }

    async fn delete_model(&self, name: &str) -> Result<(), RuntimeError> {
        self.check()?;
        let mut models = self
            .models
            .lock()
            .map_err(|_| RuntimeError::Request("poisoned".into()))?;
        let before = models.len();
        models.retain(|m| m.name != name);
        if models.len() == before {
            return Err(RuntimeError::ModelNotFound(name.into()));
        }
        Ok(())
    }
}

/// A 1×1 PNG.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// Application state over an in-memory database and `runtime`.
pub async fn test_state(runtime: MockRuntime) -> Arc<AppState> {
    let mut config = Config::from_env();
    config.download_retention_secs = 60;
    config.enable_openapi = true;
    config.cors_allowed_origins = None;
    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
    Arc::new(AppState::new(config, store, Arc::new(runtime)).await.unwrap())
}
