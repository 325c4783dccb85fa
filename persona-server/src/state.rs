//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::entities::SqliteStore;
use crate::error::ServerError;
use crate::runtime::InferenceRuntime;
use crate::services::characters::CharacterRepository;
use crate::services::conversation::Conversation;
use crate::services::downloads::DownloadCoordinator;
use crate::services::registry::ModelRegistry;
use crate::services::sessions::{SessionDefaults, SessionStore};

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Per-client conversation state.
    pub sessions: Arc<SessionStore>,
    /// Built-in and user-defined characters.
    pub characters: Arc<CharacterRepository>,
    /// Installed/running models, backed by the inference runtime.
    pub registry: ModelRegistry,
    /// The single model download slot.
    pub downloads: DownloadCoordinator,
    pub conversation: Conversation,
}

impl AppState {
    /// Wire every service together over `store` and `runtime`.
    pub async fn new(
        config: Config,
        store: SqliteStore,
        runtime: Arc<dyn InferenceRuntime>,
    ) -> Result<Self, ServerError> {
        let sessions = Arc::new(SessionStore::new(
            SessionDefaults {
                chat_model: config.default_chat_model.clone(),
                caption_model: config.default_caption_model.clone(),
            },
            config.session_idle(),
        ));
        let characters = Arc::new(CharacterRepository::load(store).await?);
        let registry = ModelRegistry::new(runtime);
        let downloads = DownloadCoordinator::new(registry.clone(), config.download_retention());
        let conversation = Conversation::new(sessions.clone(), characters.clone(), registry.clone());
        Ok(Self {
            config: Arc::new(config),
            sessions,
            characters,
            registry,
            downloads,
            conversation,
        })
    }
}
