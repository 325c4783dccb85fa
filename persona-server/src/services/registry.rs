//! Model registry: installed/running listings, usage statistics and the
//! curated catalogue of popular models, all backed by the inference runtime.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ServerError;
use crate::runtime::{InferenceRuntime, ProgressFn, PromptMessage, RuntimeModel};

/// Name fragments that mark a model as vision-capable.
const CAPTION_KEYWORDS: &[&str] = &["llava", "vision", "caption", "clip", "blip", "vit", "joycaption"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledModel {
    pub name: String,
    pub size: u64,
    pub size_label: String,
    pub modified: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
}

impl From<RuntimeModel> for InstalledModel {
    fn from(m: RuntimeModel) -> Self {
        Self {
            size_label: format_size(m.size),
            name: m.name,
            size: m.size,
            modified: m.modified,
            family: m.family,
            parameter_size: m.parameter_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularModel {
    pub name: &'static str,
    pub description: &'static str,
    pub size: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStats {
    pub total_models: usize,
    pub total_size: u64,
    pub total_size_label: String,
    pub running_count: usize,
}

/// Installed models split by what they can be used for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCatalog {
    pub chat_models: Vec<String>,
    pub caption_models: Vec<String>,
}

const POPULAR: &[PopularModel] = &[
    PopularModel { name: "llama3.2:3b", description: "Meta Llama 3.2, small general-purpose chat model", size: "2.0 GB" },
    PopularModel { name: "llama3.1:8b", description: "Meta Llama 3.1, strong general-purpose chat model", size: "4.7 GB" },
    PopularModel { name: "phi3:mini", description: "Microsoft Phi-3 Mini, compact reasoning model", size: "2.2 GB" },
    PopularModel { name: "mistral:7b", description: "Mistral 7B instruct model", size: "4.1 GB" },
    PopularModel { name: "gemma2:2b", description: "Google Gemma 2, lightweight chat model", size: "1.6 GB" },
    PopularModel { name: "qwen2.5:7b", description: "Qwen 2.5 multilingual chat model", size: "4.7 GB" },
    PopularModel { name: "wizard-vicuna-uncensored:7b", description: "Unfiltered role-play chat model", size: "3.8 GB" },
    PopularModel { name: "llava:7b", description: "LLaVA vision-language model for image captions", size: "4.7 GB" },
    PopularModel { name: "llama3.2-vision:11b", description: "Meta Llama 3.2 with image understanding", size: "7.9 GB" },
    PopularModel { name: "moondream:1.8b", description: "Tiny vision model for quick captions", size: "1.7 GB" },
];

/// Render a byte count the way the model list shows it, e.g. `"3.8 GB"`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn is_caption_model(name: &str) -> bool {
    let lower = name.to_lowercase();
    CAPTION_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[derive(Clone)]
pub struct ModelRegistry {
    runtime: Arc<dyn InferenceRuntime>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ModelRegistry")
    }
}

impl ModelRegistry {
    pub fn new(runtime: Arc<dyn InferenceRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn list_installed(&self) -> Result<Vec<InstalledModel>, ServerError> {
        let models = self.runtime.list_models().await?;
        debug!(count = models.len(), "listed installed models");
        Ok(models.into_iter().map(InstalledModel::from).collect())
    }

    pub async fn list_running(&self) -> Result<Vec<String>, ServerError> {
        Ok(self.runtime.list_running().await?)
    }

    pub async fn compute_stats(&self) -> Result<ModelStats, ServerError> {
        let installed = self.list_installed().await?;
        let running = self.list_running().await?;
        let total_size = installed.iter().map(|m| m.size).sum();
        Ok(ModelStats {
            total_models: installed.len(),
            total_size,
            total_size_label: format_size(total_size),
            running_count: running.len(),
        })
    }

    pub fn list_popular(&self) -> &'static [PopularModel] {
        POPULAR
    }

    /// Split installed models into chat and caption candidates.  An empty
    /// category falls back to the first installed model.
    pub async fn catalog(&self) -> Result<ModelCatalog, ServerError> {
        let installed = self.list_installed().await?;
        Ok(categorize(installed.into_iter().map(|m| m.name)))
    }

    /// Whether `name` is installed.  `None` when the runtime can't be asked.
    pub async fn is_installed(&self, name: &str) -> Option<bool> {
        match self.runtime.list_models().await {
            Ok(models) => Some(models.iter().any(|m| m.name == name)),
            Err(e) => {
                debug!(error = %e, model = %name, "could not verify model; runtime unavailable");
                None
            }
        }
    }

    pub async fn delete(&self, name: &str) -> Result<(), ServerError> {
        if name.trim().is_empty() {
            return Err(ServerError::Validation("model name is required".into()));
        }
        self.runtime.delete_model(name).await?;
        info!(model = %name, "model deleted");
        Ok(())
    }

    pub async fn chat(&self, model: &str, messages: &[PromptMessage]) -> Result<String, ServerError> {
        Ok(self.runtime.generate_chat(model, messages).await?)
    }

    pub async fn caption(&self, model: &str, image: &[u8], prompt: &str) -> Result<String, ServerError> {
        Ok(self.runtime.generate_caption(model, image, prompt).await?)
    }

    pub async fn pull(&self, name: &str, on_progress: ProgressFn<'_>) -> Result<(), ServerError> {
        Ok(self.runtime.pull_model(name, on_progress).await?)
    }
}

fn categorize(names: impl IntoIterator<Item = String>) -> ModelCatalog {
    let names: Vec<String> = names.into_iter().collect();
    let (mut caption_models, mut chat_models): (Vec<String>, Vec<String>) =
        names.iter().cloned().partition(|n| is_caption_model(n));
    if let Some(first) = names.first() {
        if chat_models.is_empty() {
            chat_models.push(first.clone());
        }
        if caption_models.is_empty() {
            caption_models.push(first.clone());
        }
    }
    ModelCatalog { chat_models, caption_models }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::MockRuntime;

    #[test]
    fn size_labels() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3_825_819_519), "3.6 GB");
    }

    #[test]
    fn categorize_by_keyword() {
        let catalog = categorize(
            ["llama3.2:3b", "llava:7b", "phi3:mini", "aha2025/llama-joycaption-beta-one-hf-llava:Q4_K_M"]
                .map(String::from),
        );
        assert_eq!(catalog.chat_models, ["llama3.2:3b", "phi3:mini"]);
        assert_eq!(
            catalog.caption_models,
            ["llava:7b", "aha2025/llama-joycaption-beta-one-hf-llava:Q4_K_M"]
        );
    }

    #[test]
    fn empty_category_falls_back_to_first_model() {
        let catalog = categorize(["phi3:mini", "mistral:7b"].map(String::from));
        assert_eq!(catalog.caption_models, ["phi3:mini"]);

        let catalog = categorize(Vec::<String>::new());
        assert!(catalog.chat_models.is_empty());
        assert!(catalog.caption_models.is_empty());
    }

    #[tokio::test]
    async fn stats_sum_installed_and_count_running() {
        let runtime = MockRuntime::new()
            .with_model("llama3.2:3b", 2 * 1024 * 1024 * 1024)
            .with_model("llava:7b", 1024 * 1024 * 1024)
            .with_running("llama3.2:3b");
        let registry = ModelRegistry::new(Arc::new(runtime));

        let stats = registry.compute_stats().await.unwrap();
        assert_eq!(stats.total_models, 2);
        assert_eq!(stats.total_size, 3 * 1024 * 1024 * 1024);
        assert_eq!(stats.total_size_label, "3.0 GB");
        assert_eq!(stats.running_count, 1);
    }

    #[tokio::test]
    async fn unreachable_runtime_is_unavailable() {
        let registry = ModelRegistry::new(Arc::new(MockRuntime::unreachable()));
        assert!(matches!(registry.list_installed().await, Err(ServerError::Unavailable(_))));
        assert!(matches!(registry.compute_stats().await, Err(ServerError::Unavailable(_))));
        assert_eq!(registry.is_installed("phi3:mini").await, None);
        assert!(!registry.list_popular().is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_model_is_not_found() {
        let registry = ModelRegistry::new(Arc::new(MockRuntime::new().with_model("phi3:mini", 1)));
        assert!(matches!(registry.delete("ghost:1b").await, Err(ServerError::NotFound(_))));
        registry.delete("phi3:mini").await.unwrap();
        assert_eq!(registry.is_installed("phi3:mini").await, Some(false));
    }
}
