//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use clap::Parser;

/// Runtime configuration for persona-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:5000"`).
    pub bind_address: String,

    /// SQLite database URL holding the character repository
    /// (default: `"sqlite://persona.db"`).
    pub database_url: String,

    /// Base URL of the Ollama runtime (default: `"http://localhost:11434"`).
    pub ollama_url: String,

    /// Per-request timeout for non-streaming runtime calls, in seconds.
    pub ollama_timeout_secs: u64,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When set, logs are additionally written to a daily rolling file here.
    pub log_dir: Option<String>,

    /// Comma-separated list of allowed CORS origins.  `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve the OpenAPI document at `/api-docs/openapi.json`.
    pub enable_openapi: bool,

    /// Sessions untouched for this long are reaped.
    pub session_idle_secs: u64,

    /// Interval between reaper sweeps.
    pub session_reap_secs: u64,

    /// How long a finished download stays visible to polling clients.
    pub download_retention_secs: u64,

    /// Maximum accepted image upload, in MiB.
    pub max_upload_mb: usize,

    /// Chat model assigned to new sessions.
    pub default_chat_model: String,

    /// Caption (vision) model assigned to new sessions.
    pub default_caption_model: String,
}

/// Command-line overrides; anything not given falls back to the environment.
#[derive(Debug, Default, Parser)]
#[command(name = "persona-server", version, about = "Character chat server for a local Ollama runtime")]
pub struct Cli {
    /// Address to listen on, e.g. `127.0.0.1:5000`.
    #[arg(long)]
    pub bind: Option<String>,

    /// sqlx SQLite URL for the character store.
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL of the Ollama runtime.
    #[arg(long)]
    pub ollama_url: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("PERSONA_BIND", "0.0.0.0:5000"),
            database_url: env_or("PERSONA_DATABASE_URL", "sqlite://persona.db"),
            ollama_url: env_or("PERSONA_OLLAMA_URL", "http://localhost:11434"),
            ollama_timeout_secs: parse_env("PERSONA_OLLAMA_TIMEOUT_SECS", 300),
            log_level: env_or("PERSONA_LOG", "info"),
            log_json: env_flag("PERSONA_LOG_JSON", false),
            log_dir: std::env::var("PERSONA_LOG_DIR").ok().filter(|v| !v.trim().is_empty()),
            cors_allowed_origins: Some(env_or("PERSONA_CORS_ORIGINS", "http://localhost:3000"))
                .filter(|v| v.trim() != "*"),
            enable_openapi: env_flag("PERSONA_ENABLE_OPENAPI", true),
            session_idle_secs: parse_env("PERSONA_SESSION_IDLE_SECS", 3600),
            session_reap_secs: parse_env("PERSONA_SESSION_REAP_SECS", 60),
            download_retention_secs: parse_env("PERSONA_DOWNLOAD_RETENTION_SECS", 5),
            max_upload_mb: parse_env("PERSONA_MAX_UPLOAD_MB", 16),
            default_chat_model: env_or("PERSONA_DEFAULT_CHAT_MODEL", "wizard-vicuna-uncensored:7b"),
            default_caption_model: env_or(
                "PERSONA_DEFAULT_CAPTION_MODEL",
                "aha2025/llama-joycaption-beta-one-hf-llava:Q4_K_M",
            ),
        }
    }

    /// Apply command-line overrides on top of the environment-derived values.
    pub fn with_cli(mut self, cli: Cli) -> Self {
        if let Some(bind) = cli.bind {
            self.bind_address = bind;
        }
        if let Some(url) = cli.database_url {
            self.database_url = url;
        }
        if let Some(url) = cli.ollama_url {
            self.ollama_url = url;
        }
        self
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn session_reap_interval(&self) -> Duration {
        Duration::from_secs(self.session_reap_secs.max(1))
    }

    pub fn download_retention(&self) -> Duration {
        Duration::from_secs(self.download_retention_secs)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
