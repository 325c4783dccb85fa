//! Ollama HTTP client.
//!
//! Talks to a running Ollama server (default: `localhost:11434`).  Listing and
//! generation calls are plain JSON requests with a per-request timeout; model
//! pulls consume the NDJSON progress stream of `POST /api/pull` without a
//! timeout, since a multi-gigabyte transfer can legitimately take hours.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    InferenceRuntime, ProgressFn, PromptMessage, PromptRole, PullProgress, RuntimeError,
    RuntimeModel,
};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: PromptRole,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
struct TagDetails {
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    parameter_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    #[serde(default)]
    models: Vec<PsEntry>,
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    name: String,
}

#[derive(Debug, Serialize)]
struct ModelRef<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

/// One NDJSON record of the pull stream.
#[derive(Debug, Deserialize)]
struct PullLine {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`InferenceRuntime`] backed by the Ollama REST API.
#[derive(Debug, Clone)]
pub struct OllamaRuntime {
    base_url: String,
    timeout: Duration,
    client: Client,
}

impl OllamaRuntime {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RuntimeError> {
        let client = Client::builder()
            .user_agent(concat!("persona-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RuntimeError::Request(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: RequestBuilder, model: Option<&str>) -> Result<Response, RuntimeError> {
        let resp = req.send().await.map_err(classify)?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        match (status, model) {
            (StatusCode::NOT_FOUND, Some(name)) => Err(RuntimeError::ModelNotFound(name.to_owned())),
            _ => Err(RuntimeError::Request(format!("{status}: {message}"))),
        }
    }

    async fn chat(&self, model: &str, messages: Vec<WireMessage<'_>>) -> Result<String, RuntimeError> {
        let body = ChatRequest { model, messages, stream: false };
        let req = self.client.post(self.url("/api/chat")).timeout(self.timeout).json(&body);
        let resp: ChatResponse = self
            .send(req, Some(model))
            .await?
            .json()
            .await
            .map_err(|e| RuntimeError::InvalidResponse(e.to_string()))?;
        Ok(resp.message.content)
    }
}

fn classify(e: reqwest::Error) -> RuntimeError {
    if e.is_connect() {
        RuntimeError::Unreachable(e.to_string())
    } else if e.is_timeout() {
        RuntimeError::Request(format!("request timed out: {e}"))
    } else {
        RuntimeError::Request(e.to_string())
    }
}

/// Apply one decoded pull record; `Ok(true)` once the runtime reports success.
fn apply_pull_line(line: &[u8], on_progress: ProgressFn<'_>) -> Result<bool, RuntimeError> {
    let record: PullLine = serde_json::from_slice(line)
        .map_err(|e| RuntimeError::InvalidResponse(format!("bad pull record: {e}")))?;
    if let Some(error) = record.error {
        return Err(RuntimeError::Request(error));
    }
    let status = record.status.unwrap_or_default();
    if status == "success" {
        return Ok(true);
    }
    on_progress(PullProgress {
        status,
        completed: record.completed,
        total: record.total,
    });
    Ok(false)
}

#[async_trait]
impl InferenceRuntime for OllamaRuntime {
    async fn list_models(&self) -> Result<Vec<RuntimeModel>, RuntimeError> {
        let req = self.client.get(self.url("/api/tags")).timeout(self.timeout);
        let tags: TagsResponse = self
            .send(req, None)
            .await?
            .json()
            .await
            .map_err(|e| RuntimeError::InvalidResponse(e.to_string()))?;
        Ok(tags
            .models
            .into_iter()
            .map(|m| {
                let (family, parameter_size) = m
                    .details
                    .map(|d| (d.family, d.parameter_size))
                    .unwrap_or((None, None));
                RuntimeModel {
                    name: m.name,
                    size: m.size,
                    modified: m.modified_at,
                    family,
                    parameter_size,
                }
            })
            .collect())
    }

    async fn list_running(&self) -> Result<Vec<String>, RuntimeError> {
        let req = self.client.get(self.url("/api/ps")).timeout(self.timeout);
        let ps: PsResponse = self
            .send(req, None)
            .await?
            .json()
            .await
            .map_err(|e| RuntimeError::InvalidResponse(e.to_string()))?;
        Ok(ps.models.into_iter().map(|m| m.name).collect())
    }

    async fn generate_chat(
        &self,
        model: &str,
        messages: &[PromptMessage],
    ) -> Result<String, RuntimeError> {
        let wire = messages
            .iter()
            .map(|m| WireMessage { role: m.role, content: &m.content, images: Vec::new() })
            .collect();
        debug!(model = %model, turns = messages.len(), "ollama chat request");
        self.chat(model, wire).await
    }

    async fn generate_caption(
        &self,
        model: &str,
        image: &[u8],
        prompt: &str,
    ) -> Result<String, RuntimeError> {
        let wire = vec![WireMessage {
            role: PromptRole::User,
            content: prompt,
            images: vec![BASE64.encode(image)],
        }];
        debug!(model = %model, image_bytes = image.len(), "ollama caption request");
        self.chat(model, wire).await
    }

    async fn pull_model(&self, name: &str, on_progress: ProgressFn<'_>) -> Result<(), RuntimeError> {
        let req = self
            .client
            .post(self.url("/api/pull"))
            .json(&ModelRef { model: name, stream: Some(true) });
        let resp = self.send(req, None).await?;

        let mut stream = resp.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RuntimeError::Request(format!("pull stream error: {e}")))?;
            buf.extend_from_slice(&chunk);
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                let line = line.trim_ascii();
                if line.is_empty() {
                    continue;
                }
                if apply_pull_line(line, on_progress)? {
                    return Ok(());
                }
            }
        }
        let rest = buf.trim_ascii();
        if !rest.is_empty() && apply_pull_line(rest, on_progress)? {
            return Ok(());
        }
        warn!(model = %name, "pull stream ended without a success record");
        Err(RuntimeError::Request(format!(
            "pull of '{name}' ended before the runtime reported success"
        )))
    }

    async fn delete_model(&self, name: &str) -> Result<(), RuntimeError> {
        let req = self
            .client
            .delete(self.url("/api/delete"))
            .timeout(self.timeout)
            .json(&ModelRef { model: name, stream: None });
        self.send(req, Some(name)).await?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
