//! Local-model backend: a model served by an Ollama process on this machine.
//!
//! Endpoints used:
//! - GET  /api/tags     - liveness + "is the model pulled"
//! - POST /api/generate - generation; also used to load and unload weights
//! - POST /api/pull     - download a model
//!
//! The first generation may have to load weights into memory, so until one
//! call has succeeded the attempt budget is the (longer) load timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use super::prompt::build_prompt;
use super::{RiddleBackend, AVAILABILITY_CHECK};
use crate::config::{env_or, Prompts};
use crate::domain::RiddleRequest;
use crate::error::BackendFailure;

pub const LOCAL_BACKEND: &str = "local";
pub const OLLAMA_DEFAULT_URL: &str = "http://127.0.0.1:11434";
const PULL_TIMEOUT: Duration = Duration::from_secs(600);

pub struct OllamaBackend {
  client: reqwest::Client,
  pub base_url: String,
  pub model: String,
  prompts: Prompts,
  timeout: Duration,
  load_timeout: Duration,
  loaded: AtomicBool,
}

/// Model info from /api/tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModel {
  pub name: String,
  #[serde(default)]
  pub size: u64,
  #[serde(default)]
  pub modified_at: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
  #[serde(default)]
  models: Vec<OllamaModel>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
  model: &'a str,
  prompt: &'a str,
  system: &'a str,
  stream: bool,
  options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
  temperature: f32,
  top_p: f32,
  num_predict: i32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
  #[serde(default)]
  response: String,
  #[serde(default)]
  load_duration: u64,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
  #[serde(default)]
  status: String,
}

impl OllamaBackend {
  pub fn new(base_url: String, model: String, prompts: Prompts, timeout: Duration, load_timeout: Duration) -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url: base_url.trim_end_matches('/').to_string(),
      model,
      prompts,
      timeout,
      load_timeout: load_timeout.max(timeout),
      loaded: AtomicBool::new(false),
    }
  }

  /// Build from OLLAMA_URL / OLLAMA_MODEL.
  pub fn from_env(prompts: Prompts, timeout: Duration, load_timeout: Duration) -> Self {
    let base_url = env_or("OLLAMA_URL", OLLAMA_DEFAULT_URL.to_string());
    let model = env_or("OLLAMA_MODEL", "neural-chat".to_string());
    Self::new(base_url, model, prompts, timeout, load_timeout)
  }

  /// Whether weights are known to be resident (a generation or warm-up succeeded).
  pub fn is_loaded(&self) -> bool {
    self.loaded.load(Ordering::Relaxed)
  }

  #[instrument(level = "debug", skip(self))]
  pub async fn list_models(&self) -> Result<Vec<OllamaModel>, BackendFailure> {
    let res = self.client.get(format!("{}/api/tags", self.base_url))
      .timeout(AVAILABILITY_CHECK)
      .send().await?;
    if !res.status().is_success() {
      return Err(BackendFailure::Network(format!("HTTP {}", res.status())));
    }
    let tags: TagsResponse = res.json().await
      .map_err(|e| BackendFailure::MalformedResponse(e.to_string()))?;
    Ok(tags.models)
  }

  /// Download a model. Blocks until Ollama reports the pull finished.
  #[instrument(level = "info", skip(self))]
  pub async fn pull_model(&self, model_name: &str) -> Result<(), BackendFailure> {
    info!(target: "riddle", model = %model_name, "Pulling local model");
    let res = self.client.post(format!("{}/api/pull", self.base_url))
      .timeout(PULL_TIMEOUT)
      .json(&json!({ "name": model_name, "stream": false }))
      .send().await?;
    if !res.status().is_success() {
      return Err(BackendFailure::Network(format!("pull failed: HTTP {}", res.status())));
    }
    let body: PullResponse = res.json().await
      .map_err(|e| BackendFailure::MalformedResponse(e.to_string()))?;
    if body.status != "success" {
      return Err(BackendFailure::MalformedResponse(format!("pull ended with status '{}'", body.status)));
    }
    Ok(())
  }

  fn model_matches(&self, name: &str) -> bool {
    name == self.model || name.starts_with(&format!("{}:", self.model))
  }
}

#[async_trait]
impl RiddleBackend for OllamaBackend {
  fn name(&self) -> &str {
    LOCAL_BACKEND
  }

  /// Up and serving, with the configured model pulled.
  async fn available(&self) -> bool {
    match self.list_models().await {
      Ok(models) => {
        let found = models.iter().any(|m| self.model_matches(&m.name));
        if !found {
          warn!(target: "riddle", model = %self.model, available = models.len(), "Local model not pulled");
        }
        found
      }
      Err(_) => false,
    }
  }

  #[instrument(level = "info", skip(self, request), fields(model = %self.model, difficulty = %request.difficulty))]
  async fn generate(&self, request: &RiddleRequest, timeout: Duration) -> Result<String, BackendFailure> {
    let prompt = build_prompt(&self.prompts, request.difficulty, &request.theme);
    let body = GenerateRequest {
      model: &self.model,
      prompt: &prompt.user,
      system: &prompt.system,
      stream: false,
      options: GenerateOptions { temperature: 0.8, top_p: 0.9, num_predict: 200 },
    };

    let res = self.client.post(format!("{}/api/generate", self.base_url))
      .timeout(timeout)
      .json(&body)
      .send().await?;
    if !res.status().is_success() {
      return Err(BackendFailure::Network(format!("HTTP {}", res.status())));
    }
    let out: GenerateResponse = res.json().await
      .map_err(|e| BackendFailure::MalformedResponse(e.to_string()))?;

    if !self.loaded.swap(true, Ordering::Relaxed) {
      info!(target: "riddle", model = %self.model, load_ms = out.load_duration / 1_000_000, "Local model loaded");
    }
    let text = out.response.trim().to_string();
    if text.is_empty() {
      return Err(BackendFailure::MalformedResponse("empty response".into()));
    }
    Ok(text)
  }

  fn attempt_timeout(&self) -> Duration {
    if self.is_loaded() { self.timeout } else { self.load_timeout }
  }

  fn max_attempt_timeout(&self) -> Duration {
    self.load_timeout
  }

  /// An empty prompt makes Ollama load the weights without generating.
  async fn warm_up(&self) {
    let res = self.client.post(format!("{}/api/generate", self.base_url))
      .timeout(self.load_timeout)
      .json(&json!({ "model": self.model, "prompt": "", "stream": false }))
      .send().await;
    match res {
      Ok(r) if r.status().is_success() => {
        self.loaded.store(true, Ordering::Relaxed);
        info!(target: "riddle", model = %self.model, "Local model warmed up");
      }
      Ok(r) => warn!(target: "riddle", model = %self.model, status = %r.status(), "Local model warm-up refused"),
      Err(e) => warn!(target: "riddle", model = %self.model, error = %e, "Local model warm-up failed"),
    }
  }

  /// `keep_alive: 0` asks Ollama to drop the weights from memory.
  async fn shutdown(&self) {
    let res = self.client.post(format!("{}/api/generate", self.base_url))
      .timeout(AVAILABILITY_CHECK)
      .json(&json!({ "model": self.model, "keep_alive": 0 }))
      .send().await;
    if let Err(e) = res {
      warn!(target: "riddle", model = %self.model, error = %e, "Local model unload failed");
    }
    self.loaded.store(false, Ordering::Relaxed);
  }
}
