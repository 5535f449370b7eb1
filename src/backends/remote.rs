//! Primary-remote backend: a minimal OpenAI-compatible chat.completions client.
//!
//! Non-2xx responses, undecodable bodies and transport errors all come back as
//! `BackendFailure`; the orchestrator moves on to the next backend either way.
//!
//! NOTE: We never log the API key and keep payload previews short.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::prompt::build_prompt;
use super::RiddleBackend;
use crate::config::{env_or, Prompts};
use crate::domain::RiddleRequest;
use crate::error::BackendFailure;

pub const REMOTE_BACKEND: &str = "remote";

#[derive(Clone)]
pub struct OpenAiBackend {
  client: reqwest::Client,
  api_key: Option<String>,
  pub base_url: String,
  pub model: String,
  prompts: Prompts,
  timeout: Duration,
}

impl OpenAiBackend {
  pub fn new(api_key: Option<String>, base_url: String, model: String, prompts: Prompts, timeout: Duration) -> Self {
    Self {
      client: reqwest::Client::new(),
      api_key: api_key.filter(|k| !k.trim().is_empty()),
      base_url: base_url.trim_end_matches('/').to_string(),
      model,
      prompts,
      timeout,
    }
  }

  /// Build from OPENAI_API_KEY / OPENAI_BASE_URL / OPENAI_MODEL. Without a key
  /// the backend still exists but reports itself unavailable.
  pub fn from_env(prompts: Prompts, timeout: Duration) -> Self {
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    let base_url = env_or("OPENAI_BASE_URL", "https://api.openai.com/v1".to_string());
    let model = env_or("OPENAI_MODEL", "gpt-4o-mini".to_string());
    Self::new(api_key, base_url, model, prompts, timeout)
  }

  pub fn has_key(&self) -> bool {
    self.api_key.is_some()
  }

  /// Plain-text chat completion.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_plain(&self, system: &str, user: &str, timeout: Duration) -> Result<String, BackendFailure> {
    let api_key = self
      .api_key
      .as_deref()
      .ok_or_else(|| BackendFailure::Unavailable("no API key configured".into()))?;

    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature: 0.8,
      max_tokens: Some(300),
    };

    let res = self.client.post(&url)
      .timeout(timeout)
      .header(USER_AGENT, "roddle-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", api_key))
      .json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(BackendFailure::Network(format!("HTTP {}: {}", status, msg)));
    }

    let body: ChatCompletionResponse = res.json().await
      .map_err(|e| BackendFailure::MalformedResponse(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(target: "riddle", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "Remote model usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default().trim().to_string();

    if text.is_empty() {
      return Err(BackendFailure::MalformedResponse("empty completion".into()));
    }
    Ok(text)
  }
}

#[async_trait]
impl RiddleBackend for OpenAiBackend {
  fn name(&self) -> &str {
    REMOTE_BACKEND
  }

  async fn available(&self) -> bool {
    self.has_key()
  }

  #[instrument(level = "info", skip(self, request), fields(difficulty = %request.difficulty, theme = %request.theme))]
  async fn generate(&self, request: &RiddleRequest, timeout: Duration) -> Result<String, BackendFailure> {
    let prompt = build_prompt(&self.prompts, request.difficulty, &request.theme);
    self.chat_plain(&prompt.system, &prompt.user, timeout).await
  }

  fn attempt_timeout(&self) -> Duration {
    self.timeout
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
