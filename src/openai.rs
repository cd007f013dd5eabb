//! Structured completion client.
//!
//! `CompletionBackend` is one raw chat-completion call; `OpenAI` implements it
//! over reqwest. `StructuredClient::chat_json` layers the JSON contract on top:
//! empty reply, non-JSON reply and schema violations each fail with their own
//! `CompletionError`. No retries happen here; callers pick a fallback model.
//!
//! NOTE: We never log the API key or message contents. Raw replies only appear
//! in error messages when OPENAI_DEBUG_RAW_RESPONSE is enabled.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::Settings;
use crate::error::CompletionError;
use crate::schema::Schema;
use crate::util::clip;

/// Max chars of raw payload embedded in diagnostics.
const RAW_CLIP: usize = 2000;
/// At most this many schema issues are listed in an error message.
const MAX_ISSUES: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  System,
  User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
  pub role: Role,
  pub content: String,
}

impl ChatMessage {
  pub fn system(content: impl Into<String>) -> Self {
    Self { role: Role::System, content: content.into() }
  }

  pub fn user(content: impl Into<String>) -> Self {
    Self { role: Role::User, content: content.into() }
  }
}

/// A chat-completion endpoint: returns the first choice's content, if any.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
  async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<Option<String>, CompletionError>;
}

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  api_key: Option<String>,
  pub base_url: String,
}

impl OpenAI {
  pub fn from_settings(settings: &Settings) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(settings.openai_timeout_secs))
      .build()?;
    Ok(Self {
      client,
      api_key: settings.openai_api_key.clone(),
      base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
    })
  }

  pub fn is_configured(&self) -> bool {
    self.api_key.is_some()
  }
}

#[async_trait]
impl CompletionBackend for OpenAI {
  #[instrument(level = "info", skip(self, messages), fields(model = %model, messages = messages.len()))]
  async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<Option<String>, CompletionError> {
    let api_key = self
      .api_key
      .as_deref()
      .ok_or_else(|| CompletionError::Transport("Missing env: OPENAI_API_KEY".into()))?;

    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model,
      messages,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let start = std::time::Instant::now();
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "kotoba-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", api_key))
      .json(&req)
      .send()
      .await
      .map_err(|e| CompletionError::Transport(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_openai_error(&body).unwrap_or(body);
      return Err(CompletionError::Http { status, message });
    }

    let body: ChatCompletionResponse = res
      .json()
      .await
      .map_err(|e| CompletionError::Transport(e.to_string()))?;
    let elapsed = start.elapsed();
    if let Some(usage) = &body.usage {
      info!(?elapsed, prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    } else {
      info!(?elapsed, "OpenAI response received");
    }

    Ok(body.choices.into_iter().next().and_then(|c| c.message.content))
  }
}

/// JSON-validating wrapper around a completion backend.
#[derive(Clone)]
pub struct StructuredClient {
  backend: Arc<dyn CompletionBackend>,
  debug_raw: bool,
}

impl StructuredClient {
  pub fn new(backend: Arc<dyn CompletionBackend>, debug_raw: bool) -> Self {
    Self { backend, debug_raw }
  }

  pub fn debug_raw(&self) -> bool {
    self.debug_raw
  }

  /// Send `messages` to `model`, parse the reply as JSON, validate it against
  /// `schema`, then deserialize into `T`.
  #[instrument(level = "info", skip(self, messages, schema), fields(model = %model))]
  pub async fn chat_json<T: DeserializeOwned>(
    &self,
    model: &str,
    messages: &[ChatMessage],
    schema: &Schema,
  ) -> Result<T, CompletionError> {
    let content = self
      .backend
      .complete(model, messages)
      .await?
      .filter(|c| !c.trim().is_empty())
      .ok_or(CompletionError::EmptyResponse)?;
    debug!(reply_len = content.len(), "Completion content received");

    let json: serde_json::Value = serde_json::from_str(&content).map_err(|_| CompletionError::NonJsonResponse {
      detail: if self.debug_raw { format!(". raw={}", clip(&content, RAW_CLIP)) } else { String::new() },
    })?;

    let issues = schema.validate(&json);
    if !issues.is_empty() {
      let summary = issues
        .iter()
        .take(MAX_ISSUES)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(" | ");
      return Err(CompletionError::SchemaMismatch { summary, detail: self.raw_detail(&json) });
    }

    serde_json::from_value::<T>(json.clone()).map_err(|e| CompletionError::SchemaMismatch {
      summary: format!("<root>: {}", e),
      detail: self.raw_detail(&json),
    })
  }

  fn raw_detail(&self, json: &serde_json::Value) -> String {
    if self.debug_raw {
      format!(" raw={}", clip(&json.to_string(), RAW_CLIP))
    } else {
      String::new()
    }
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
  model: &'a str,
  messages: &'a [ChatMessage],
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ResponseFormat {
  #[serde(rename = "type")]
  r#type: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
