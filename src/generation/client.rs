//! Chat-completion collaborator
//!
//! Any OpenAI-compatible `POST {base_url}/chat/completions` endpoint works
//! (Groq, OpenAI, local gateways). The response is untrusted free text.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::{InsightError, Result};

/// Longest excerpt of an upstream error body kept in error messages
const ERROR_EXCERPT_CHARS: usize = 200;

/// One system instruction plus one user message
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A chat-style completion API
pub trait ChatCompletion: Send + Sync {
    /// Return the assistant message content for `request`
    ///
    /// Failures are reported as `GenerationFailed`.
    fn complete(&self, request: &ChatRequest) -> impl Future<Output = Result<String>> + Send;
}

/// HTTP client for OpenAI-compatible chat-completion endpoints
#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsClient {
    /// Create a client for `base_url` (e.g. `https://api.groq.com/openai/v1`)
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("insight/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                InsightError::invalid_config(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatCompletion for ChatCompletionsClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let body = CompletionBody {
            model: &request.model,
            messages: [
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                InsightError::generation_failed(format!("Chat completion request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InsightError::generation_failed(format!(
                "Chat completion API error ({status}): {}",
                excerpt(&text)
            )));
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            InsightError::generation_failed(format!(
                "Failed to parse chat completion response: {e}"
            ))
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            InsightError::generation_failed("Chat completion response contained no choices")
        })?;

        match choice.finish_reason.as_deref() {
            Some("content_filter") => {
                return Err(InsightError::generation_failed(
                    "Chat completion was filtered by content policy",
                ))
            }
            Some("length") => {
                tracing::warn!("chat completion truncated at the token limit");
            }
            _ => {}
        }

        choice.message.content.ok_or_else(|| {
            InsightError::generation_failed("Chat completion response contained no content")
        })
    }
}

fn excerpt(text: &str) -> String {
    let mut chars = text.trim().chars();
    let head: String = chars.by_ref().take(ERROR_EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
