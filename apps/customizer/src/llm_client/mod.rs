//! LLM Client: the text-generation capability every pipeline stage depends on.
//!
//! ARCHITECTURAL RULE: stages only ever see `TextGenerationCapability`. No other module
//! may call the Anthropic API directly. Tests substitute deterministic stubs through the
//! same trait.
//!
//! `LlmClient` makes exactly one HTTP call per `generate`. Retry, backoff and the
//! per-call timeout budget belong to the pipeline's retry policy.
//!
//! Model: claude-sonnet-4-5 (hardcoded; do not make configurable to prevent drift)
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;

/// The fixed failure set of a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    /// Transient failures are retried with backoff; invalid responses are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited(_) | GenerationError::Timeout(_)
        )
    }
}

/// Single-call text generation with a role, instructions, and structured context.
#[async_trait]
pub trait TextGenerationCapability: Send + Sync {
    async fn generate(
        &self,
        role: &str,
        instructions: &str,
        context: &Value,
    ) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Anthropic Messages API client implementing `TextGenerationCapability`.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(request_timeout).build()?,
            api_key,
        })
    }

    /// Makes one call to the Claude API, returning the full response object.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<LlmResponse, GenerationError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("LLM API returned {}: {}", status, body);
            return Err(classify_status(status.as_u16(), &body));
        }

        let llm_response: LlmResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(format!("undecodable body: {e}")))?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );

        Ok(llm_response)
    }
}

#[async_trait]
impl TextGenerationCapability for LlmClient {
    async fn generate(
        &self,
        role: &str,
        instructions: &str,
        context: &Value,
    ) -> Result<String, GenerationError> {
        let prompt = compose_prompt(instructions, context);
        let response = self.call(&prompt, role).await?;
        match response.text() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(GenerationError::InvalidResponse(
                "LLM returned empty content".to_string(),
            )),
        }
    }
}

/// Appends the structured context to the instructions as pretty-printed JSON.
fn compose_prompt(instructions: &str, context: &Value) -> String {
    let context_json = serde_json::to_string_pretty(context).unwrap_or_else(|_| context.to_string());
    format!("{instructions}\n\nCONTEXT (JSON):\n{context_json}")
}

fn classify_transport_error(error: reqwest::Error) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout(format!("request timed out: {error}"))
    } else {
        // Connection resets and refused connects are worth another attempt.
        GenerationError::Timeout(format!("transport failure: {error}"))
    }
}

/// Maps a non-success HTTP status onto the generation error set.
fn classify_status(status: u16, body: &str) -> GenerationError {
    let message = serde_json::from_str::<AnthropicError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        429 | 529 => GenerationError::RateLimited(format!("status {status}: {message}")),
        500..=599 => GenerationError::Timeout(format!("upstream status {status}: {message}")),
        _ => GenerationError::InvalidResponse(format!("status {status}: {message}")),
    }
}

/// Parses a JSON reply, tolerating Markdown code fences around it.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(strip_json_fences(text))
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

/// Trims a free-text reply and removes quotes the model wrapped around it.
pub fn clean_text_reply(text: &str) -> String {
    let text = text.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    text.to_string()
}
