/// LLM Client: the single point of entry for all generation calls.
///
/// ARCHITECTURAL RULE: section engines talk to a `GenerationClient`, never to a
/// vendor API directly. `HttpLlmClient` makes exactly one HTTP call per
/// `generate`; retries, repair and model escalation live in the callers.
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod balance;
pub mod prompts;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const CHAT_TEMPERATURE: f32 = 1.0;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Balance query failed: {0}")]
    Balance(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Provider
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    DeepSeek,
    OpenAi,
    Claude,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "https://api.deepseek.com",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Claude => "https://api.anthropic.com",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek-chat",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Claude => "claude-sonnet-4-5",
        }
    }

    /// Slower reasoning model offered by the vendor, if any.
    pub fn default_reasoning_model(&self) -> Option<&'static str> {
        match self {
            Provider::DeepSeek => Some("deepseek-reasoner"),
            Provider::OpenAi | Provider::Claude => None,
        }
    }

    /// Whether the vendor has a constrained JSON-object response mode.
    pub fn supports_json_mode(&self) -> bool {
        matches!(self, Provider::DeepSeek | Provider::OpenAi)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::DeepSeek => "deepseek",
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
        })
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Ok(Provider::DeepSeek),
            "openai" => Ok(Provider::OpenAi),
            "claude" | "anthropic" => Ok(Provider::Claude),
            other => Err(format!("unsupported LLM provider: {other}")),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Capability
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// One generation call: system prompt, base user prompt, then the running
/// repair history in order.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub history: Vec<Message>,
    pub json_mode: bool,
}

#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub latency_ms: u64,
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    fn supports_json_mode(&self) -> bool;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generated, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
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

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// `{"error": {"message": ...}}`, shared by Anthropic and OpenAI-style APIs.
#[derive(Debug, Deserialize)]
struct VendorError {
    error: VendorErrorBody,
}

#[derive(Debug, Deserialize)]
struct VendorErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP client
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Log prompts and raw responses at debug level.
    pub verbose: bool,
}

/// The shared HTTP client; cheap to clone and stateless between calls.
#[derive(Clone)]
pub struct HttpLlmClient {
    client: Client,
    settings: LlmSettings,
}

impl HttpLlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    pub fn provider(&self) -> Provider {
        self.settings.provider
    }

    async fn call_chat(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(WireMessage {
            role: "system",
            content: &request.system,
        });
        messages.push(WireMessage {
            role: "user",
            content: &request.user,
        });
        messages.extend(request.history.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let body = ChatRequest {
            model: &request.model,
            messages,
            temperature: CHAT_TEMPERATURE,
            response_format: (request.json_mode && self.supports_json_mode()).then_some(
                ResponseFormat {
                    kind: "json_object",
                },
            ),
        };

        let response = self
            .client
            .post(join_url(&self.settings.base_url, "/chat/completions"))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?;
        let text = read_success_body(response).await?;

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyContent)
    }

    async fn call_anthropic(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        messages.push(WireMessage {
            role: "user",
            content: &request.user,
        });
        messages.extend(request.history.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: MAX_TOKENS,
            system: &request.system,
            messages,
        };

        let response = self
            .client
            .post(join_url(&self.settings.base_url, "/v1/messages"))
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let text = read_success_body(response).await?;

        let llm_response: LlmResponse = serde_json::from_str(&text)?;
        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );
        llm_response
            .text()
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .ok_or(LlmError::EmptyContent)
    }
}

#[async_trait]
impl GenerationClient for HttpLlmClient {
    fn supports_json_mode(&self) -> bool {
        self.settings.provider.supports_json_mode()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generated, LlmError> {
        if self.settings.verbose {
            debug!(
                model = %request.model,
                system = %request.system,
                user = %request.user,
                history = request.history.len(),
                "LLM request"
            );
        }

        let started = Instant::now();
        let text = match self.settings.provider {
            Provider::Claude => self.call_anthropic(request).await?,
            Provider::DeepSeek | Provider::OpenAi => self.call_chat(request).await?,
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        if self.settings.verbose {
            debug!(model = %request.model, latency_ms, response = %text, "LLM response");
        }
        Ok(Generated { text, latency_ms })
    }
}

/// Non-2xx responses become `LlmError::Api`, with the vendor's message when
/// the body carries one.
async fn read_success_body(response: reqwest::Response) -> Result<String, LlmError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<VendorError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(LlmError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(body)
}

/// Joins `base` and `path`, dropping a duplicated `/v1` segment.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = if base.ends_with("/v1") {
        path.strip_prefix("/v1").unwrap_or(path)
    } else {
        path
    };
    format!("{base}{path}")
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_join_url_avoids_duplicate_v1() {
        assert_eq!(
            join_url("https://api.anthropic.com/v1/", "/v1/messages"),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            join_url("https://api.deepseek.com", "/chat/completions"),
            "https://api.deepseek.com/chat/completions"
        );
    }

    #[test]
    fn test_provider_capabilities() {
        assert_eq!("DeepSeek".parse::<Provider>().unwrap(), Provider::DeepSeek);
        assert!(Provider::DeepSeek.supports_json_mode());
        assert!(!Provider::Claude.supports_json_mode());
        assert_eq!(Provider::DeepSeek.default_reasoning_model(), Some("deepseek-reasoner"));
        assert!("mistral".parse::<Provider>().is_err());
    }

    #[test]
    fn test_api_error_text_keeps_status_for_rate_limit_detection() {
        let err = LlmError::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert!(crate::generation::backoff::is_rate_limit_error(&err.to_string()));
    }

    #[test]
    fn test_chat_request_sets_json_response_format() {
        let body = ChatRequest {
            model: "deepseek-chat",
            messages: vec![WireMessage {
                role: "user",
                content: "hi",
            }],
            temperature: CHAT_TEMPERATURE,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
