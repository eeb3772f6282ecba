//! Model providers.
//!
//! One [`Provider`] trait, one independent implementation per API:
//!
//! - [`OpenAiCompatible`]: OpenAI chat completions, also used for OpenRouter
//!   (same wire format, different base URL and key).
//! - [`Anthropic`]: the Anthropic Messages API.
//!
//! Each adapter converts the provider-agnostic history into its own message
//! format, and converts [`ToolDescriptor`]s into its own tool definitions.
//! [`ProviderSettings::build`] picks one by [`ProviderKind`].

pub mod anthropic;
pub mod openai;
pub mod retry;

pub use anthropic::Anthropic;
pub use openai::OpenAiCompatible;

use crate::conversation::ConversationTurn;
use crate::error::{Error, Result};
use crate::schema::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

/// Boxed future returned by [`Provider::complete`].
pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<ProviderReply>> + Send + 'a>>;

/// A tool invocation requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Keyword arguments. Normally a JSON object; anything else is rejected
    /// when the call is executed.
    pub arguments: Value,
}

/// Result of one executed tool call, sent back to the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Output as text for the wire: strings verbatim, anything else as JSON.
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Token usage reported by the provider.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// What the model answered in one round trip.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProviderReply {
    /// Text content; empty when the model only requested tools.
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub finish_reason: Option<String>,
}

impl ProviderReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Everything a provider needs for one round trip.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub system: &'a str,
    /// Completed round trips, oldest first.
    pub history: &'a [ConversationTurn],
    /// New user message; empty when resubmitting tool results.
    pub message: &'a str,
    /// Results of the previous reply's tool calls.
    pub tool_results: &'a [ToolResult],
    /// Tool definitions already in this provider's wire format.
    pub tools: &'a [Value],
    pub temperature: f32,
}

/// A chat model that supports tool calling.
pub trait Provider: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Convert descriptors into this provider's tool definition format.
    fn tool_definitions(&self, descriptors: &[ToolDescriptor]) -> Vec<Value>;

    /// Send one request and return the model's reply.
    fn complete<'a>(&'a self, request: ProviderRequest<'a>) -> ProviderFuture<'a>;
}

// ── Selection ──────────────────────────────────────────────────────

/// Which API to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenRouter,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    /// Environment variable holding the API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "OPENROUTER_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => openai::OPENROUTER_BASE_URL,
            ProviderKind::OpenAi => openai::OPENAI_BASE_URL,
            ProviderKind::Anthropic => anthropic::ANTHROPIC_BASE_URL,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => crate::DEFAULT_MODEL,
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Anthropic => "claude-sonnet-4-5",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenRouter => write!(f, "openrouter"),
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            other => Err(format!(
                "unknown provider '{other}' (expected openrouter, openai, or anthropic)"
            )),
        }
    }
}

/// Provider construction settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    /// Overrides [`ProviderKind::default_base_url`].
    pub base_url: Option<String>,
    /// Maximum tokens per completion (0 = provider default where allowed).
    pub max_tokens: u32,
    /// HTTP client timeout.
    pub http_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::new(ProviderKind::default())
    }
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            model: kind.default_model().to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            http_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Fill in the API key from the kind's environment variable if unset.
    pub fn with_env_key(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = std::env::var(self.kind.api_key_env())
                .ok()
                .filter(|k| !k.is_empty());
        }
        self
    }

    fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.kind.default_base_url().to_string())
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("lmvm-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(self.http_timeout)
            .build()
            .map_err(|e| Error::provider(None, format!("failed to build HTTP client: {e}")))
    }

    /// Construct the configured provider. A missing API key is an error.
    pub fn build(&self) -> Result<Box<dyn Provider>> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            Error::provider(
                None,
                format!("no API key: set {}", self.kind.api_key_env()),
            )
        })?;
        let client = self.http_client()?;
        Ok(match self.kind {
            ProviderKind::OpenRouter | ProviderKind::OpenAi => Box::new(OpenAiCompatible::new(
                client,
                api_key,
                &self.model,
                self.base_url(),
                self.max_tokens,
            )),
            ProviderKind::Anthropic => Box::new(Anthropic::new(
                client,
                api_key,
                &self.model,
                self.base_url(),
                self.max_tokens,
            )),
        })
    }
}

/// Map a non-success HTTP response to [`Error::Provider`], preferring the
/// API's own error message when the body carries one.
pub(crate) fn http_error(status: reqwest::StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string());
    Error::provider(Some(status.as_u16()), message)
}

/// Parse a JSON-encoded arguments string. Empty means no arguments;
/// unparseable text is kept as a string so the failure surfaces when the
/// call is executed.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
