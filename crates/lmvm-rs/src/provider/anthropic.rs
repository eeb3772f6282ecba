//! Anthropic Messages API.

use super::{
    ProviderFuture, ProviderReply, ProviderRequest, ToolCallRequest, ToolResult, Usage, http_error,
};
use crate::error::{Error, Result};
use crate::schema::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{debug, trace};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Serialize, Debug)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system: String,
    pub messages: Vec<Message>,
    /// Always sent, including `0.0`.
    pub temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

#[derive(Deserialize, Debug)]
struct RawResponse {
    #[serde(default)]
    content: Vec<RawBlock>,
    stop_reason: Option<String>,
    usage: Option<RawUsage>,
    error: Option<RawError>,
}

/// Response blocks; kinds this crate does not use (e.g. thinking) are kept
/// as `Other` and ignored.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum RawBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct RawUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct RawError {
    message: String,
}

// ── Conversion ─────────────────────────────────────────────────────

/// User message carrying tool results first, then text. `None` when there
/// is nothing to send.
fn user_message(text: &str, results: &[ToolResult]) -> Option<Message> {
    let mut content: Vec<ContentBlock> = results
        .iter()
        .map(|r| ContentBlock::ToolResult {
            tool_use_id: r.call_id.clone(),
            content: r.output_text(),
            is_error: r.is_error,
        })
        .collect();
    if !text.is_empty() {
        content.push(ContentBlock::Text {
            text: text.to_string(),
        });
    }
    (!content.is_empty()).then_some(Message {
        role: Role::User,
        content,
    })
}

fn assistant_message(reply: &ProviderReply) -> Option<Message> {
    let mut content = Vec::new();
    if !reply.text.is_empty() {
        content.push(ContentBlock::Text {
            text: reply.text.clone(),
        });
    }
    content.extend(reply.tool_calls.iter().map(|c| ContentBlock::ToolUse {
        id: c.id.clone(),
        name: c.name.clone(),
        input: c.arguments.clone(),
    }));
    (!content.is_empty()).then_some(Message {
        role: Role::Assistant,
        content,
    })
}

/// Append `message`, folding it into the previous one when both have the
/// same role. The Messages API requires strict user / assistant alternation
/// and rejects empty text blocks, so an empty reply is folded away instead
/// of being sent as a blank turn.
fn push_message(messages: &mut Vec<Message>, message: Message) {
    match messages.last_mut() {
        Some(last) if last.role == message.role => last.content.extend(message.content),
        _ => messages.push(message),
    }
}

/// History plus pending input as alternating user / assistant messages.
pub fn build_messages(request: &ProviderRequest<'_>) -> Vec<Message> {
    let mut messages = Vec::new();
    let turns = request.history.iter().flat_map(|turn| {
        user_message(&turn.message, &turn.tool_results)
            .into_iter()
            .chain(assistant_message(&turn.reply))
    });
    for message in turns.chain(user_message(request.message, request.tool_results)) {
        push_message(&mut messages, message);
    }
    messages
}

pub fn tool_definition(descriptor: &ToolDescriptor) -> Value {
    json!({
        "name": descriptor.name,
        "description": descriptor.description,
        "input_schema": descriptor.to_json_schema(),
    })
}

fn parse_response(text: &str) -> Result<ProviderReply> {
    let parsed: RawResponse = serde_json::from_str(text)
        .map_err(|e| Error::provider(None, format!("failed to parse response: {e}")))?;
    if let Some(err) = parsed.error {
        return Err(Error::provider(None, err.message));
    }

    let mut reply = ProviderReply {
        finish_reason: parsed.stop_reason,
        usage: parsed.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens.unwrap_or(0),
            completion_tokens: u.output_tokens.unwrap_or(0),
        }),
        ..Default::default()
    };
    for block in parsed.content {
        match block {
            RawBlock::Text { text } => reply.text.push_str(&text),
            RawBlock::ToolUse { id, name, input } => reply.tool_calls.push(ToolCallRequest {
                id,
                name,
                arguments: input,
            }),
            RawBlock::Other => {}
        }
    }
    debug!(
        "LLM output: {} chars text, {} tool call(s)",
        reply.text.len(),
        reply.tool_calls.len()
    );
    Ok(reply)
}

// ── Client ─────────────────────────────────────────────────────────

/// Client for `POST {base_url}/messages` with `x-api-key` auth.
pub struct Anthropic {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl Anthropic {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            max_tokens,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }

    /// Request body for one round trip. `max_tokens` is mandatory for this
    /// API, so zero falls back to 4096.
    pub fn messages_request(&self, request: &ProviderRequest<'_>) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: if self.max_tokens == 0 {
                4096
            } else {
                self.max_tokens
            },
            system: request.system.to_string(),
            messages: build_messages(request),
            temperature: request.temperature,
            tools: request.tools.to_vec(),
        }
    }
}

impl super::Provider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn tool_definitions(&self, descriptors: &[ToolDescriptor]) -> Vec<Value> {
        descriptors.iter().map(tool_definition).collect()
    }

    fn complete<'a>(&'a self, request: ProviderRequest<'a>) -> ProviderFuture<'a> {
        Box::pin(async move {
            let body = self.messages_request(&request);
            debug!(
                "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={}",
                body.model,
                body.messages.len(),
                body.tools.len(),
                body.max_tokens,
                body.temperature,
            );

            let start = Instant::now();
            let resp = self
                .client
                .post(self.endpoint())
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(Error::request_failed)?;

            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(Error::request_failed)?;
            debug!(
                "LLM response: HTTP {} in {:.1}s ({} bytes)",
                status,
                start.elapsed().as_secs_f64(),
                text.len()
            );
            trace!("Response body: {}", text);

            if !status.is_success() {
                return Err(http_error(status, &text));
            }
            parse_response(&text)
        })
    }
}
