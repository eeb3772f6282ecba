//! OpenAI-compatible chat completions (OpenAI, OpenRouter, and any server
//! speaking the same protocol).

use super::{
    ProviderFuture, ProviderReply, ProviderRequest, ToolCallRequest, ToolResult, Usage, http_error,
    parse_arguments,
};
use crate::conversation::ConversationTurn;
use crate::error::{Error, Result};
use crate::schema::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, trace};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body.
#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    /// Always sent, including `0.0`.
    pub temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, Some(content.into()))
    }

    /// Assistant reply; `content` is omitted when empty.
    pub fn assistant(reply: &ProviderReply) -> Self {
        let content = (!reply.text.is_empty()).then(|| reply.text.clone());
        let calls: Vec<ToolCall> = reply.tool_calls.iter().map(ToolCall::from_request).collect();
        Self {
            tool_calls: (!calls.is_empty()).then_some(calls),
            ..Self::with_role(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.call_id.clone()),
            ..Self::with_role(MessageRole::Tool, Some(result.output_text()))
        }
    }
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call as it appears on the wire.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionCallData {
    pub name: String,
    /// JSON-encoded arguments object.
    pub arguments: String,
}

impl ToolCall {
    fn from_request(call: &ToolCallRequest) -> Self {
        Self {
            id: call.id.clone(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }

    fn into_request(self) -> ToolCallRequest {
        ToolCallRequest {
            arguments: parse_arguments(&self.function.arguments),
            id: self.id,
            name: self.function.name,
        }
    }
}

/// Tool definition in function-calling format.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDef {
    pub fn from_descriptor(descriptor: &ToolDescriptor) -> Self {
        Self {
            tool_type: "function".into(),
            function: FunctionDef {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                parameters: descriptor.to_json_schema(),
            },
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Deserialize, Debug)]
struct RawUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

// ── Conversion ─────────────────────────────────────────────────────

fn push_inputs(messages: &mut Vec<Message>, text: &str, results: &[ToolResult]) {
    messages.extend(results.iter().map(Message::tool_result));
    if !text.is_empty() {
        messages.push(Message::user(text));
    }
}

/// Flatten system prompt, history, and the pending input into messages.
pub fn build_messages(request: &ProviderRequest<'_>) -> Vec<Message> {
    let mut messages = Vec::new();
    if !request.system.is_empty() {
        messages.push(Message::system(request.system));
    }
    for turn in request.history {
        push_turn(&mut messages, turn);
    }
    push_inputs(&mut messages, request.message, request.tool_results);
    messages
}

fn push_turn(messages: &mut Vec<Message>, turn: &ConversationTurn) {
    push_inputs(messages, &turn.message, &turn.tool_results);
    messages.push(Message::assistant(&turn.reply));
}

fn parse_response(text: &str) -> Result<ProviderReply> {
    let parsed: RawChatResponse = serde_json::from_str(text)
        .map_err(|e| Error::provider(None, format!("failed to parse response: {e}")))?;
    if let Some(err) = parsed.error {
        return Err(Error::provider(None, err.message));
    }
    let usage = parsed.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens.unwrap_or(0),
        completion_tokens: u.completion_tokens.unwrap_or(0),
    });
    let Some(choice) = parsed.choices.and_then(|c| c.into_iter().next()) else {
        debug!("LLM output: empty (no choices)");
        return Ok(ProviderReply {
            usage,
            ..Default::default()
        });
    };
    let tool_calls: Vec<ToolCallRequest> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(ToolCall::into_request)
        .collect();
    let text = choice.message.content.unwrap_or_default();
    debug!(
        "LLM output: {} chars text, {} tool call(s)",
        text.len(),
        tool_calls.len()
    );
    Ok(ProviderReply {
        text,
        tool_calls,
        usage,
        finish_reason: choice.finish_reason,
    })
}

// ── Client ─────────────────────────────────────────────────────────

/// Client for `POST {base_url}/chat/completions` with bearer auth.
pub struct OpenAiCompatible {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl OpenAiCompatible {
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
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Request body for one round trip.
    pub fn chat_request(&self, request: &ProviderRequest<'_>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: build_messages(request),
            max_tokens: self.max_tokens,
            temperature: request.temperature,
            tools: request.tools.to_vec(),
        }
    }
}

impl super::Provider for OpenAiCompatible {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn tool_definitions(&self, descriptors: &[ToolDescriptor]) -> Vec<Value> {
        descriptors
            .iter()
            .map(|d| serde_json::to_value(ToolDef::from_descriptor(d)).unwrap_or(Value::Null))
            .collect()
    }

    fn complete<'a>(&'a self, request: ProviderRequest<'a>) -> ProviderFuture<'a> {
        Box::pin(async move {
            let body = self.chat_request(&request);
            debug!(
                "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={}",
                body.model,
                body.messages.len(),
                body.tools.len(),
                body.max_tokens,
                body.temperature,
            );
            trace!(
                "Request payload size: {} bytes",
                serde_json::to_string(&body).map_or(0, |s| s.len())
            );

            let start = Instant::now();
            let resp = self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
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
