//! Events, handlers, and run outcomes for a [`Conversation`](super::Conversation).
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | Custom `impl EventHandler` | Full control (progress output, metrics) |

use crate::provider::{ToolResult, Usage};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted while a conversation runs.
#[derive(Debug)]
pub enum ConversationEvent<'a> {
    /// A provider round trip is about to start.
    TurnStart { turn: u32, max_turns: u32 },
    /// The model returned text (possibly alongside tool calls).
    Text(&'a str),
    /// The model requested tool calls this turn.
    ToolCallsReceived { turn: u32, count: usize },
    /// A tool is about to be invoked.
    ToolExecuting { name: &'a str, arguments: &'a Value },
    /// A tool call finished (successfully or as a reported error).
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        output: &'a Value,
        is_error: bool,
    },
    /// Token usage reported by the provider for this turn.
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// A failed provider or tool call will be retried.
    Retry {
        operation: &'a str,
        attempt: u32,
        delay: Duration,
        error: &'a str,
    },
    /// The model answered without tool calls.
    Finished,
    /// `max_turns` round trips were used without a final answer.
    TurnLimitReached { max_turns: u32 },
    /// The stop signal fired between turns.
    Cancelled,
}

/// Handler for conversation events.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &ConversationEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let ConversationEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&ConversationEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&ConversationEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&ConversationEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &ConversationEvent<'_>) {
        (self.0)(event)
    }
}

/// Logs every event through `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &ConversationEvent<'_>) {
        match event {
            ConversationEvent::TurnStart { turn, max_turns } => {
                info!("[turn {}/{}]", turn, max_turns);
            }
            ConversationEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
            ConversationEvent::ToolCallsReceived { turn, count } => {
                debug!("{count} tool call(s) in turn {turn}");
            }
            ConversationEvent::ToolExecuting { name, arguments } => {
                let args = arguments.to_string();
                let preview: String = args.chars().take(120).collect();
                info!(
                    "[tool] {}({preview}{})",
                    name,
                    if args.len() > 120 { "..." } else { "" }
                );
            }
            ConversationEvent::ToolResult {
                name,
                output,
                is_error,
                ..
            } => {
                if *is_error {
                    warn!("Tool {name} failed: {output}");
                } else {
                    debug!("Tool {name} result: {} bytes", output.to_string().len());
                }
            }
            ConversationEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            ConversationEvent::Retry {
                operation,
                attempt,
                delay,
                error,
            } => {
                warn!("Retrying {operation} (attempt {attempt}) in {delay:?}: {error}");
            }
            ConversationEvent::Finished => {
                info!("Conversation finished (no more tool calls)");
            }
            ConversationEvent::TurnLimitReached { max_turns } => {
                warn!("Turn limit reached ({max_turns}) without a final answer");
            }
            ConversationEvent::Cancelled => {
                info!("Stop signal received; ending conversation");
            }
        }
    }
}

// ── Outcome ────────────────────────────────────────────────────────

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools.
    Completed,
    /// `max_turns` round trips were spent.
    TurnLimit,
    /// The stop signal fired.
    Cancelled,
}

/// Result of [`Conversation::run`](super::Conversation::run).
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// Unique id for this run, also attached to its log lines.
    pub trace_id: String,
    /// Final answer text (the last reply's text when the run did not
    /// complete).
    pub text: String,
    /// Every tool result produced during this run, in execution order.
    pub tool_results: Vec<ToolResult>,
    /// Provider round trips made during this run.
    pub turns_used: u32,
    pub stop: StopReason,
    pub usage: Usage,
}

impl RunOutcome {
    /// Whether the model produced a final answer.
    pub fn completed(&self) -> bool {
        self.stop == StopReason::Completed
    }
}
