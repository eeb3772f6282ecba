//! The tool-calling conversation loop.
//!
//! A [`Conversation`] owns a [`Namespace`] and an append-only history of
//! [`ConversationTurn`]s. [`Conversation::run`] sends the prompt, executes
//! every tool call the model requests against the namespace, feeds the
//! results back, and repeats until the model answers without tool calls,
//! the turn limit is reached, or the stop signal fires.
//!
//! ```ignore
//! let provider = ProviderSettings::new(ProviderKind::OpenRouter)
//!     .with_env_key()
//!     .build()?;
//! let mut conversation = Conversation::new(provider, namespace, ConversationConfig::default())
//!     .with_event_handler(&LoggingHandler);
//! let outcome = conversation.run("What is 2 + 5?").await?;
//! println!("{}", outcome.text);
//! ```

pub mod events;

pub use events::{
    ConversationEvent, EventHandler, FnEventHandler, LoggingHandler, NoopHandler, RunOutcome,
    StopReason,
};

use crate::error::{Error, Result};
use crate::namespace::{self, Callable, Namespace, NativeFunction};
use crate::provider::retry::{RetryConfig, retry_transient};
use crate::provider::{
    Provider, ProviderReply, ProviderRequest, ToolCallRequest, ToolResult, Usage,
};
use crate::schema::{SchemaOptions, ToolDescriptor, build_descriptors};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Default cap on provider round trips per run.
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// One provider round trip.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationTurn {
    /// User prompt; empty when the turn only resubmitted tool results.
    pub message: String,
    /// Results of the previous turn's tool calls, sent with this request.
    pub tool_results: Vec<ToolResult>,
    pub reply: ProviderReply,
    pub timestamp: DateTime<Utc>,
}

/// What to do when a tool call still fails after its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToolErrorPolicy {
    /// Abort the run with the tool's error.
    #[default]
    Fail,
    /// Send `{"error": "..."}` back to the model as the call's result.
    ReportToModel,
}

/// Conversation settings.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub system_prompt: String,
    /// Maximum provider round trips per [`Conversation::run`].
    pub max_turns: u32,
    /// Sampling temperature, always sent to the provider.
    pub temperature: f32,
    /// Hard limit on each provider call (including the HTTP round trip).
    pub provider_timeout: Duration,
    /// Backoff for transient provider errors.
    pub provider_retry: RetryConfig,
    /// Per-invocation tool timeout. `None` disables it.
    pub tool_timeout: Option<Duration>,
    /// Extra attempts for a failing tool call.
    pub tool_retries: u32,
    pub tool_errors: ToolErrorPolicy,
    /// Validate arguments against the tool's JSON Schema before invoking.
    pub validate_args: bool,
    pub schema: SchemaOptions,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_turns: DEFAULT_MAX_TURNS,
            temperature: 0.0,
            provider_timeout: Duration::from_secs(180),
            provider_retry: RetryConfig::with_retries(3),
            tool_timeout: None,
            tool_retries: 0,
            tool_errors: ToolErrorPolicy::default(),
            validate_args: true,
            schema: SchemaOptions::default(),
        }
    }
}

impl ConversationConfig {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_provider_retry(mut self, retry: RetryConfig) -> Self {
        self.provider_retry = retry;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_tool_retries(mut self, retries: u32) -> Self {
        self.tool_retries = retries;
        self
    }

    pub fn with_tool_errors(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_errors = policy;
        self
    }

    pub fn with_arg_validation(mut self, validate: bool) -> Self {
        self.validate_args = validate;
        self
    }

    pub fn with_schema_options(mut self, options: SchemaOptions) -> Self {
        self.schema = options;
        self
    }
}

/// Generate a unique trace ID for a run.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Descriptors and their provider-specific definitions, built once.
struct ToolCatalog {
    descriptors: Vec<ToolDescriptor>,
    definitions: Vec<Value>,
}

/// A multi-turn exchange with one provider over one namespace.
pub struct Conversation<'a> {
    provider: Box<dyn Provider>,
    namespace: Namespace,
    config: ConversationConfig,
    history: Vec<ConversationTurn>,
    /// Results produced after the last request, not yet delivered.
    unsent_results: Vec<ToolResult>,
    catalog: Option<ToolCatalog>,
    event_handler: &'a dyn EventHandler,
    /// Checked before each turn; `true` ends the run.
    stop_signal: Option<Box<dyn Fn() -> bool + Send + Sync + 'a>>,
}

impl<'a> Conversation<'a> {
    pub fn new(provider: Box<dyn Provider>, namespace: Namespace, config: ConversationConfig) -> Self {
        Self {
            provider,
            namespace,
            config,
            history: Vec::new(),
            unsent_results: Vec::new(),
            catalog: None,
            event_handler: &NoopHandler,
            stop_signal: None,
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Attach a stop signal. The closure is called before each turn; if it
    /// returns `true` the run ends with [`StopReason::Cancelled`].
    pub fn with_stop_signal(mut self, signal: impl Fn() -> bool + Send + Sync + 'a) -> Self {
        self.stop_signal = Some(Box::new(signal));
        self
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Register a Rust callable. Tool descriptors are rebuilt on next use.
    pub fn register_native(&mut self, function: NativeFunction) {
        self.namespace.register_native(function);
        self.catalog = None;
    }

    /// Descriptors for every callable in the namespace.
    pub fn descriptors(&mut self) -> Result<&[ToolDescriptor]> {
        Ok(&self.catalog()?.descriptors)
    }

    fn catalog(&mut self) -> Result<&ToolCatalog> {
        let catalog = match self.catalog.take() {
            Some(catalog) => catalog,
            None => {
                let descriptors =
                    build_descriptors(&self.namespace, &IndexMap::new(), self.config.schema)?;
                let definitions = self.provider.tool_definitions(&descriptors);
                debug!(
                    "Built {} tool descriptors for {}",
                    descriptors.len(),
                    self.provider.name()
                );
                ToolCatalog {
                    descriptors,
                    definitions,
                }
            }
        };
        Ok(self.catalog.insert(catalog))
    }

    /// Transcript of every turn so far as pretty-printed JSON.
    pub fn transcript_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.history)?)
    }

    /// Run the loop for one user prompt.
    pub async fn run(&mut self, prompt: &str) -> Result<RunOutcome> {
        self.catalog()?;
        let trace_id = generate_trace_id();
        let max_turns = self.config.max_turns;
        info!(
            "Conversation run {}: provider={}, tools={}, max_turns={}",
            trace_id,
            self.provider.name(),
            self.namespace.len(),
            max_turns
        );

        let mut message = prompt.to_string();
        let mut outcome = RunOutcome {
            trace_id,
            text: String::new(),
            tool_results: Vec::new(),
            turns_used: 0,
            stop: StopReason::TurnLimit,
            usage: Usage::default(),
        };

        for turn in 1..=max_turns {
            if let Some(ref signal) = self.stop_signal
                && signal()
            {
                outcome.stop = StopReason::Cancelled;
                self.event_handler.on_event(&ConversationEvent::Cancelled);
                return Ok(outcome);
            }

            self.event_handler
                .on_event(&ConversationEvent::TurnStart { turn, max_turns });
            let pending = std::mem::take(&mut self.unsent_results);
            let reply = match self.request(&message, &pending).await {
                Ok(reply) => reply,
                Err(e) => {
                    self.unsent_results = pending;
                    return Err(e);
                }
            };
            outcome.turns_used = turn;

            if let Some(usage) = reply.usage {
                outcome.usage.add(&usage);
                self.event_handler.on_event(&ConversationEvent::TokenUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                });
            }
            if !reply.text.is_empty() {
                self.event_handler
                    .on_event(&ConversationEvent::Text(&reply.text));
            }
            outcome.text = reply.text.clone();

            let calls = reply.tool_calls.clone();
            self.history.push(ConversationTurn {
                message: std::mem::take(&mut message),
                tool_results: pending,
                reply,
                timestamp: Utc::now(),
            });

            if calls.is_empty() {
                outcome.stop = StopReason::Completed;
                self.event_handler.on_event(&ConversationEvent::Finished);
                return Ok(outcome);
            }

            self.event_handler
                .on_event(&ConversationEvent::ToolCallsReceived {
                    turn,
                    count: calls.len(),
                });
            let results = self.execute_calls(&calls).await?;
            outcome.tool_results.extend(results.iter().cloned());
            self.unsent_results = results;
        }

        self.event_handler
            .on_event(&ConversationEvent::TurnLimitReached { max_turns });
        Ok(outcome)
    }

    /// One provider round trip with timeout and transient-error retry.
    async fn request(&self, message: &str, results: &[ToolResult]) -> Result<ProviderReply> {
        let tools = self
            .catalog
            .as_ref()
            .map(|c| c.definitions.as_slice())
            .unwrap_or_default();
        let request = ProviderRequest {
            system: &self.config.system_prompt,
            history: &self.history,
            message,
            tool_results: results,
            tools,
            temperature: self.config.temperature,
        };
        let provider = self.provider.as_ref();
        let timeout = self.config.provider_timeout;
        let handler = self.event_handler;

        retry_transient(
            &self.config.provider_retry,
            move || async move {
                match tokio::time::timeout(timeout, provider.complete(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        operation: "provider call".into(),
                        seconds: timeout.as_secs_f64(),
                    }),
                }
            },
            |attempt, err, delay| {
                handler.on_event(&ConversationEvent::Retry {
                    operation: "provider call",
                    attempt,
                    delay,
                    error: &err.to_string(),
                });
            },
        )
        .await
    }

    /// Execute every call in order. All names are resolved before anything
    /// runs, so an unknown name fails without invoking any callable.
    async fn execute_calls(&self, calls: &[ToolCallRequest]) -> Result<Vec<ToolResult>> {
        let callables = namespace::resolve_all(&self.namespace, calls.iter().map(|c| c.name.as_str()))?;

        let mut results = Vec::with_capacity(calls.len());
        for (call, callable) in calls.iter().zip(callables) {
            self.event_handler.on_event(&ConversationEvent::ToolExecuting {
                name: &call.name,
                arguments: &call.arguments,
            });
            let result = match self.invoke(call, callable.as_ref()).await {
                Ok(output) => ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    output,
                    is_error: false,
                },
                Err(e) => match self.config.tool_errors {
                    ToolErrorPolicy::Fail => return Err(e),
                    ToolErrorPolicy::ReportToModel => {
                        warn!("Tool '{}' failed, reporting to model: {e}", call.name);
                        ToolResult {
                            call_id: call.id.clone(),
                            name: call.name.clone(),
                            output: json!({ "error": e.to_string() }),
                            is_error: true,
                        }
                    }
                },
            };
            self.event_handler.on_event(&ConversationEvent::ToolResult {
                name: &result.name,
                call_id: &result.call_id,
                output: &result.output,
                is_error: result.is_error,
            });
            results.push(result);
        }
        Ok(results)
    }

    /// Validate, then invoke with the configured timeout and retries.
    async fn invoke(&self, call: &ToolCallRequest, callable: &dyn Callable) -> Result<Value> {
        let Value::Object(args) = &call.arguments else {
            return Err(Error::tool_failed(
                &call.name,
                format!("arguments must be a JSON object, got {}", call.arguments),
            ));
        };
        if self.config.validate_args
            && let Some(descriptor) = self
                .catalog
                .as_ref()
                .and_then(|c| c.descriptors.iter().find(|d| d.name == call.name))
            && let Some(message) = validate_arguments(descriptor, &call.arguments)
        {
            return Err(Error::tool_failed(&call.name, message));
        }

        let mut attempt = 0;
        loop {
            let invocation = callable.invoke(args.clone());
            let result = match self.config.tool_timeout {
                Some(limit) => match tokio::time::timeout(limit, invocation).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::tool_failed(
                        &call.name,
                        format!("timed out after {limit:?}"),
                    )),
                },
                None => invocation.await,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.tool_retries => {
                    attempt += 1;
                    warn!(
                        "Tool '{}' failed (attempt {}/{}): {e}",
                        call.name,
                        attempt,
                        self.config.tool_retries + 1
                    );
                    self.event_handler.on_event(&ConversationEvent::Retry {
                        operation: &call.name,
                        attempt,
                        delay: Duration::ZERO,
                        error: &e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Check `arguments` against the descriptor's JSON Schema.
///
/// Returns `None` if valid, or a message listing every violation.
pub fn validate_arguments(descriptor: &ToolDescriptor, arguments: &Value) -> Option<String> {
    let schema = descriptor.to_json_schema();
    let validator = jsonschema::validator_for(&schema).ok()?;
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
