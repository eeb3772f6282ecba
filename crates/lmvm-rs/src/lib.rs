//! Load Python tool bundles and expose them to LLM tool-calling conversations.
//!
//! `lmvm-rs` reads a named bundle of tool ids, extracts every function and
//! import from each tool's Python sources, evaluates them in a host Python
//! interpreter, and hands the resulting callables to a model as tools. The
//! [`Conversation`](conversation::Conversation) loop sends a prompt, executes
//! the tool calls the model asks for, feeds the results back, and repeats
//! until the model answers in plain text or a turn limit is reached.
//!
//! # Getting started
//!
//! ```ignore
//! use lmvm_rs::prelude::*;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> lmvm_rs::Result<()> {
//!     let bundle = ToolBundle::load(Path::new("bundles"), "math.lmvm").await?;
//!     let extraction = Extractor::new(ExtractConfig::new("tools"))
//!         .extract(&bundle.tool_ids)
//!         .await?;
//!     let namespace = NamespaceBuilder::default()
//!         .build_extraction(&extraction)
//!         .await?;
//!
//!     let provider = ProviderSettings::new(ProviderKind::OpenRouter)
//!         .with_env_key()
//!         .build()?;
//!     let mut conversation =
//!         Conversation::new(provider, namespace, ConversationConfig::default())
//!             .with_event_handler(&LoggingHandler);
//!
//!     let outcome = conversation.run("What is 2 + 5?").await?;
//!     println!("{}", outcome.text);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bundle`] | [`ToolBundle`](bundle::ToolBundle): newline-delimited tool ids |
//! | [`extract`] | [`Extractor`](extract::Extractor): dependency install, source collection, function and import extraction |
//! | [`parse`] | Structural Python parser: logical lines, blocks, `def` headers, imports, docstrings |
//! | [`namespace`] | [`Namespace`](namespace::Namespace) of Python-backed and native callables |
//! | [`schema`] | [`ToolDescriptor`](schema::ToolDescriptor) and JSON Schema generation |
//! | [`provider`] | [`Provider`](provider::Provider) trait, OpenAI-compatible and Anthropic clients, retry |
//! | [`conversation`] | The tool-calling loop, events, run outcomes |
//! | [`loader`] | [`BundleLoader`](loader::BundleLoader): bundle name to namespace, descriptors, and conversation |
//!
//! Tool code is not sandboxed. It runs with the full privileges of the
//! interpreter subprocess.

pub mod bundle;
pub mod conversation;
pub mod error;
pub mod extract;
pub mod loader;
pub mod namespace;
pub mod parse;
pub mod prelude;
pub mod provider;
pub mod schema;

use schemars::JsonSchema;

pub use error::{Error, Result};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default model for OpenRouter.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Native tools use it to derive their signature.
///
/// # Example
///
/// ```
/// use lmvm_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct AddArgs {
///     a: i64,
///     #[serde(default)]
///     b: Option<i64>,
/// }
///
/// let schema = json_schema_for::<AddArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"a".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
