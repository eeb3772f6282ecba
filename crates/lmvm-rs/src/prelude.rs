//! Convenience re-exports for common `lmvm-rs` types.
//!
//! ```ignore
//! use lmvm_rs::prelude::*;
//! ```
//!
//! Covers loading a bundle, building a namespace, and running a
//! conversation. Wire types and parser internals stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Error, Result, json_schema_for};

// ── Loading tools ───────────────────────────────────────────────────
pub use crate::bundle::ToolBundle;
pub use crate::extract::{
    DependencyInstaller, ExtractConfig, ExtractedFunction, Extraction, Extractor,
    ImportStatement, NestedFunctions, PipInstaller, SkipInstall, SyntaxCheck,
};
pub use crate::loader::{BundleLoader, LoadedBundle};
pub use crate::namespace::{Callable, Namespace, NamespaceBuilder, NativeFunction};
pub use crate::parse::{Parameter, Signature};
pub use crate::schema::{SchemaOptions, ToolDescriptor, UnannotatedParams, build_descriptors};

// ── Conversation runtime ────────────────────────────────────────────
pub use crate::conversation::{
    Conversation, ConversationConfig, ConversationEvent, ConversationTurn, EventHandler,
    FnEventHandler, LoggingHandler, NoopHandler, RunOutcome, StopReason, ToolErrorPolicy,
};
pub use crate::provider::retry::RetryConfig;
pub use crate::provider::{
    Provider, ProviderKind, ProviderReply, ProviderSettings, ToolCallRequest, ToolResult,
};
