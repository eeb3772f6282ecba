//! Error taxonomy shared by every stage of the pipeline.
//!
//! Extraction and configuration failures are fatal and surface unchanged.
//! The conversation loop retries only transient [`Error::Provider`] and
//! [`Error::Timeout`] failures of provider calls, and [`Error::ToolExecution`]
//! failures of tool calls, within the bounds configured on
//! [`ConversationConfig`](crate::conversation::ConversationConfig).

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A bundle file or tool folder could not be located.
    #[error("{kind} not found: {name}")]
    ResourceNotFound { kind: &'static str, name: String },

    /// Tool source text is structurally malformed.
    #[error("parse error in tool '{tool}' at {}:{line}: {message}", file.display())]
    Parse {
        tool: String,
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("failed to install dependencies for tool '{tool}': {message}")]
    DependencyInstall { tool: String, message: String },

    /// The interpreter rejected the merged imports / function sources.
    #[error("namespace evaluation failed: {0}")]
    Evaluation(String),

    #[error("cannot build schema for tool '{tool}': {message}")]
    Schema { tool: String, message: String },

    #[error("unknown tool '{0}' requested by the model")]
    UnknownTool(String),

    #[error("provider error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Provider {
        status: Option<u16>,
        message: String,
        /// Set when the failure is worth retrying: a retryable HTTP status,
        /// or a request that timed out or never connected.
        transient: bool,
    },

    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("{operation} timed out after {seconds:.0}s")]
    Timeout { operation: String, seconds: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn bundle_not_found(name: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: "bundle",
            name: name.into(),
        }
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: "tool",
            name: name.into(),
        }
    }

    /// Provider failure classified by its HTTP status alone.
    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::Provider {
            status,
            message: message.into(),
            transient: status.is_some_and(crate::provider::retry::is_transient_status),
        }
    }

    /// A request that did not produce a usable response.
    pub fn request_failed(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        Error::Provider {
            status,
            transient: err.is_timeout()
                || err.is_connect()
                || status.is_some_and(crate::provider::retry::is_transient_status),
            message: format!("request failed: {err}"),
        }
    }

    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Only provider errors flagged transient when they were raised, and
    /// timeouts, qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Provider { transient, .. } => *transient,
            Error::Timeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_display_includes_status() {
        let err = Error::provider(Some(429), "rate limited");
        assert_eq!(err.to_string(), "provider error (HTTP 429): rate limited");
        let err = Error::provider(None, "request failed: connection reset");
        assert_eq!(
            err.to_string(),
            "provider error: request failed: connection reset"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(Error::provider(Some(503), "unavailable").is_transient());
        assert!(!Error::provider(None, "request failed: timed out").is_transient());
        assert!(!Error::provider(Some(401), "unauthorized").is_transient());
        assert!(!Error::UnknownTool("x".into()).is_transient());
        assert!(
            Error::Timeout {
                operation: "provider call".into(),
                seconds: 3.0
            }
            .is_transient()
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        // Nothing listens on port 9 of the loopback interface.
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        let err = Error::request_failed(err);
        assert!(err.is_transient(), "{err}");
        assert!(matches!(err, Error::Provider { status: None, .. }));
    }

    #[test]
    fn not_found_messages() {
        assert_eq!(
            Error::tool_not_found("ghost").to_string(),
            "tool not found: ghost"
        );
        assert_eq!(
            Error::bundle_not_found("math.lmvm").to_string(),
            "bundle not found: math.lmvm"
        );
    }
}
