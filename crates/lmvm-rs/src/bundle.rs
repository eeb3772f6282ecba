//! Tool bundles: newline-delimited lists of tool identifiers.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ordered tool identifiers read from one bundle resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBundle {
    pub name: String,
    pub tool_ids: Vec<String>,
}

impl ToolBundle {
    /// Parse bundle content. Lines are trimmed and blank lines ignored.
    pub fn parse(name: impl Into<String>, content: &str) -> Self {
        let tool_ids = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        Self {
            name: name.into(),
            tool_ids,
        }
    }

    /// Load `name` from disk. `name` is used as a path if it exists as
    /// given, otherwise it is looked up under `bundles_dir`.
    pub async fn load(bundles_dir: &Path, name: &str) -> Result<Self> {
        let path = resolve(bundles_dir, name).await?;
        let content = tokio::fs::read_to_string(&path).await?;
        let bundle = Self::parse(name, &content);
        debug!(
            "Loaded bundle '{}' from {}: {} tools",
            name,
            path.display(),
            bundle.tool_ids.len()
        );
        Ok(bundle)
    }

    pub fn is_empty(&self) -> bool {
        self.tool_ids.is_empty()
    }
}

async fn resolve(bundles_dir: &Path, name: &str) -> Result<PathBuf> {
    for candidate in [PathBuf::from(name), bundles_dir.join(name)] {
        if tokio::fs::metadata(&candidate)
            .await
            .is_ok_and(|meta| meta.is_file())
        {
            return Ok(candidate);
        }
    }
    Err(Error::bundle_not_found(name))
}
