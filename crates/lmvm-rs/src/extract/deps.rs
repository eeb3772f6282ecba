//! Dependency installation for tool folders that ship a `requirements.txt`.

use crate::error::{Error, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::{debug, info};

/// Boxed future returned by [`DependencyInstaller::install`].
pub type InstallFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Installs the packages listed in a tool's requirements file.
///
/// Failures are fatal to extraction and must be reported as
/// [`Error::DependencyInstall`].
pub trait DependencyInstaller: Send + Sync {
    fn install<'a>(&'a self, tool: &'a str, requirements: &'a Path) -> InstallFuture<'a>;
}

/// Runs `<python> -m pip install -r <requirements>`.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    pub python: PathBuf,
    pub extra_args: Vec<String>,
}

impl Default for PipInstaller {
    fn default() -> Self {
        Self {
            python: PathBuf::from(crate::namespace::DEFAULT_PYTHON),
            extra_args: Vec::new(),
        }
    }
}

impl PipInstaller {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            ..Default::default()
        }
    }

    /// Append an extra argument to every `pip install` invocation
    /// (e.g. `--quiet`, `--user`).
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

impl DependencyInstaller for PipInstaller {
    fn install<'a>(&'a self, tool: &'a str, requirements: &'a Path) -> InstallFuture<'a> {
        Box::pin(async move {
            info!(
                "Installing dependencies for '{}' from {}",
                tool,
                requirements.display()
            );
            let output = tokio::process::Command::new(&self.python)
                .args(["-m", "pip", "install", "-r"])
                .arg(requirements)
                .args(&self.extra_args)
                .output()
                .await
                .map_err(|e| Error::DependencyInstall {
                    tool: tool.to_string(),
                    message: format!("failed to run {}: {e}", self.python.display()),
                })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(Error::DependencyInstall {
                    tool: tool.to_string(),
                    message: format!("pip exited with {}: {}", output.status, stderr.trim()),
                });
            }
            debug!("pip output for '{}': {}", tool, String::from_utf8_lossy(&output.stdout).trim());
            Ok(())
        })
    }
}

/// Skips installation. For offline runs or environments that are already
/// provisioned.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipInstall;

impl DependencyInstaller for SkipInstall {
    fn install<'a>(&'a self, tool: &'a str, requirements: &'a Path) -> InstallFuture<'a> {
        Box::pin(async move {
            info!(
                "Skipping dependency install for '{}' ({})",
                tool,
                requirements.display()
            );
            Ok(())
        })
    }
}
