//! Extraction pipeline: tool folders in, function records and imports out.
//!
//! For each tool id of a bundle, in bundle order:
//!
//! 1. resolve `tools_dir/<id>`,
//! 2. install `requirements.txt` through the configured [`DependencyInstaller`],
//! 3. concatenate the tool's `.py` files into one blob ([`ToolSource`]),
//! 4. compile-check the blob with the interpreter's parser ([`SyntaxCheck`]),
//!    then parse it and collect every `def` and import statement.
//!
//! Results of all tools are merged into one [`Extraction`]. When two tools
//! define the same function name the later tool wins.

pub mod deps;
pub mod source;

use crate::error::{Error, Result};
use crate::namespace::{self, DEFAULT_PYTHON};
use crate::parse::{self, Signature};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

pub use deps::{DependencyInstaller, InstallFuture, PipInstaller, SkipInstall};
pub use source::ToolSource;

/// Which function definitions are extracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NestedFunctions {
    /// Every `def` at any depth, including methods and inner functions.
    #[default]
    Include,
    /// Only functions not enclosed by another `def` or a `class`.
    TopLevelOnly,
}

/// How a tool's source blob is validated before functions are collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxCheck {
    /// Compile the whole blob with this interpreter's own parser. Any
    /// syntax error anywhere in the blob aborts extraction.
    Interpreter(PathBuf),
    /// Structural parse only: brackets, strings, indentation, `def`
    /// headers and imports. Other malformed statements go unnoticed until
    /// evaluation.
    Structural,
}

impl Default for SyntaxCheck {
    fn default() -> Self {
        SyntaxCheck::Interpreter(PathBuf::from(DEFAULT_PYTHON))
    }
}

/// Extraction settings.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Directory holding one folder per tool id.
    pub tools_dir: PathBuf,
    pub nested: NestedFunctions,
    pub syntax_check: SyntaxCheck,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            tools_dir: PathBuf::from("tools"),
            nested: NestedFunctions::default(),
            syntax_check: SyntaxCheck::default(),
        }
    }
}

impl ExtractConfig {
    pub fn new(tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_nested(mut self, nested: NestedFunctions) -> Self {
        self.nested = nested;
        self
    }

    pub fn with_syntax_check(mut self, check: SyntaxCheck) -> Self {
        self.syntax_check = check;
        self
    }
}

/// One function definition pulled out of a tool's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFunction {
    pub name: String,
    /// Verbatim source from the `def` line through the last body line.
    pub source_text: String,
    pub docstring: Option<String>,
    pub signature: Signature,
    /// Id of the tool that defined it.
    pub tool: String,
    pub nested: bool,
    pub is_async: bool,
    /// 1-based line of the `def` inside the tool's blob.
    pub line: usize,
}

/// Canonical text of one import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    pub text: String,
    pub tool: String,
}

impl std::fmt::Display for ImportStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Merged output of the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Function name to record. Insertion-ordered; a redefinition replaces
    /// the record but keeps the original position.
    pub functions: IndexMap<String, ExtractedFunction>,
    /// Imports in bundle order, then source order. Not deduplicated.
    pub imports: Vec<ImportStatement>,
}

impl Extraction {
    /// Extract a single already-collected source blob.
    pub fn from_source(source: &ToolSource, nested: NestedFunctions) -> Result<Self> {
        let module = parse::parse_module(&source.text).map_err(|e| source.parse_error(e))?;

        let mut extraction = Self::default();
        for def in module.functions {
            if def.nested && nested == NestedFunctions::TopLevelOnly {
                continue;
            }
            let record = ExtractedFunction {
                source_text: source.lines(def.start_line, def.end_line),
                name: def.name,
                docstring: def.docstring,
                signature: def.signature,
                tool: source.tool.clone(),
                nested: def.nested,
                is_async: def.is_async,
                line: def.start_line,
            };
            extraction.insert(record);
        }
        extraction.imports = module
            .imports
            .into_iter()
            .map(|i| ImportStatement {
                text: i.text,
                tool: source.tool.clone(),
            })
            .collect();
        Ok(extraction)
    }

    fn insert(&mut self, record: ExtractedFunction) {
        if let Some(previous) = self.functions.get(&record.name) {
            warn!(
                "Function '{}' from tool '{}' replaces the definition from tool '{}'",
                record.name, record.tool, previous.tool
            );
        }
        self.functions.insert(record.name.clone(), record);
    }

    /// Fold `other` into `self`; `other` wins name collisions.
    pub fn merge(&mut self, other: Extraction) {
        for (_, record) in other.functions {
            self.insert(record);
        }
        self.imports.extend(other.imports);
    }

    /// Import texts in order.
    pub fn import_lines(&self) -> Vec<String> {
        self.imports.iter().map(|i| i.text.clone()).collect()
    }
}

/// Runs the pipeline for a list of tool ids.
pub struct Extractor {
    config: ExtractConfig,
    installer: Box<dyn DependencyInstaller>,
}

impl Extractor {
    /// Extractor that installs requirements with [`PipInstaller`].
    pub fn new(config: ExtractConfig) -> Self {
        Self {
            config,
            installer: Box::new(PipInstaller::default()),
        }
    }

    pub fn with_installer(mut self, installer: impl DependencyInstaller + 'static) -> Self {
        self.installer = Box::new(installer);
        self
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Extract every tool in order and merge the results.
    pub async fn extract(&self, tool_ids: &[String]) -> Result<Extraction> {
        let mut merged = Extraction::default();
        for id in tool_ids {
            let extraction = self.extract_tool(id).await?;
            merged.merge(extraction);
        }
        info!(
            "Extracted {} functions and {} imports from {} tools",
            merged.functions.len(),
            merged.imports.len(),
            tool_ids.len()
        );
        Ok(merged)
    }

    /// Run steps 1-4 for a single tool id.
    pub async fn extract_tool(&self, id: &str) -> Result<Extraction> {
        let root = self.tool_dir(id).await?;

        let requirements = root.join("requirements.txt");
        if is_file(&requirements).await {
            self.installer.install(id, &requirements).await?;
        }

        let source = ToolSource::collect(id, &root).await?;
        debug!(
            "Tool '{}': {} source files, {} bytes",
            id,
            source.file_count(),
            source.text.len()
        );
        if let SyntaxCheck::Interpreter(python) = &self.config.syntax_check
            && let Some(err) = namespace::check_syntax(python, &source.text).await?
        {
            return Err(source.parse_error(err));
        }
        let extraction = Extraction::from_source(&source, self.config.nested)?;
        debug!(
            "Tool '{}': functions=[{}], imports={}",
            id,
            extraction
                .functions
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            extraction.imports.len()
        );
        Ok(extraction)
    }

    async fn tool_dir(&self, id: &str) -> Result<PathBuf> {
        let invalid = id.is_empty()
            || id.contains(['/', '\\'])
            || id.contains("..")
            || Path::new(id).is_absolute();
        if invalid {
            return Err(Error::tool_not_found(id));
        }
        let dir = self.config.tools_dir.join(id);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            _ => Err(Error::tool_not_found(id)),
        }
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|meta| meta.is_file())
}
