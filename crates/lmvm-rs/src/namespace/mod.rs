//! The callable namespace a conversation dispatches tool calls into.
//!
//! A [`Namespace`] maps function names to [`Callable`]s. Python functions
//! come from [`NamespaceBuilder::build`], which starts one interpreter per
//! namespace, evaluates the extracted imports and function sources in it
//! once, and keeps only the names that end up bound to callables. Calls
//! share that interpreter's module state. Rust functions are added with
//! [`Namespace::register_native`].

mod native;
mod python;

pub use native::NativeFunction;
pub use python::{EvaluationUnit, PythonFunction};
pub(crate) use python::check_syntax;

use python::PythonSession;

use crate::error::{Error, Result};
use crate::extract::{ExtractedFunction, Extraction, ImportStatement};
use crate::parse::{self, Signature};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Interpreter used when none is configured.
pub const DEFAULT_PYTHON: &str = "python3";

/// Boxed future returned by [`Callable::invoke`].
pub type CallFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Something the model can call by name with keyword arguments.
pub trait Callable: Send + Sync {
    fn name(&self) -> &str;

    /// Parameters in declaration order.
    fn signature(&self) -> &Signature;

    /// Human-readable description, if the callable carries one.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Call with keyword arguments. Failures are [`Error::ToolExecution`].
    fn invoke(&self, args: Map<String, Value>) -> CallFuture<'_>;
}

/// Name-ordered collection of callables.
#[derive(Default, Clone)]
pub struct Namespace {
    callables: IndexMap<String, Arc<dyn Callable>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Callable>> {
        self.callables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callables.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.callables.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Callable>> {
        self.callables.values()
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }

    /// Add a Rust callable, replacing any callable of the same name.
    pub fn register_native(&mut self, function: NativeFunction) {
        self.insert(Arc::new(function));
    }

    /// Add any callable, replacing one of the same name.
    pub fn insert(&mut self, callable: Arc<dyn Callable>) {
        let name = callable.name().to_string();
        if self.callables.contains_key(&name) {
            warn!("Replacing callable '{}' in namespace", name);
        }
        self.callables.insert(name, callable);
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.callables.keys()).finish()
    }
}

/// Evaluates extracted sources into a [`Namespace`].
#[derive(Debug, Clone)]
pub struct NamespaceBuilder {
    python: PathBuf,
}

impl Default for NamespaceBuilder {
    fn default() -> Self {
        Self {
            python: PathBuf::from(DEFAULT_PYTHON),
        }
    }
}

impl NamespaceBuilder {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// Build from a full extraction.
    pub async fn build_extraction(&self, extraction: &Extraction) -> Result<Namespace> {
        self.build(&extraction.imports, &extraction.functions).await
    }

    /// Start the namespace's interpreter and evaluate all imports, then
    /// every function source, in its single module scope. Names that do not
    /// end up bound to callables are left out.
    ///
    /// Any exception raised during evaluation is an [`Error::Evaluation`]
    /// carrying the interpreter's traceback. The interpreter lives as long as
    /// any Python function of the returned namespace.
    pub async fn build(
        &self,
        imports: &[ImportStatement],
        functions: &IndexMap<String, ExtractedFunction>,
    ) -> Result<Namespace> {
        if functions.is_empty() {
            debug!("No functions extracted; namespace is empty");
            return Ok(Namespace::new());
        }
        let unit = EvaluationUnit {
            imports: imports.iter().map(|i| i.text.clone()).collect(),
            sources: functions
                .values()
                .map(|f| parse::dedent(&f.source_text))
                .collect(),
        };
        let names: Vec<String> = functions.keys().cloned().collect();
        let (session, bound) = PythonSession::start(self.python.clone(), unit, names).await?;

        let mut namespace = Namespace::new();
        for (name, record) in functions {
            if !bound.contains(name) {
                warn!("'{}' is not callable after evaluation; skipping", name);
                continue;
            }
            namespace.insert(Arc::new(PythonFunction::new(
                name.clone(),
                record.signature.clone(),
                record.docstring.clone(),
                session.clone(),
            )));
        }
        info!(
            "Namespace ready: {} callables ({})",
            namespace.len(),
            namespace.names().collect::<Vec<_>>().join(", ")
        );
        Ok(namespace)
    }
}

/// Resolve every name before any call runs.
pub(crate) fn resolve_all<'a>(
    namespace: &'a Namespace,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<Arc<dyn Callable>>> {
    names
        .into_iter()
        .map(|name| {
            namespace
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UnknownTool(name.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Parameter;
    use serde_json::json;

    fn echo(name: &str) -> NativeFunction {
        let sig = Signature {
            params: vec![Parameter::new("x").with_annotation("str")],
            returns: None,
        };
        NativeFunction::new(name, sig, |args| async move {
            Ok(args.get("x").cloned().unwrap_or(Value::Null))
        })
    }

    #[test]
    fn register_and_lookup() {
        let mut ns = Namespace::new();
        ns.register_native(echo("a"));
        ns.register_native(echo("b"));
        assert_eq!(ns.len(), 2);
        assert!(ns.contains("a"));
        assert_eq!(ns.names().collect::<Vec<_>>(), ["a", "b"]);

        // Re-registering keeps the original position.
        ns.register_native(echo("a").with_description("again"));
        assert_eq!(ns.names().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(ns.get("a").unwrap().description(), Some("again"));
    }

    #[test]
    fn resolve_all_fails_on_first_unknown() {
        let mut ns = Namespace::new();
        ns.register_native(echo("a"));
        assert_eq!(resolve_all(&ns, ["a", "a"]).unwrap().len(), 2);
        let err = resolve_all(&ns, ["a", "ghost"]).err().unwrap();
        assert!(matches!(err, Error::UnknownTool(ref n) if n == "ghost"));
    }

    #[tokio::test]
    async fn empty_extraction_needs_no_interpreter() {
        let builder = NamespaceBuilder::new("/nonexistent/python-for-lmvm-tests");
        let ns = builder
            .build_extraction(&Extraction::default())
            .await
            .unwrap();
        assert!(ns.is_empty());
    }

    #[tokio::test]
    async fn invokes_native_callable() {
        let mut ns = Namespace::new();
        ns.register_native(echo("echo"));
        let args = json!({"x": "hi"}).as_object().cloned().unwrap();
        let out = ns.get("echo").unwrap().invoke(args).await.unwrap();
        assert_eq!(out, json!("hi"));
    }
}
