//! Structural parser for Python tool source.
//!
//! This is not a Python parser. It recovers exactly what tool extraction
//! needs: logical lines, the indentation block tree, `def` headers with
//! their parameter lists, docstrings, and import statements. Everything
//! else is treated as an opaque statement. Malformed structure (unterminated
//! strings, unbalanced brackets, bad indentation, broken `def` or import
//! statements) is reported as a [`SyntaxError`] with a 1-based line.

mod lines;
mod syntax;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub(crate) use syntax::string_literal_value;

/// A structural error at a 1-based line of the parsed text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// How a parameter can be bound at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    KeywordOnly,
    VarPositional,
    VarKeyword,
}

impl ParamKind {
    /// `*args` / `**kwargs` collectors have no schema of their own.
    pub fn is_variadic(self) -> bool {
        matches!(self, ParamKind::VarPositional | ParamKind::VarKeyword)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: String,
    /// Annotation source text, whitespace-collapsed. String annotations
    /// (`x: "int"`) are unquoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Default value source text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub kind: ParamKind,
}

impl Parameter {
    /// A positional-or-keyword parameter.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            default: None,
            kind: ParamKind::PositionalOrKeyword,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Ordered parameter list plus return annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub params: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

impl Signature {
    /// Parameters a caller supplies by name in a JSON object. Positional-only
    /// parameters are included; Python callables rebind them by position.
    pub fn named_params(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(|p| !p.kind.is_variadic())
    }
}

/// A `def` statement found anywhere in the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub signature: Signature,
    pub docstring: Option<String>,
    /// Line of the `def` keyword (decorators are not included).
    pub start_line: usize,
    /// Last line of the body.
    pub end_line: usize,
    /// Number of enclosing blocks.
    pub depth: usize,
    /// Enclosed by another `def` or a `class`.
    pub nested: bool,
    pub is_async: bool,
}

/// One canonicalized import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub text: String,
    pub line: usize,
    pub depth: usize,
}

/// Everything extraction needs from one source text.
///
/// Both lists are in breadth-first order: by block depth, then by position.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: Vec<FunctionDef>,
    pub imports: Vec<Import>,
}

/// Parse `src` into function definitions and imports.
pub fn parse_module(src: &str) -> Result<Module, SyntaxError> {
    let logical = lines::logical_lines(src)?;
    let tree = lines::block_tree(&logical)?;

    let mut module = Module::default();
    collect(&tree, 0, false, &mut module)?;
    module.functions.sort_by_key(|f| f.depth);
    module.imports.sort_by_key(|i| i.depth);
    Ok(module)
}

fn collect(
    stmts: &[lines::Stmt],
    depth: usize,
    nested: bool,
    module: &mut Module,
) -> Result<(), SyntaxError> {
    for stmt in stmts {
        let code = stmt.line.code.as_str();
        let line = stmt.line.start;

        for text in syntax::parse_imports(code, line)? {
            module.imports.push(Import { text, line, depth });
        }

        if syntax::is_def(code) {
            let header = syntax::parse_def(code, line)?;
            let first_stmt = match &header.inline_body {
                Some(inline) => syntax::split_top_level(inline, ';')
                    .first()
                    .map(|s| s.trim().to_string()),
                None => stmt.body.first().map(|s| s.line.code.clone()),
            };
            let docstring = first_stmt
                .as_deref()
                .and_then(string_literal_value)
                .map(|doc| syntax::clean_doc(&doc));
            module.functions.push(FunctionDef {
                name: header.name,
                signature: header.signature,
                docstring,
                start_line: line,
                end_line: stmt.end_line(),
                depth,
                nested,
                is_async: header.is_async,
            });
            collect(&stmt.body, depth + 1, true, module)?;
        } else if syntax::is_class(code) {
            collect(&stmt.body, depth + 1, true, module)?;
        } else {
            collect(&stmt.body, depth + 1, nested, module)?;
        }
    }
    Ok(())
}

/// Shift a statement extracted from inside a block back to column zero.
///
/// The indentation of the first statement line is removed from every line
/// that starts a logical line, and from blank and comment lines that carry
/// it. Continuation lines are left verbatim, so the content of multi-line
/// strings never changes.
pub fn dedent(src: &str) -> String {
    let Some(first) = src
        .lines()
        .find(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
    else {
        return src.to_string();
    };
    let margin = first
        .strip_suffix(first.trim_start_matches([' ', '\t']))
        .unwrap_or_default();
    if margin.is_empty() {
        return src.to_string();
    }

    let continuations: HashSet<usize> = match lines::logical_lines(src) {
        Ok(logical) => logical.iter().flat_map(|l| l.start + 1..=l.end).collect(),
        Err(_) => HashSet::new(),
    };
    src.split_inclusive('\n')
        .enumerate()
        .map(|(i, line)| {
            if continuations.contains(&(i + 1)) {
                line
            } else {
                line.strip_prefix(margin).unwrap_or(line)
            }
        })
        .collect()
}
