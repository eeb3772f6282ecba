//! Statement-level parsing: `def` headers, import statements, and string
//! literals used as docstrings.

use super::{ParamKind, Parameter, Signature, SyntaxError};

/// One character of a statement with its bracket depth and whether it sits
/// inside a string literal. Matching brackets share the same depth.
struct Tok {
    pos: usize,
    ch: char,
    depth: usize,
    quoted: bool,
}

fn scan(s: &str) -> Vec<Tok> {
    let chars: Vec<(usize, char)> = s.char_indices().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut depth = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let (pos, ch) = chars[i];
        if ch == '\'' || ch == '"' {
            let triple = i + 2 < chars.len() && chars[i + 1].1 == ch && chars[i + 2].1 == ch;
            let width = if triple { 3 } else { 1 };
            for &(p, c) in &chars[i..(i + width).min(chars.len())] {
                out.push(Tok {
                    pos: p,
                    ch: c,
                    depth,
                    quoted: true,
                });
            }
            i += width;
            while i < chars.len() {
                let (p, c) = chars[i];
                out.push(Tok {
                    pos: p,
                    ch: c,
                    depth,
                    quoted: true,
                });
                if c == '\\' {
                    if let Some(&(p2, c2)) = chars.get(i + 1) {
                        out.push(Tok {
                            pos: p2,
                            ch: c2,
                            depth,
                            quoted: true,
                        });
                    }
                    i += 2;
                    continue;
                }
                i += 1;
                if c == ch {
                    if !triple {
                        break;
                    }
                    if i + 1 < chars.len() && chars[i].1 == ch && chars[i + 1].1 == ch {
                        for &(p3, c3) in &chars[i..i + 2] {
                            out.push(Tok {
                                pos: p3,
                                ch: c3,
                                depth,
                                quoted: true,
                            });
                        }
                        i += 2;
                        break;
                    }
                }
            }
            continue;
        }
        match ch {
            '(' | '[' | '{' => {
                out.push(Tok {
                    pos,
                    ch,
                    depth,
                    quoted: false,
                });
                depth += 1;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                out.push(Tok {
                    pos,
                    ch,
                    depth,
                    quoted: false,
                });
            }
            _ => out.push(Tok {
                pos,
                ch,
                depth,
                quoted: false,
            }),
        }
        i += 1;
    }
    out
}

/// Split `s` on `sep` wherever it appears outside brackets and strings.
pub(crate) fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut last = 0;
    for tok in scan(s) {
        if tok.ch == sep && tok.depth == 0 && !tok.quoted {
            parts.push(&s[last..tok.pos]);
            last = tok.pos + sep.len_utf8();
        }
    }
    parts.push(&s[last..]);
    parts
}

/// Byte offset of the first top-level `:`.
fn find_top_level_colon(s: &str) -> Option<usize> {
    scan(s)
        .into_iter()
        .find(|t| t.ch == ':' && t.depth == 0 && !t.quoted)
        .map(|t| t.pos)
}

/// Byte offset of the first top-level `=` that is an assignment rather than
/// part of `==`, `!=`, `<=`, `>=`.
fn find_top_level_assign(s: &str) -> Option<usize> {
    let toks = scan(s);
    (0..toks.len()).find_map(|i| {
        let t = &toks[i];
        if t.ch != '=' || t.depth != 0 || t.quoted {
            return None;
        }
        let prev = i.checked_sub(1).map(|p| toks[p].ch);
        let next = toks.get(i + 1).map(|n| n.ch);
        let compound = matches!(prev, Some('=' | '!' | '<' | '>')) || next == Some('=');
        (!compound).then_some(t.pos)
    })
}

/// Byte offset of the bracket matching the opener at `open`.
fn matching_close(s: &str, open: usize) -> Option<usize> {
    let toks = scan(s);
    let start = toks.iter().position(|t| t.pos == open)?;
    let depth = toks[start].depth;
    toks[start + 1..]
        .iter()
        .find(|t| !t.quoted && t.depth == depth && matches!(t.ch, ')' | ']' | '}'))
        .map(|t| t.pos)
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// Whether `code` starts with keyword `kw` followed by whitespace.
pub(crate) fn starts_with_keyword(code: &str, kw: &str) -> bool {
    code.strip_prefix(kw)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_whitespace())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parsed `def` header.
#[derive(Debug)]
pub(crate) struct DefHeader {
    pub name: String,
    pub is_async: bool,
    pub signature: Signature,
    /// Statement text after the header colon, for one-line bodies.
    pub inline_body: Option<String>,
}

/// Whether the logical line is a function definition header.
pub(crate) fn is_def(code: &str) -> bool {
    if starts_with_keyword(code, "def") {
        return true;
    }
    starts_with_keyword(code, "async")
        && starts_with_keyword(code["async".len()..].trim_start(), "def")
}

pub(crate) fn is_class(code: &str) -> bool {
    starts_with_keyword(code, "class")
}

/// Parse `[async] def name(params) [-> ret]: [body]`.
pub(crate) fn parse_def(code: &str, line: usize) -> Result<DefHeader, SyntaxError> {
    let invalid = |msg: &str| SyntaxError::new(line, format!("invalid function definition: {msg}"));

    let (is_async, rest) = match code.strip_prefix("async") {
        Some(after) if starts_with_keyword(code, "async") => (true, after.trim_start()),
        _ => (false, code),
    };
    let rest = rest
        .strip_prefix("def")
        .ok_or_else(|| invalid("missing 'def'"))?
        .trim_start();
    let offset = code.len() - rest.len();

    let name_end = rest
        .find(|c: char| c == '(' || c == '[' || c.is_whitespace())
        .ok_or_else(|| invalid("missing parameter list"))?;
    let name = &rest[..name_end];
    if !is_identifier(name) {
        return Err(invalid(&format!("'{name}' is not a valid name")));
    }

    let mut cursor = offset + name_end;
    let after_name = code[cursor..].trim_start();
    cursor = code.len() - after_name.len();
    // PEP 695 type parameters: `def f[T](x: T)`.
    if after_name.starts_with('[') {
        let close = matching_close(code, cursor).ok_or_else(|| invalid("unclosed '['"))?;
        cursor = close + 1;
        let after_params = code[cursor..].trim_start();
        cursor = code.len() - after_params.len();
    }
    if !code[cursor..].starts_with('(') {
        return Err(invalid("missing parameter list"));
    }
    let close = matching_close(code, cursor).ok_or_else(|| invalid("unclosed '('"))?;
    let params = parse_params(&code[cursor + 1..close], line)?;

    let tail = &code[close + 1..];
    let colon = find_top_level_colon(tail).ok_or_else(|| invalid("expected ':'"))?;
    let between = tail[..colon].trim();
    let returns = if between.is_empty() {
        None
    } else if let Some(ret) = between.strip_prefix("->") {
        let ret = normalize_annotation(ret);
        if ret.is_empty() {
            return Err(invalid("empty return annotation"));
        }
        Some(ret)
    } else {
        return Err(invalid(&format!("unexpected '{between}' before ':'")));
    };

    let inline = tail[colon + 1..].trim();
    Ok(DefHeader {
        name: name.to_string(),
        is_async,
        signature: Signature { params, returns },
        inline_body: (!inline.is_empty()).then(|| inline.to_string()),
    })
}

/// Annotation text with whitespace collapsed; a string-literal annotation is
/// replaced by its contents.
fn normalize_annotation(raw: &str) -> String {
    let text = collapse_whitespace(raw);
    string_literal_value(&text)
        .map(|v| collapse_whitespace(&v))
        .unwrap_or(text)
}

fn parse_params(text: &str, line: usize) -> Result<Vec<Parameter>, SyntaxError> {
    let mut params: Vec<Parameter> = Vec::new();
    let mut keyword_only = false;

    for raw in split_top_level(text, ',') {
        let piece = raw.trim();
        if piece.is_empty() {
            continue;
        }
        if piece == "/" {
            for p in params.iter_mut() {
                if p.kind == ParamKind::PositionalOrKeyword {
                    p.kind = ParamKind::PositionalOnly;
                }
            }
            continue;
        }
        if piece == "*" {
            keyword_only = true;
            continue;
        }

        let (kind, body) = if let Some(b) = piece.strip_prefix("**") {
            (ParamKind::VarKeyword, b.trim_start())
        } else if let Some(b) = piece.strip_prefix('*') {
            keyword_only = true;
            (ParamKind::VarPositional, b.trim_start())
        } else if keyword_only {
            (ParamKind::KeywordOnly, piece)
        } else {
            (ParamKind::PositionalOrKeyword, piece)
        };

        let colon = find_top_level_colon(body);
        let assign = find_top_level_assign(body);
        let (name, annotation, default) = match (colon, assign) {
            (Some(c), a) if a.is_none_or(|a| c < a) => {
                let (ann, def) = match a {
                    Some(a) => (&body[c + 1..a], Some(&body[a + 1..])),
                    None => (&body[c + 1..], None),
                };
                (&body[..c], Some(ann), def)
            }
            (_, Some(a)) => (&body[..a], None, Some(&body[a + 1..])),
            (_, None) => (body, None, None),
        };

        let name = name.trim();
        if !is_identifier(name) {
            return Err(SyntaxError::new(
                line,
                format!("invalid parameter '{piece}'"),
            ));
        }
        let annotation = annotation.map(normalize_annotation);
        if annotation.as_deref() == Some("") {
            return Err(SyntaxError::new(
                line,
                format!("empty annotation for parameter '{name}'"),
            ));
        }
        let default = default.map(collapse_whitespace);
        if default.as_deref() == Some("") {
            return Err(SyntaxError::new(
                line,
                format!("missing default value for parameter '{name}'"),
            ));
        }
        params.push(Parameter {
            name: name.to_string(),
            annotation,
            default,
            kind,
        });
    }
    Ok(params)
}

// ── Imports ─────────────────────────────────────────────────────────

/// Canonical text of every import statement on one logical line.
///
/// Returns an empty list for lines that are not imports.
pub(crate) fn parse_imports(code: &str, line: usize) -> Result<Vec<String>, SyntaxError> {
    let mut out = Vec::new();
    for stmt in split_top_level(code, ';') {
        let stmt = stmt.trim();
        if starts_with_keyword(stmt, "import") {
            out.push(parse_plain_import(&stmt["import".len()..], line)?);
        } else if starts_with_keyword(stmt, "from") {
            out.push(parse_from_import(&stmt["from".len()..], line)?);
        }
    }
    Ok(out)
}

fn invalid_import(line: usize, stmt: &str) -> SyntaxError {
    SyntaxError::new(line, format!("invalid import statement: {}", stmt.trim()))
}

fn is_dotted_name(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

/// `name [as alias]`, where `name` may be dotted when `dotted` is set.
fn parse_alias(item: &str, dotted: bool) -> Option<String> {
    let words: Vec<&str> = item.split_whitespace().collect();
    let valid_name = |n: &str| if dotted { is_dotted_name(n) } else { is_identifier(n) };
    match words.as_slice() {
        [name] if valid_name(name) => Some((*name).to_string()),
        [name, "as", alias] if valid_name(name) && is_identifier(alias) => {
            Some(format!("{name} as {alias}"))
        }
        _ => None,
    }
}

fn parse_plain_import(rest: &str, line: usize) -> Result<String, SyntaxError> {
    let mut names = Vec::new();
    for item in split_top_level(rest, ',') {
        let alias = parse_alias(item, true)
            .ok_or_else(|| invalid_import(line, &format!("import {rest}")))?;
        names.push(alias);
    }
    Ok(format!("import {}", names.join(", ")))
}

fn parse_from_import(rest: &str, line: usize) -> Result<String, SyntaxError> {
    let whole = format!("from {}", rest.trim());
    let toks = scan(rest);
    // Locate the `import` keyword outside brackets.
    let kw = toks
        .iter()
        .enumerate()
        .find_map(|(i, t)| {
            if t.quoted || t.depth != 0 || !rest[t.pos..].starts_with("import") {
                return None;
            }
            let before_ok = i == 0 || toks[i - 1].ch.is_whitespace();
            let after = rest[t.pos + "import".len()..].chars().next();
            let after_ok = after.is_some_and(|c| c.is_whitespace() || c == '(');
            (before_ok && after_ok).then_some(t.pos)
        })
        .ok_or_else(|| invalid_import(line, &whole))?;

    let module: String = rest[..kw].chars().filter(|c| !c.is_whitespace()).collect();
    let dots = module.chars().take_while(|&c| c == '.').count();
    let module_name = &module[dots..];
    if module.is_empty() || (!module_name.is_empty() && !is_dotted_name(module_name)) {
        return Err(invalid_import(line, &whole));
    }

    let mut names_text = rest[kw + "import".len()..].trim();
    if let Some(inner) = names_text.strip_prefix('(') {
        names_text = inner
            .strip_suffix(')')
            .ok_or_else(|| invalid_import(line, &whole))?;
    }
    let items: Vec<&str> = split_top_level(names_text, ',')
        .into_iter()
        .map(str::trim)
        .collect();
    // A single trailing comma is allowed inside parentheses.
    let items: Vec<&str> = match items.split_last() {
        Some((last, init)) if last.is_empty() && !init.is_empty() => init.to_vec(),
        _ => items,
    };

    if items == ["*"] {
        return Ok(format!("from {module} import *"));
    }
    let mut names = Vec::new();
    for item in items {
        names.push(parse_alias(item, false).ok_or_else(|| invalid_import(line, &whole))?);
    }
    Ok(format!("from {module} import {}", names.join(", ")))
}

// ── String literals ────────────────────────────────────────────────

/// Value of `code` if it consists solely of one or more adjacent plain
/// (non-bytes, non-f) string literals.
pub(crate) fn string_literal_value(code: &str) -> Option<String> {
    let chars: Vec<char> = code.trim().chars().collect();
    let mut i = 0usize;
    let mut value = String::new();
    let mut seen = false;

    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let mut raw = false;
        while i < chars.len() && chars[i].is_ascii_alphabetic() {
            match chars[i].to_ascii_lowercase() {
                'r' => raw = true,
                'u' => {}
                _ => return None,
            }
            i += 1;
        }
        let quote = *chars.get(i)?;
        if quote != '\'' && quote != '"' {
            return None;
        }
        let triple = chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote);
        let width = if triple { 3 } else { 1 };
        i += width;
        let body_start = i;
        let body_end = loop {
            let c = *chars.get(i)?;
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == quote
                && (!triple
                    || (chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote)))
            {
                break i;
            }
            i += 1;
        };
        let body: String = chars[body_start..body_end].iter().collect();
        if raw {
            value.push_str(&body);
        } else {
            value.push_str(&unescape(&body));
        }
        i = body_end + width;
        seen = true;
    }
    seen.then_some(value)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some('\n') => {}
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn expand_tabs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut col = 0usize;
    for c in s.chars() {
        if c == '\t' {
            let pad = 8 - col % 8;
            out.extend(std::iter::repeat_n(' ', pad));
            col += pad;
        } else {
            out.push(c);
            col += 1;
        }
    }
    out
}

/// Normalize docstring indentation the way Python's `inspect.cleandoc` does.
pub(crate) fn clean_doc(doc: &str) -> String {
    let lines: Vec<String> = doc.split('\n').map(expand_tabs).collect();
    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = Vec::with_capacity(lines.len());
    for (i, l) in lines.iter().enumerate() {
        if i == 0 {
            cleaned.push(l.trim_start().to_string());
        } else if l.trim().is_empty() {
            cleaned.push(String::new());
        } else {
            cleaned.push(l.chars().skip(margin).collect());
        }
    }
    while cleaned.last().is_some_and(|l| l.trim().is_empty()) {
        cleaned.pop();
    }
    while cleaned.first().is_some_and(|l| l.trim().is_empty()) {
        cleaned.remove(0);
    }
    cleaned
        .into_iter()
        .map(|l| l.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_respects_brackets_and_strings() {
        let parts = split_top_level("a, b: Dict[str, int] = {'x': 1}, c='a,b'", ',');
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].trim(), "b: Dict[str, int] = {'x': 1}");
        assert_eq!(parts[2].trim(), "c='a,b'");
    }

    #[test]
    fn def_header_with_annotations_and_defaults() {
        let header = parse_def(
            "def add(a: int, b: int = 2, *args, key: str = 'x', **kw) -> int:",
            1,
        )
        .unwrap();
        assert_eq!(header.name, "add");
        assert!(!header.is_async);
        let sig = header.signature;
        assert_eq!(sig.returns.as_deref(), Some("int"));
        let names: Vec<&str> = sig.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "args", "key", "kw"]);
        assert_eq!(sig.params[0].annotation.as_deref(), Some("int"));
        assert_eq!(sig.params[0].default, None);
        assert_eq!(sig.params[1].default.as_deref(), Some("2"));
        assert_eq!(sig.params[2].kind, ParamKind::VarPositional);
        assert_eq!(sig.params[3].kind, ParamKind::KeywordOnly);
        assert_eq!(sig.params[3].default.as_deref(), Some("'x'"));
        assert_eq!(sig.params[4].kind, ParamKind::VarKeyword);
    }

    #[test]
    fn def_header_markers_and_async() {
        let header = parse_def("async def f(a, /, b, *, c: bool):", 3).unwrap();
        assert!(header.is_async);
        let kinds: Vec<ParamKind> = header.signature.params.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            [
                ParamKind::PositionalOnly,
                ParamKind::PositionalOrKeyword,
                ParamKind::KeywordOnly
            ]
        );
    }

    #[test]
    fn def_header_inline_body_and_lambda_default() {
        let header = parse_def("def f(key=lambda x: x, n: 'int' = 1): return n", 1).unwrap();
        let params = &header.signature.params;
        assert_eq!(params[0].annotation, None);
        assert_eq!(params[0].default.as_deref(), Some("lambda x: x"));
        assert_eq!(params[1].annotation.as_deref(), Some("int"));
        assert_eq!(header.inline_body.as_deref(), Some("return n"));
    }

    #[test]
    fn def_header_errors() {
        assert!(parse_def("def (x):", 1).is_err());
        assert!(parse_def("def f(x)", 1).is_err());
        assert!(parse_def("def f:", 1).is_err());
        assert!(parse_def("def f(1x):", 1).is_err());
        assert!(parse_def("def f(x: = 1):", 1).is_err());
    }

    #[test]
    fn recognizes_def_lines() {
        assert!(is_def("def f():"));
        assert!(is_def("async  def f():"));
        assert!(!is_def("define = 1"));
        assert!(!is_def("async with x:"));
    }

    #[test]
    fn canonical_imports() {
        assert_eq!(
            parse_imports("import os,  sys as system", 1).unwrap(),
            vec!["import os, sys as system"]
        );
        assert_eq!(
            parse_imports("from  .pkg.mod import (a,\n b as c,\n)", 1).unwrap(),
            vec!["from .pkg.mod import a, b as c"]
        );
        assert_eq!(
            parse_imports("from . import x", 1).unwrap(),
            vec!["from . import x"]
        );
        assert_eq!(
            parse_imports("from math import *", 1).unwrap(),
            vec!["from math import *"]
        );
        assert_eq!(
            parse_imports("import json; x = 1; import re", 1).unwrap(),
            vec!["import json", "import re"]
        );
        assert!(parse_imports("x = 1", 1).unwrap().is_empty());
        assert!(parse_imports("important = True", 1).unwrap().is_empty());
    }

    #[test]
    fn import_errors() {
        assert!(parse_imports("from os", 4).is_err());
        assert!(parse_imports("import", 4).unwrap().is_empty());
        assert!(parse_imports("import os as", 4).is_err());
        assert!(parse_imports("from os import (path", 4).is_err());
        assert!(parse_imports("import 3d", 4).is_err());
    }

    #[test]
    fn string_literals() {
        assert_eq!(string_literal_value("'abc'").as_deref(), Some("abc"));
        assert_eq!(
            string_literal_value("\"\"\"a\\nb\"\"\"").as_deref(),
            Some("a\nb")
        );
        assert_eq!(string_literal_value("r'a\\n'").as_deref(), Some("a\\n"));
        assert_eq!(string_literal_value("'a' \"b\"").as_deref(), Some("ab"));
        assert_eq!(string_literal_value("f'x'"), None);
        assert_eq!(string_literal_value("b'x'"), None);
        assert_eq!(string_literal_value("'a' + b"), None);
        assert_eq!(string_literal_value("return 1"), None);
    }

    #[test]
    fn clean_doc_matches_cleandoc() {
        let raw = "Add two numbers.\n\n        Args:\n            a: first\n        ";
        assert_eq!(clean_doc(raw), "Add two numbers.\n\nArgs:\n    a: first");
        assert_eq!(clean_doc("\n    Leading blank.\n    "), "Leading blank.");
    }
}
