//! Physical-to-logical line folding and the indentation block tree.
//!
//! Comments are dropped, string literals are kept verbatim (including any
//! newlines inside triple-quoted strings), bracketed continuations and
//! backslash continuations are folded into one logical line.

use super::SyntaxError;

/// One logical source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogicalLine {
    /// 1-based physical line on which the statement starts.
    pub start: usize,
    /// 1-based physical line on which the statement ends.
    pub end: usize,
    /// Indentation width of the first physical line (tabs advance to the
    /// next multiple of 8).
    pub indent: usize,
    /// Statement text without indentation, comments, or trailing whitespace.
    pub code: String,
}

/// A statement plus the statements of its indented block, if any.
#[derive(Debug, Clone)]
pub(crate) struct Stmt {
    pub line: LogicalLine,
    pub body: Vec<Stmt>,
}

impl Stmt {
    /// Last physical line covered by this statement and its nested block.
    pub fn end_line(&self) -> usize {
        self.body
            .last()
            .map_or(self.line.end, |last| last.end_line().max(self.line.end))
    }
}

struct Pending {
    start: usize,
    indent: usize,
    code: String,
}

impl Pending {
    fn finish(self, end: usize) -> LogicalLine {
        LogicalLine {
            start: self.start,
            end,
            indent: self.indent,
            code: self.code.trim_end().to_string(),
        }
    }
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Fold `src` into logical lines, rejecting unterminated strings and
/// unbalanced brackets.
pub(crate) fn logical_lines(src: &str) -> Result<Vec<LogicalLine>, SyntaxError> {
    let chars: Vec<char> = src.chars().collect();
    let n = chars.len();
    let mut out = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;
    let mut cur: Option<Pending> = None;
    let mut brackets: Vec<(char, usize)> = Vec::new();

    while i < n {
        let Some(pending) = cur.as_mut() else {
            // Start of a physical line outside any statement: measure indent.
            let mut col = 0usize;
            let mut j = i;
            while j < n && matches!(chars[j], ' ' | '\t' | '\x0c' | '\r') {
                col = match chars[j] {
                    '\t' => (col / 8 + 1) * 8,
                    '\x0c' => 0,
                    '\r' => col,
                    _ => col + 1,
                };
                j += 1;
            }
            if j >= n {
                break;
            }
            match chars[j] {
                '\n' => {
                    line += 1;
                    i = j + 1;
                }
                '#' => {
                    i = j;
                    while i < n && chars[i] != '\n' {
                        i += 1;
                    }
                }
                _ => {
                    cur = Some(Pending {
                        start: line,
                        indent: col,
                        code: String::new(),
                    });
                    i = j;
                }
            }
            continue;
        };

        let c = chars[i];
        match c {
            '#' => {
                while i < n && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\\' => {
                let mut k = i + 1;
                while k < n && chars[k] == '\r' {
                    k += 1;
                }
                if k < n && chars[k] == '\n' {
                    pending.code.push(' ');
                    line += 1;
                    i = k + 1;
                    continue;
                }
                if k >= n {
                    return Err(SyntaxError::new(
                        line,
                        "unexpected end of file after line continuation",
                    ));
                }
                pending.code.push(c);
            }
            '\'' | '"' => {
                let (next, newlines) = scan_string(&chars, i, line)?;
                pending.code.extend(&chars[i..next]);
                line += newlines;
                i = next;
                continue;
            }
            '(' | '[' | '{' => {
                brackets.push((c, line));
                pending.code.push(c);
            }
            ')' | ']' | '}' => {
                match brackets.pop() {
                    Some((open, _)) if closing_for(open) == c => {}
                    Some((open, _)) => {
                        return Err(SyntaxError::new(
                            line,
                            format!(
                                "closing parenthesis '{c}' does not match opening parenthesis '{open}'"
                            ),
                        ));
                    }
                    None => {
                        return Err(SyntaxError::new(line, format!("unmatched '{c}'")));
                    }
                }
                pending.code.push(c);
            }
            '\n' => {
                if brackets.is_empty() {
                    if let Some(done) = cur.take() {
                        out.push(done.finish(line));
                    }
                } else {
                    pending.code.push('\n');
                }
                line += 1;
            }
            '\r' => {}
            _ => pending.code.push(c),
        }
        i += 1;
    }

    if let Some((open, opened_at)) = brackets.first() {
        return Err(SyntaxError::new(
            *opened_at,
            format!("'{open}' was never closed"),
        ));
    }
    if let Some(done) = cur.take() {
        out.push(done.finish(line));
    }
    Ok(out)
}

/// Scan the string literal whose opening quote is at `start`.
///
/// Returns the index just past the closing quote and the number of
/// newlines consumed.
fn scan_string(chars: &[char], start: usize, line: usize) -> Result<(usize, usize), SyntaxError> {
    let n = chars.len();
    let quote = chars[start];
    let triple = start + 2 < n && chars[start + 1] == quote && chars[start + 2] == quote;
    let mut i = if triple { start + 3 } else { start + 1 };
    let mut newlines = 0usize;

    while i < n {
        let c = chars[i];
        if c == '\\' {
            if i + 1 < n && chars[i + 1] == '\n' {
                newlines += 1;
            }
            i += 2;
            continue;
        }
        if c == '\n' {
            if !triple {
                return Err(SyntaxError::new(
                    line + newlines,
                    "unterminated string literal",
                ));
            }
            newlines += 1;
        }
        if c == quote {
            if !triple {
                return Ok((i + 1, newlines));
            }
            if i + 2 < n && chars[i + 1] == quote && chars[i + 2] == quote {
                return Ok((i + 3, newlines));
            }
        }
        i += 1;
    }

    let message = if triple {
        "unterminated triple-quoted string literal"
    } else {
        "unterminated string literal"
    };
    Err(SyntaxError::new(line, message))
}

/// Whether a logical line introduces an indented block.
pub(crate) fn opens_block(code: &str) -> bool {
    code.ends_with(':')
}

/// Arrange logical lines into nested blocks by indentation.
pub(crate) fn block_tree(lines: &[LogicalLine]) -> Result<Vec<Stmt>, SyntaxError> {
    let mut pos = 0;
    if let Some(first) = lines.first()
        && first.indent > 0
    {
        return Err(SyntaxError::new(first.start, "unexpected indent"));
    }
    parse_block(lines, &mut pos, 0)
}

fn parse_block(
    lines: &[LogicalLine],
    pos: &mut usize,
    indent: usize,
) -> Result<Vec<Stmt>, SyntaxError> {
    let mut out: Vec<Stmt> = Vec::new();
    while *pos < lines.len() {
        let line = &lines[*pos];
        if line.indent < indent {
            break;
        }
        if line.indent > indent {
            let message = if out.last().is_some_and(|s| !s.body.is_empty()) {
                "unindent does not match any outer indentation level"
            } else {
                "unexpected indent"
            };
            return Err(SyntaxError::new(line.start, message));
        }
        *pos += 1;

        let mut stmt = Stmt {
            line: line.clone(),
            body: Vec::new(),
        };
        if opens_block(&line.code) {
            match lines.get(*pos) {
                Some(next) if next.indent > indent => {
                    stmt.body = parse_block(lines, pos, next.indent)?;
                }
                Some(next) => {
                    return Err(SyntaxError::new(
                        next.start,
                        format!("expected an indented block after line {}", line.start),
                    ));
                }
                None => {
                    return Err(SyntaxError::new(
                        line.end,
                        format!("expected an indented block after line {}", line.start),
                    ));
                }
            }
        }
        out.push(stmt);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(src: &str) -> Vec<String> {
        logical_lines(src)
            .unwrap()
            .into_iter()
            .map(|l| l.code)
            .collect()
    }

    #[test]
    fn folds_bracket_continuations() {
        let src = "x = foo(1,\n        2)\ny = 3\n";
        let lines = logical_lines(src).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].start, 1);
        assert_eq!(lines[0].end, 2);
        assert_eq!(lines[1].start, 3);
        assert_eq!(lines[1].code, "y = 3");
    }

    #[test]
    fn drops_comments_and_blank_lines() {
        let src = "# header\n\nx = 1  # trailing\n   # indented comment\ny = '#not a comment'\n";
        assert_eq!(codes(src), vec!["x = 1", "y = '#not a comment'"]);
    }

    #[test]
    fn triple_quoted_strings_span_lines() {
        let src = "def f():\n    \"\"\"Doc\n    more\n    \"\"\"\n    return 1\n";
        let lines = logical_lines(src).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].start, 2);
        assert_eq!(lines[1].end, 4);
        assert_eq!(lines[2].start, 5);
    }

    #[test]
    fn backslash_continuation() {
        let src = "x = 1 + \\\n    2\n";
        let lines = logical_lines(src).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].end, 2);
    }

    #[test]
    fn tabs_expand_to_eight() {
        let lines = logical_lines("if x:\n\ty = 1\n").unwrap();
        assert_eq!(lines[1].indent, 8);
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = logical_lines("x = 'abc\ny = 2\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unterminated string"));

        let err = logical_lines("x = 1\ns = \"\"\"never closed\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("triple-quoted"));
    }

    #[test]
    fn rejects_unbalanced_brackets() {
        let err = logical_lines("x = foo(1,\n2\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("never closed"));

        let err = logical_lines("x = [1, 2)\n").unwrap_err();
        assert!(err.message.contains("does not match"));

        let err = logical_lines("x = 1)\n").unwrap_err();
        assert!(err.message.contains("unmatched"));
    }

    #[test]
    fn builds_nested_blocks() {
        let src = "def f():\n    if x:\n        return 1\n    return 2\ny = 3\n";
        let lines = logical_lines(src).unwrap();
        let tree = block_tree(&lines).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].body.len(), 2);
        assert_eq!(tree[0].body[0].body.len(), 1);
        assert_eq!(tree[0].end_line(), 4);
        assert_eq!(tree[1].end_line(), 5);
    }

    #[test]
    fn rejects_bad_indentation() {
        let lines = logical_lines("  x = 1\n").unwrap();
        assert_eq!(
            block_tree(&lines).unwrap_err().message,
            "unexpected indent"
        );

        let lines = logical_lines("x = 1\n    y = 2\n").unwrap();
        let err = block_tree(&lines).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.message, "unexpected indent");

        let lines = logical_lines("if x:\n        y = 1\n    z = 2\n").unwrap();
        let err = block_tree(&lines).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("unindent"));

        let lines = logical_lines("def f():\nx = 1\n").unwrap();
        let err = block_tree(&lines).unwrap_err();
        assert!(err.message.contains("expected an indented block"));

        let lines = logical_lines("def f():\n").unwrap();
        assert!(block_tree(&lines).is_err());
    }
}
