//! Per-tool source blob: every `.py` file under a tool folder, concatenated.

use crate::error::{Error, Result};
use crate::parse::SyntaxError;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// `.py` files under `root`, in walk order.
fn python_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "py") {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

/// Where one file landed inside the blob.
#[derive(Debug, Clone)]
struct Segment {
    path: PathBuf,
    /// 1-based blob line of the file's first line.
    first_line: usize,
    line_count: usize,
}

/// Concatenated source of one tool plus a map back to the original files.
#[derive(Debug, Clone)]
pub struct ToolSource {
    pub tool: String,
    pub text: String,
    segments: Vec<Segment>,
}

impl ToolSource {
    /// Read every `.py` file under `root` in walk order.
    ///
    /// Walk order is whatever the filesystem reports and is not sorted, so
    /// the concatenation order of files inside one tool may differ across
    /// machines. Each file is followed by a newline; CRLF line endings are
    /// normalized.
    pub async fn collect(tool: &str, root: &Path) -> Result<Self> {
        let walk_root = root.to_path_buf();
        let paths = tokio::task::spawn_blocking(move || python_files(&walk_root))
            .await
            .map_err(std::io::Error::other)??;

        let mut source = Self {
            tool: tool.to_string(),
            text: String::new(),
            segments: Vec::new(),
        };
        for path in paths {
            let content = fs::read_to_string(&path).await?;
            source.push(path, &content);
        }
        Ok(source)
    }

    /// Build from in-memory files, in the given order.
    pub fn from_files<'a>(
        tool: &str,
        files: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut source = Self {
            tool: tool.to_string(),
            text: String::new(),
            segments: Vec::new(),
        };
        for (path, content) in files {
            source.push(PathBuf::from(path), content);
        }
        source
    }

    fn push(&mut self, path: PathBuf, content: &str) {
        let normalized = content.replace("\r\n", "\n");
        let first_line = self.text.matches('\n').count() + 1;
        let line_count = normalized.matches('\n').count() + 1;
        self.text.push_str(&normalized);
        self.text.push('\n');
        self.segments.push(Segment {
            path,
            first_line,
            line_count,
        });
    }

    pub fn file_count(&self) -> usize {
        self.segments.len()
    }

    /// Map a 1-based blob line to (file, 1-based line within that file).
    pub fn locate(&self, blob_line: usize) -> (PathBuf, usize) {
        let segment = self
            .segments
            .iter()
            .find(|s| blob_line < s.first_line + s.line_count)
            .or(self.segments.last());
        match segment {
            Some(s) => (
                s.path.clone(),
                blob_line.saturating_sub(s.first_line) + 1,
            ),
            None => (PathBuf::new(), blob_line),
        }
    }

    /// Report a syntax error at a blob line against the file it came from.
    pub fn parse_error(&self, err: SyntaxError) -> Error {
        let (file, line) = self.locate(err.line);
        Error::Parse {
            tool: self.tool.clone(),
            file,
            line,
            message: err.message,
        }
    }

    /// Verbatim blob lines `start..=end` (1-based), joined with `\n`.
    pub fn lines(&self, start: usize, end: usize) -> String {
        self.text
            .split('\n')
            .skip(start.saturating_sub(1))
            .take(end.saturating_sub(start) + 1)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_with_trailing_newline_and_maps_lines() {
        let source = ToolSource::from_files(
            "t",
            [("a.py", "x = 1\ny = 2"), ("b.py", "def f():\r\n    return 1\r\n")],
        );
        assert_eq!(
            source.text,
            "x = 1\ny = 2\ndef f():\n    return 1\n\n"
        );
        assert_eq!(source.file_count(), 2);
        assert_eq!(source.locate(2), (PathBuf::from("a.py"), 2));
        assert_eq!(source.locate(3), (PathBuf::from("b.py"), 1));
        assert_eq!(source.locate(4), (PathBuf::from("b.py"), 2));
        assert_eq!(source.lines(3, 4), "def f():\n    return 1");
    }

    #[tokio::test]
    async fn collect_reads_only_python_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("main.py"), "a = 1\n").unwrap();
        std::fs::write(dir.path().join("pkg/util.py"), "b = 2\n").unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "requests\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "# notes\n").unwrap();

        let source = ToolSource::collect("t", dir.path()).await.unwrap();
        assert_eq!(source.file_count(), 2);
        assert!(source.text.contains("a = 1\n"));
        assert!(source.text.contains("b = 2\n"));
        assert!(!source.text.contains("requests"));
    }
}
