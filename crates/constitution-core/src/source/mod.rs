//! Source file model: language detection and the per-file context handed
//! to validators.

pub mod ast;

pub use ast::{Comment, FunctionDecl, Import, SourceAst, StringLiteral, TypeDecl};

use std::fmt;
use std::path::Path;

/// Detected source language, used for validator dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
    Shell,
    Sql,
    /// Skip analysis.
    Unknown,
}

impl SourceKind {
    /// All analyzable kinds.
    pub const ANALYZABLE: [SourceKind; 8] = [
        SourceKind::Python,
        SourceKind::JavaScript,
        SourceKind::TypeScript,
        SourceKind::Rust,
        SourceKind::Go,
        SourceKind::Java,
        SourceKind::Shell,
        SourceKind::Sql,
    ];

    pub fn is_analyzable(self) -> bool {
        !matches!(self, SourceKind::Unknown)
    }

    /// True for brace-delimited languages; false for indentation-scoped.
    pub(crate) fn uses_braces(self) -> bool {
        !matches!(self, SourceKind::Python | SourceKind::Shell | SourceKind::Sql)
    }

    /// Line-comment prefix for this language.
    pub(crate) fn line_comment(self) -> &'static str {
        match self {
            SourceKind::Python | SourceKind::Shell => "#",
            SourceKind::Sql => "--",
            _ => "//",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Python => "python",
            SourceKind::JavaScript => "javascript",
            SourceKind::TypeScript => "typescript",
            SourceKind::Rust => "rust",
            SourceKind::Go => "go",
            SourceKind::Java => "java",
            SourceKind::Shell => "shell",
            SourceKind::Sql => "sql",
            SourceKind::Unknown => "unknown",
        })
    }
}

/// Detect the source kind from the file extension, falling back to a
/// shebang sniff for extensionless scripts.
pub fn detect_source_kind(path: &Path, first_line: Option<&str>) -> SourceKind {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| match ext {
            "py" | "pyi" => SourceKind::Python,
            "js" | "jsx" | "mjs" | "cjs" => SourceKind::JavaScript,
            "ts" | "tsx" | "mts" => SourceKind::TypeScript,
            "rs" => SourceKind::Rust,
            "go" => SourceKind::Go,
            "java" => SourceKind::Java,
            "sh" | "bash" | "zsh" => SourceKind::Shell,
            "sql" => SourceKind::Sql,
            _ => SourceKind::Unknown,
        })
        .unwrap_or(SourceKind::Unknown);

    if by_extension != SourceKind::Unknown {
        return by_extension;
    }

    match first_line {
        Some(line) if line.starts_with("#!") => {
            if line.contains("python") {
                SourceKind::Python
            } else if line.contains("node") {
                SourceKind::JavaScript
            } else if line.contains("sh") {
                SourceKind::Shell
            } else {
                SourceKind::Unknown
            }
        }
        _ => SourceKind::Unknown,
    }
}

/// Everything a validator may look at for one file.
///
/// Validators are pure with respect to this context: no I/O, no shared
/// mutable state, and no retained references after `analyze` returns.
#[derive(Debug, Clone, Copy)]
pub struct FileContext<'a> {
    pub path: &'a Path,
    pub text: &'a str,
    pub ast: &'a SourceAst,
}

impl<'a> FileContext<'a> {
    pub fn new(path: &'a Path, text: &'a str, ast: &'a SourceAst) -> Self {
        FileContext { path, text, ast }
    }

    /// Iterate lines with 1-based numbering.
    pub fn lines(&self) -> impl Iterator<Item = (usize, &'a str)> {
        self.text.lines().enumerate().map(|(i, l)| (i + 1, l))
    }

    /// Fetch a single line by 1-based number.
    pub fn line(&self, number: usize) -> Option<&'a str> {
        number.checked_sub(1).and_then(|i| self.text.lines().nth(i))
    }
}
