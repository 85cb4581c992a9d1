//! Lightweight source tree: a single pass over the file yields the imports,
//! declarations, string literals, and comments the validators work from.
//!
//! This is a pragmatic line-oriented parse, not a grammar-faithful one.
//! Function extents are approximated by brace depth (C-family) or
//! indentation (Python/Shell); multi-line constructs that defeat the
//! approximation degrade to smaller spans rather than wrong findings.

use super::SourceKind;
use regex::Regex;
use std::sync::LazyLock;

/// An import/include/use statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub line: usize,
    pub wildcard: bool,
}

/// A function or method declaration with its approximate extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: String,
    /// 1-based declaration line.
    pub line: usize,
    /// 1-based last line of the body (approximate).
    pub end_line: usize,
    pub param_count: usize,
    /// Deepest nesting level inside the body, relative to the body itself.
    pub max_depth: usize,
    pub is_test: bool,
    pub is_public: bool,
}

impl FunctionDecl {
    pub fn body_lines(&self) -> usize {
        self.end_line.saturating_sub(self.line)
    }
}

/// A class/struct/type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub name: String,
    pub line: usize,
}

/// A single-line string literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLiteral {
    pub value: String,
    pub line: usize,
    /// 1-based byte column of the opening quote.
    pub column: usize,
}

/// A comment with its markers stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    pub line: usize,
}

/// Parsed view of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceAst {
    pub kind: Option<SourceKind>,
    pub line_count: usize,
    pub imports: Vec<Import>,
    pub functions: Vec<FunctionDecl>,
    pub types: Vec<TypeDecl>,
    pub strings: Vec<StringLiteral>,
    pub comments: Vec<Comment>,
}

impl SourceAst {
    pub fn source_kind(&self) -> SourceKind {
        self.kind.unwrap_or(SourceKind::Unknown)
    }

    /// Names declared at the top level (functions and types).
    pub fn top_level_symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self
            .functions
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.types.iter().map(|t| t.name.as_str()))
            .collect();
        symbols.sort_unstable();
        symbols
    }

    /// The function whose span covers `line`, if any.
    pub fn function_at(&self, line: usize) -> Option<&FunctionDecl> {
        self.functions
            .iter()
            .filter(|f| f.line <= line && line <= f.end_line)
            .max_by_key(|f| f.line)
    }
}

static PY_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)def\s+(\w+)\s*\(([^)]*)").unwrap());
static PY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*class\s+(\w+)").unwrap());
static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:from\s+([\w.]+)\s+)?import\s+(.+)").unwrap());
static JS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+(\w+)\s*\(([^)]*)")
        .unwrap()
});
static JS_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?class\s+(\w+)").unwrap());
static JS_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*import\s+(?:(.+?)\s+from\s+)?['"]([^'"]+)['"]"#).unwrap());
static RUST_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)").unwrap()
});
static RUST_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+(\w+)").unwrap()
});
static RUST_USE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:pub\s+)?use\s+([\w:]+(?:::\*)?)").unwrap());
static GO_FUNC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^func\s+(?:\([^)]*\)\s*)?(\w+)\s*\(([^)]*)").unwrap());
static GO_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^type\s+(\w+)\s+(?:struct|interface)").unwrap());
static GO_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?:import\s+)?"([^"]+)"$"#).unwrap());
static JAVA_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:public|protected|private)\s+(?:static\s+)?(?:final\s+)?[\w<>\[\], ]+\s+(\w+)\s*\(([^)]*)")
        .unwrap()
});
static JAVA_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:public\s+)?(?:abstract\s+|final\s+)?(?:class|interface|enum)\s+(\w+)")
        .unwrap()
});
static JAVA_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(?:static\s+)?([\w.]+\*?)\s*;").unwrap());

/// Parse `text` as `kind` source.
pub fn parse(kind: SourceKind, text: &str) -> SourceAst {
    let mut ast = SourceAst {
        kind: Some(kind),
        line_count: text.lines().count(),
        ..SourceAst::default()
    };

    let mut in_block_comment = false;
    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let (code, comment, still_in_block) =
            split_comment(raw_line, kind, in_block_comment);
        in_block_comment = still_in_block;

        if let Some(comment_text) = comment {
            let trimmed = comment_text.trim();
            if !trimmed.is_empty() {
                ast.comments.push(Comment {
                    text: trimmed.to_string(),
                    line: line_no,
                });
            }
        }
        if code.trim().is_empty() {
            continue;
        }

        scan_strings(&code, kind, line_no, &mut ast.strings);
        scan_imports(&code, kind, line_no, &mut ast.imports);
        scan_types(&code, kind, line_no, &mut ast.types);
        if let Some(decl) = match_function(&code, kind, line_no) {
            ast.functions.push(decl);
        }
    }

    close_function_spans(&mut ast, kind, text);
    ast
}

/// Split a line into its code part and trailing comment, tracking C-style
/// block comments across lines. Quote-aware only to the extent of skipping
/// comment markers inside simple string literals.
fn split_comment(
    line: &str,
    kind: SourceKind,
    in_block: bool,
) -> (String, Option<String>, bool) {
    let supports_block = kind.uses_braces();
    if in_block {
        return match line.find("*/") {
            Some(end) => {
                let rest = &line[end + 2..];
                let (code, comment, still) = split_comment(rest, kind, false);
                let merged = match comment {
                    Some(c) => Some(format!("{} {}", &line[..end], c)),
                    None => Some(line[..end].to_string()),
                };
                (code, merged, still)
            }
            None => (String::new(), Some(line.to_string()), true),
        };
    }

    let marker = kind.line_comment();
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                // Byte-level matching: markers are ASCII, so a match start
                // is always a char boundary even in non-ASCII lines.
                if b == b'"' || b == b'\'' || (b == b'`' && supports_block) {
                    quote = Some(b);
                } else if bytes[i..].starts_with(marker.as_bytes()) {
                    return (
                        line[..i].to_string(),
                        Some(line[i + marker.len()..].to_string()),
                        false,
                    );
                } else if supports_block && bytes[i..].starts_with(b"/*") {
                    let after = &line[i + 2..];
                    return match after.find("*/") {
                        Some(end) => {
                            let tail = &after[end + 2..];
                            let (code, trailing, still) = split_comment(tail, kind, false);
                            (
                                format!("{}{}", &line[..i], code),
                                Some(match trailing {
                                    Some(t) => format!("{} {}", &after[..end], t),
                                    None => after[..end].to_string(),
                                }),
                                still,
                            )
                        }
                        None => (line[..i].to_string(), Some(after.to_string()), true),
                    };
                }
                i += 1;
            }
        }
    }
    (line.to_string(), None, false)
}

fn scan_strings(code: &str, kind: SourceKind, line_no: usize, out: &mut Vec<StringLiteral>) {
    let bytes = code.as_bytes();
    let backtick_ok = matches!(kind, SourceKind::JavaScript | SourceKind::TypeScript | SourceKind::Go);
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let is_quote = b == b'"' || b == b'\'' || (b == b'`' && backtick_ok);
        if !is_quote {
            i += 1;
            continue;
        }
        // Rust lifetimes ('a) are not string literals.
        if b == b'\'' && kind == SourceKind::Rust {
            i += 1;
            continue;
        }
        let quote = b;
        let start = i;
        i += 1;
        let mut value = String::new();
        let mut closed = false;
        while i < bytes.len() {
            let c = bytes[i];
            if c == b'\\' && i + 1 < bytes.len() {
                value.push(bytes[i + 1] as char);
                i += 2;
                continue;
            }
            if c == quote {
                closed = true;
                i += 1;
                break;
            }
            value.push(c as char);
            i += 1;
        }
        if closed {
            out.push(StringLiteral {
                value,
                line: line_no,
                column: start + 1,
            });
        }
    }
}

fn scan_imports(code: &str, kind: SourceKind, line_no: usize, out: &mut Vec<Import>) {
    match kind {
        SourceKind::Python => {
            if let Some(caps) = PY_IMPORT.captures(code) {
                let from_module = caps.get(1).map(|m| m.as_str().to_string());
                let names = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
                let wildcard = names == "*";
                let module = from_module.unwrap_or_else(|| {
                    names.split(',').next().unwrap_or("").trim().to_string()
                });
                if !module.is_empty() {
                    out.push(Import {
                        module,
                        line: line_no,
                        wildcard,
                    });
                }
            }
        }
        SourceKind::JavaScript | SourceKind::TypeScript => {
            if let Some(caps) = JS_IMPORT.captures(code) {
                let names = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                out.push(Import {
                    module: caps[2].to_string(),
                    line: line_no,
                    wildcard: names.contains('*'),
                });
            }
        }
        SourceKind::Rust => {
            if let Some(caps) = RUST_USE.captures(code) {
                let module = caps[1].to_string();
                let wildcard = module.ends_with("::*");
                out.push(Import {
                    module,
                    line: line_no,
                    wildcard,
                });
            }
        }
        SourceKind::Go => {
            if let Some(caps) = GO_IMPORT.captures(code.trim_end()) {
                out.push(Import {
                    module: caps[1].to_string(),
                    line: line_no,
                    wildcard: false,
                });
            }
        }
        SourceKind::Java => {
            if let Some(caps) = JAVA_IMPORT.captures(code) {
                let module = caps[1].to_string();
                let wildcard = module.ends_with('*');
                out.push(Import {
                    module,
                    line: line_no,
                    wildcard,
                });
            }
        }
        SourceKind::Shell | SourceKind::Sql | SourceKind::Unknown => {}
    }
}

fn scan_types(code: &str, kind: SourceKind, line_no: usize, out: &mut Vec<TypeDecl>) {
    let caps = match kind {
        SourceKind::Python => PY_CLASS.captures(code),
        SourceKind::JavaScript | SourceKind::TypeScript => JS_CLASS.captures(code),
        SourceKind::Rust => RUST_TYPE.captures(code),
        SourceKind::Go => GO_TYPE.captures(code),
        SourceKind::Java => JAVA_CLASS.captures(code),
        _ => None,
    };
    if let Some(caps) = caps {
        out.push(TypeDecl {
            name: caps[1].to_string(),
            line: line_no,
        });
    }
}

fn match_function(code: &str, kind: SourceKind, line_no: usize) -> Option<FunctionDecl> {
    let (name, params, indent, public_hint) = match kind {
        SourceKind::Python => {
            let caps = PY_DEF.captures(code)?;
            let name = caps[2].to_string();
            let public = !name.starts_with('_');
            (name, caps[3].to_string(), caps[1].len(), public)
        }
        SourceKind::JavaScript | SourceKind::TypeScript => {
            let caps = JS_FUNCTION.captures(code)?;
            let public = code.trim_start().starts_with("export");
            (caps[2].to_string(), caps[3].to_string(), caps[1].len(), public)
        }
        SourceKind::Rust => {
            let caps = RUST_FN.captures(code)?;
            let public = caps.get(2).is_some();
            let params = code
                .split_once('(')
                .map(|(_, rest)| rest.split(')').next().unwrap_or("").to_string())
                .unwrap_or_default();
            (caps[3].to_string(), params, caps[1].len(), public)
        }
        SourceKind::Go => {
            let caps = GO_FUNC.captures(code)?;
            let name = caps[1].to_string();
            let public = name.chars().next().is_some_and(|c| c.is_uppercase());
            (name, caps[2].to_string(), 0, public)
        }
        SourceKind::Java => {
            let caps = JAVA_METHOD.captures(code)?;
            let public = code.trim_start().starts_with("public");
            (caps[2].to_string(), caps[3].to_string(), caps[1].len(), public)
        }
        _ => return None,
    };

    let param_count = if params.trim().is_empty() {
        0
    } else {
        params.split(',').count()
    };
    let is_test = match kind {
        SourceKind::Python => name.starts_with("test_"),
        SourceKind::Go => name.starts_with("Test"),
        _ => false,
    };

    Some(FunctionDecl {
        name,
        line: line_no,
        end_line: line_no,
        param_count,
        // Holds the declaration indent until close_function_spans rewrites
        // it with the real nesting depth.
        max_depth: indent,
        is_test,
        is_public: public_hint,
    })
}

/// Second pass: compute end lines and nesting depth for every function.
fn close_function_spans(ast: &mut SourceAst, kind: SourceKind, text: &str) {
    let lines: Vec<&str> = text.lines().collect();

    // Rust-style #[test] attribute marks the following fn as a test.
    if kind == SourceKind::Rust {
        for function in &mut ast.functions {
            if let Some(previous) = function.line.checked_sub(2).and_then(|i| lines.get(i)) {
                if previous.trim_start().starts_with("#[test]")
                    || previous.trim_start().starts_with("#[tokio::test]")
                {
                    function.is_test = true;
                }
            }
        }
    }

    for function in &mut ast.functions {
        let decl_indent = function.max_depth;
        function.max_depth = 0;
        if kind.uses_braces() {
            close_brace_span(function, &lines);
        } else {
            close_indent_span(function, decl_indent, &lines);
        }
    }
}

fn close_brace_span(function: &mut FunctionDecl, lines: &[&str]) {
    let mut depth: i32 = 0;
    let mut max_depth: i32 = 0;
    let mut opened = false;
    for (offset, line) in lines.iter().enumerate().skip(function.line - 1) {
        for b in line.bytes() {
            match b {
                b'{' => {
                    depth += 1;
                    opened = true;
                    max_depth = max_depth.max(depth);
                }
                b'}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            function.end_line = offset + 1;
            function.max_depth = (max_depth - 1).max(0) as usize;
            return;
        }
        // A declaration whose body never opens (trait method, prototype).
        if !opened && offset >= function.line {
            function.end_line = function.line;
            return;
        }
    }
    function.end_line = lines.len();
    function.max_depth = (max_depth - 1).max(0) as usize;
}

fn close_indent_span(function: &mut FunctionDecl, decl_indent: usize, lines: &[&str]) {
    let mut end = function.line;
    let mut max_extra = 0usize;
    for (offset, line) in lines.iter().enumerate().skip(function.line) {
        if line.trim().is_empty() {
            continue;
        }
        let indent = leading_width(line);
        if indent <= decl_indent {
            break;
        }
        end = offset + 1;
        // One indent unit is the body itself; anything deeper is nesting.
        let unit = 4;
        let extra = (indent - decl_indent) / unit;
        max_extra = max_extra.max(extra.saturating_sub(1));
    }
    function.end_line = end;
    function.max_depth = max_extra;
}

fn leading_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_functions_and_spans() {
        let text = "\
import os

def outer(a, b):
    if a:
        if b:
            return 1
    return 0

def _private():
    pass
";
        let ast = parse(SourceKind::Python, text);
        assert_eq!(ast.functions.len(), 2);

        let outer = &ast.functions[0];
        assert_eq!(outer.name, "outer");
        assert_eq!(outer.param_count, 2);
        assert_eq!(outer.line, 3);
        assert_eq!(outer.end_line, 7);
        assert_eq!(outer.max_depth, 2, "two nested ifs beyond the body level");
        assert!(outer.is_public);

        let private = &ast.functions[1];
        assert!(!private.is_public);
        assert_eq!(ast.imports.len(), 1);
        assert_eq!(ast.imports[0].module, "os");
    }

    #[test]
    fn test_python_wildcard_import() {
        let ast = parse(SourceKind::Python, "from os.path import *\n");
        assert_eq!(ast.imports.len(), 1);
        assert!(ast.imports[0].wildcard);
        assert_eq!(ast.imports[0].module, "os.path");
    }

    #[test]
    fn test_rust_functions_and_visibility() {
        let text = "\
use std::collections::HashMap;

pub fn public_api(x: usize, y: usize) -> usize {
    if x > y {
        x
    } else {
        y
    }
}

fn helper() {
    let _ = 1;
}

#[test]
fn test_helper_works() {
    helper();
}
";
        let ast = parse(SourceKind::Rust, text);
        assert_eq!(ast.functions.len(), 3);
        assert!(ast.functions[0].is_public);
        assert_eq!(ast.functions[0].name, "public_api");
        assert_eq!(ast.functions[0].param_count, 2);
        assert_eq!(ast.functions[0].end_line, 9);
        assert!(!ast.functions[1].is_public);
        assert!(ast.functions[2].is_test);
        assert_eq!(ast.imports[0].module, "std::collections::HashMap");
    }

    #[test]
    fn test_rust_wildcard_use() {
        let ast = parse(SourceKind::Rust, "use super::*;\n");
        assert!(ast.imports[0].wildcard);
    }

    #[test]
    fn test_javascript_imports_and_classes() {
        let text = "\
import * as fs from 'fs';
import { join } from 'path';

export class Loader {
}

export function load(root) {
    return root;
}
";
        let ast = parse(SourceKind::JavaScript, text);
        assert_eq!(ast.imports.len(), 2);
        assert!(ast.imports[0].wildcard);
        assert!(!ast.imports[1].wildcard);
        assert_eq!(ast.types.len(), 1);
        assert_eq!(ast.types[0].name, "Loader");
        assert_eq!(ast.functions.len(), 1);
        assert!(ast.functions[0].is_public);
    }

    #[test]
    fn test_string_literals_with_columns() {
        let text = "password = \"secret123\"\nname = 'bob'\n";
        let ast = parse(SourceKind::Python, text);
        assert_eq!(ast.strings.len(), 2);
        assert_eq!(ast.strings[0].value, "secret123");
        assert_eq!(ast.strings[0].line, 1);
        assert_eq!(ast.strings[0].column, 12);
        assert_eq!(ast.strings[1].value, "bob");
    }

    #[test]
    fn test_comments_extracted_not_parsed_as_code() {
        let text = "# def not_a_function():\nx = 1  # trailing note\n";
        let ast = parse(SourceKind::Python, text);
        assert!(ast.functions.is_empty());
        assert_eq!(ast.comments.len(), 2);
        assert_eq!(ast.comments[1].text, "trailing note");
    }

    #[test]
    fn test_block_comments_span_lines() {
        let text = "/* start\nstill comment\nend */\nfn real() {\n}\n";
        let ast = parse(SourceKind::Rust, text);
        assert_eq!(ast.functions.len(), 1);
        assert_eq!(ast.functions[0].name, "real");
        assert!(ast.comments.len() >= 2);
    }

    #[test]
    fn test_comment_marker_inside_string_is_ignored() {
        let text = "url = \"https://example.com\"\n";
        let ast = parse(SourceKind::JavaScript, text);
        assert_eq!(ast.strings.len(), 1);
        assert_eq!(ast.strings[0].value, "https://example.com");
        assert!(ast.comments.is_empty());
    }

    #[test]
    fn test_go_exported_function() {
        let text = "func HandleRequest(w http.ResponseWriter, r *http.Request) {\n}\n\nfunc helper() {\n}\n";
        let ast = parse(SourceKind::Go, text);
        assert_eq!(ast.functions.len(), 2);
        assert!(ast.functions[0].is_public);
        assert_eq!(ast.functions[0].param_count, 2);
        assert!(!ast.functions[1].is_public);
    }

    #[test]
    fn test_function_at_finds_enclosing_span() {
        let text = "def a():\n    pass\n\ndef b():\n    pass\n";
        let ast = parse(SourceKind::Python, text);
        assert_eq!(ast.function_at(2).map(|f| f.name.as_str()), Some("a"));
        assert_eq!(ast.function_at(5).map(|f| f.name.as_str()), Some("b"));
        assert!(ast.function_at(3).is_none());
    }

    #[test]
    fn test_top_level_symbols_sorted() {
        let text = "def zebra():\n    pass\n\nclass Alpha:\n    pass\n";
        let ast = parse(SourceKind::Python, text);
        assert_eq!(ast.top_level_symbols(), vec!["Alpha", "zebra"]);
    }
}
