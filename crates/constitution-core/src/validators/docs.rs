//! Documentation checks (DOC).

use crate::finding::Finding;
use crate::source::{FileContext, SourceKind};
use crate::validators::RuleValidator;
use constitution_store::Severity;

/// How many leading lines may pass before a module header must appear.
const HEADER_WINDOW: usize = 5;

/// DOC-001: no module-level header comment or docstring.
pub struct ModuleHeaderValidator;

impl RuleValidator for ModuleHeaderValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["DOC-001"]
    }

    fn applies_to(&self, kind: SourceKind) -> bool {
        matches!(
            kind,
            SourceKind::Python | SourceKind::Rust | SourceKind::Go | SourceKind::Java
        )
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        // Trivial files do not need a header.
        if ctx.ast.line_count < 20 {
            return Vec::new();
        }
        // A shebang is not documentation; `//!` module docs are.
        let has_comment_header = ctx
            .ast
            .comments
            .iter()
            .any(|c| c.line <= HEADER_WINDOW && !c.text.starts_with("!/"));
        let has_docstring = ctx.ast.source_kind() == SourceKind::Python
            && ctx
                .ast
                .strings
                .iter()
                .any(|s| s.line <= HEADER_WINDOW && s.value.len() > 10);
        if has_comment_header || has_docstring {
            return Vec::new();
        }
        vec![Finding::file_level(
            ctx.path,
            "DOC-001",
            Severity::Info,
            "module has no header comment or docstring",
        )]
    }
}

/// Bodies below this size are self-describing.
const DOC_BODY_THRESHOLD: usize = 10;

/// DOC-002: a substantial public function with no documentation.
pub struct PublicDocValidator;

impl RuleValidator for PublicDocValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["DOC-002"]
    }

    fn applies_to(&self, kind: SourceKind) -> bool {
        matches!(
            kind,
            SourceKind::Python | SourceKind::Rust | SourceKind::Go | SourceKind::Java
        )
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for function in &ctx.ast.functions {
            if !function.is_public
                || function.is_test
                || function.body_lines() < DOC_BODY_THRESHOLD
            {
                continue;
            }
            let documented = match ctx.ast.source_kind() {
                // Docstring on the first body line.
                SourceKind::Python => ctx
                    .ast
                    .strings
                    .iter()
                    .any(|s| s.line == function.line + 1),
                // Comment directly above the declaration.
                _ => ctx
                    .ast
                    .comments
                    .iter()
                    .any(|c| c.line + 1 == function.line || c.line == function.line),
            };
            if !documented {
                findings.push(Finding::new(
                    ctx.path,
                    function.line,
                    1,
                    "DOC-002",
                    Severity::Minor,
                    format!(
                        "public function '{}' ({} lines) has no documentation",
                        function.name,
                        function.body_lines()
                    ),
                ));
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::testsupport::{rule_ids, run_validator};

    fn padded(body: &str) -> String {
        // Pad past the trivial-file threshold.
        format!("{body}{}", "\n".repeat(25))
    }

    #[test]
    fn test_module_without_header_flagged() {
        let text = padded("import os\n\nx = 1\n");
        let findings = run_validator(&ModuleHeaderValidator, "big.py", &text);
        assert_eq!(rule_ids(&findings), vec!["DOC-001"]);
        assert_eq!(findings[0].line, None, "file-level finding");
    }

    #[test]
    fn test_module_docstring_satisfies_header() {
        let text = padded("\"\"\"Loads and validates the catalog.\"\"\"\nimport os\n");
        let findings = run_validator(&ModuleHeaderValidator, "big.py", &text);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_short_file_exempt_from_header() {
        let findings = run_validator(&ModuleHeaderValidator, "small.py", "x = 1\n");
        assert!(findings.is_empty());
    }

    #[test]
    fn test_undocumented_public_function_flagged() {
        let body: String = (0..12).map(|i| format!("    x{i} = {i}\n")).collect();
        let text = format!("def handler(a):\n{body}");
        let findings = run_validator(&PublicDocValidator, "api.py", &text);
        assert_eq!(rule_ids(&findings), vec!["DOC-002"]);
        assert!(findings[0].message.contains("handler"));
    }

    #[test]
    fn test_docstring_counts_as_documentation() {
        let body: String = (0..12).map(|i| format!("    x{i} = {i}\n")).collect();
        let text = format!("def handler(a):\n    \"\"\"Handles a request.\"\"\"\n{body}");
        let findings = run_validator(&PublicDocValidator, "api.py", &text);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_private_and_short_functions_exempt() {
        let body: String = (0..12).map(|i| format!("    x{i} = {i}\n")).collect();
        let text = format!("def _internal(a):\n{body}\ndef tiny():\n    pass\n");
        let findings = run_validator(&PublicDocValidator, "api.py", &text);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_rust_doc_comment_counts() {
        let body: String = (0..12).map(|i| format!("    let x{i} = {i};\n")).collect();
        let documented = format!("/// Does the thing.\npub fn run() {{\n{body}}}\n");
        let findings = run_validator(&PublicDocValidator, "lib.rs", &documented);
        assert!(findings.is_empty());

        let undocumented = format!("pub fn run() {{\n{body}}}\n");
        let findings = run_validator(&PublicDocValidator, "lib.rs", &undocumented);
        assert_eq!(rule_ids(&findings), vec!["DOC-002"]);
    }
}
