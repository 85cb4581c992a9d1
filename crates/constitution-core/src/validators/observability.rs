//! Observability hygiene checks (OBS).

use crate::finding::Finding;
use crate::source::{FileContext, SourceKind};
use crate::validators::RuleValidator;
use constitution_store::Severity;
use regex::Regex;
use std::sync::LazyLock;

static PY_PRINT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*print\s*\(").unwrap());
static JS_CONSOLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bconsole\.(log|debug|info)\s*\(").unwrap());
static RUST_PRINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(println!|print!|eprintln!)\s*\(").unwrap());
static GO_PRINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfmt\.Print(ln|f)?\s*\(").unwrap());
static JAVA_PRINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bSystem\.(out|err)\.print").unwrap());

/// OBS-001: raw prints where structured logging belongs.
pub struct DebugPrintValidator;

impl RuleValidator for DebugPrintValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["OBS-001"]
    }

    fn applies_to(&self, kind: SourceKind) -> bool {
        !matches!(kind, SourceKind::Shell | SourceKind::Sql | SourceKind::Unknown)
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let pattern: &Regex = match ctx.ast.source_kind() {
            SourceKind::Python => &PY_PRINT,
            SourceKind::JavaScript | SourceKind::TypeScript => &JS_CONSOLE,
            SourceKind::Rust => &RUST_PRINT,
            SourceKind::Go => &GO_PRINT,
            SourceKind::Java => &JAVA_PRINT,
            _ => return Vec::new(),
        };

        let mut findings = Vec::new();
        for (line_no, line) in ctx.lines() {
            let Some(m) = pattern.find(line) else {
                continue;
            };
            // Prints inside tests are deliberate debugging aids.
            if ctx.ast.function_at(line_no).is_some_and(|f| f.is_test) {
                continue;
            }
            findings.push(
                Finding::new(
                    ctx.path,
                    line_no,
                    m.start() + 1,
                    "OBS-001",
                    Severity::Minor,
                    "raw print in production code; use the logging facility",
                )
                .with_evidence(line),
            );
        }
        findings
    }
}

static DEBUG_ARTIFACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(pdb\.set_trace\s*\(|breakpoint\s*\(\s*\)|debugger\s*;|dbg!\s*\()").unwrap()
});

/// OBS-002: interactive debugger artifacts left in the source.
pub struct DebuggerArtifactValidator;

impl RuleValidator for DebuggerArtifactValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["OBS-002"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (line_no, line) in ctx.lines() {
            if let Some(m) = DEBUG_ARTIFACT.find(line) {
                findings.push(
                    Finding::new(
                        ctx.path,
                        line_no,
                        m.start() + 1,
                        "OBS-002",
                        Severity::Major,
                        "debugger artifact left in source",
                    )
                    .with_evidence(line)
                    .with_confidence(95),
                );
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::testsupport::{rule_ids, run_validator};

    #[test]
    fn test_python_print_flagged() {
        let findings = run_validator(&DebugPrintValidator, "job.py", "print(result)\n");
        assert_eq!(rule_ids(&findings), vec!["OBS-001"]);
    }

    #[test]
    fn test_print_inside_test_function_exempt() {
        let text = "def test_output():\n    print(\"checking\")\n";
        let findings = run_validator(&DebugPrintValidator, "test_job.py", text);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_console_log_flagged_in_ts() {
        let findings =
            run_validator(&DebugPrintValidator, "app.ts", "console.log('loaded');\n");
        assert_eq!(rule_ids(&findings), vec!["OBS-001"]);
    }

    #[test]
    fn test_rust_println_flagged_outside_tests() {
        let text = "fn run() {\n    println!(\"done\");\n}\n";
        let findings = run_validator(&DebugPrintValidator, "main.rs", text);
        assert_eq!(rule_ids(&findings), vec!["OBS-001"]);
    }

    #[test]
    fn test_debugger_artifacts_flagged() {
        let findings =
            run_validator(&DebuggerArtifactValidator, "x.py", "pdb.set_trace()\n");
        assert_eq!(rule_ids(&findings), vec!["OBS-002"]);

        let findings = run_validator(&DebuggerArtifactValidator, "x.js", "debugger;\n");
        assert_eq!(rule_ids(&findings), vec!["OBS-002"]);

        let findings = run_validator(
            &DebuggerArtifactValidator,
            "x.rs",
            "fn f() {\n    dbg!(value);\n}\n",
        );
        assert_eq!(rule_ids(&findings), vec!["OBS-002"]);
    }
}
