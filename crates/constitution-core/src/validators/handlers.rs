//! Error-handling checks (VAL).

use crate::finding::Finding;
use crate::source::{FileContext, SourceKind};
use crate::validators::RuleValidator;
use constitution_store::Severity;
use regex::Regex;
use std::sync::LazyLock;

static RUST_UNWRAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(unwrap|expect)\s*\(").unwrap());
static PY_BARE_EXCEPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*except\s*:").unwrap());

/// VAL-001: errors silently asserted away instead of propagated.
pub struct UncheckedErrorValidator;

impl RuleValidator for UncheckedErrorValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["VAL-001"]
    }

    fn applies_to(&self, kind: SourceKind) -> bool {
        matches!(kind, SourceKind::Rust | SourceKind::Python)
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        match ctx.ast.source_kind() {
            SourceKind::Rust => {
                for (line_no, line) in ctx.lines() {
                    let Some(m) = RUST_UNWRAP.find(line) else {
                        continue;
                    };
                    // Tests assert freely; production code propagates.
                    if ctx.ast.function_at(line_no).is_some_and(|f| f.is_test) {
                        continue;
                    }
                    findings.push(
                        Finding::new(
                            ctx.path,
                            line_no,
                            m.start() + 1,
                            "VAL-001",
                            Severity::Major,
                            "unwrap/expect in non-test code; propagate the error",
                        )
                        .with_evidence(line),
                    );
                }
            }
            SourceKind::Python => {
                for (line_no, line) in ctx.lines() {
                    if PY_BARE_EXCEPT.is_match(line) {
                        findings.push(
                            Finding::new(
                                ctx.path,
                                line_no,
                                1,
                                "VAL-001",
                                Severity::Major,
                                "bare 'except:' swallows every exception including exits",
                            )
                            .with_evidence(line),
                        );
                    }
                }
            }
            _ => {}
        }
        findings
    }
}

static EMPTY_CATCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"catch\s*(\([^)]*\))?\s*\{\s*\}").unwrap());
static CATCH_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"catch\s*(\([^)]*\))?\s*\{\s*$").unwrap());
static PY_EXCEPT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*except\b.*:").unwrap());

/// VAL-002: an exception handler with an empty body.
pub struct EmptyHandlerValidator;

impl RuleValidator for EmptyHandlerValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["VAL-002"]
    }

    fn applies_to(&self, kind: SourceKind) -> bool {
        matches!(
            kind,
            SourceKind::Python
                | SourceKind::JavaScript
                | SourceKind::TypeScript
                | SourceKind::Java
        )
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let lines: Vec<&str> = ctx.text.lines().collect();
        let mut findings = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let line_no = index + 1;
            let empty = if ctx.ast.source_kind() == SourceKind::Python {
                PY_EXCEPT.is_match(line)
                    && next_code_line(&lines, index).is_some_and(|next| next.trim() == "pass")
            } else {
                EMPTY_CATCH.is_match(line)
                    || (CATCH_OPEN.is_match(line)
                        && next_code_line(&lines, index).is_some_and(|next| next.trim() == "}"))
            };
            if empty {
                findings.push(
                    Finding::new(
                        ctx.path,
                        line_no,
                        1,
                        "VAL-002",
                        Severity::Major,
                        "empty exception handler discards the failure",
                    )
                    .with_evidence(line),
                );
            }
        }
        findings
    }
}

fn next_code_line<'a>(lines: &[&'a str], after: usize) -> Option<&'a str> {
    lines
        .iter()
        .skip(after + 1)
        .find(|l| !l.trim().is_empty())
        .copied()
}
