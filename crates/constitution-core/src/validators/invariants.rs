//! Structural invariant checks (INV).

use crate::finding::Finding;
use crate::source::{FileContext, SourceKind};
use crate::validators::RuleValidator;
use constitution_store::Severity;
use regex::Regex;
use std::sync::LazyLock;

static RUST_STATIC_MUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bstatic\s+mut\s+\w+").unwrap());
static PY_GLOBAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s+global\s+\w+").unwrap());

/// INV-001: mutable global state.
pub struct MutableGlobalValidator;

impl RuleValidator for MutableGlobalValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["INV-001"]
    }

    fn applies_to(&self, kind: SourceKind) -> bool {
        matches!(kind, SourceKind::Rust | SourceKind::Python)
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let pattern: &Regex = match ctx.ast.source_kind() {
            SourceKind::Rust => &RUST_STATIC_MUT,
            SourceKind::Python => &PY_GLOBAL,
            _ => return Vec::new(),
        };
        let mut findings = Vec::new();
        for (line_no, line) in ctx.lines() {
            if let Some(m) = pattern.find(line) {
                findings.push(
                    Finding::new(
                        ctx.path,
                        line_no,
                        m.start() + 1,
                        "INV-001",
                        Severity::Major,
                        "mutable global state; thread it through a handle instead",
                    )
                    .with_evidence(line),
                );
            }
        }
        findings
    }
}

/// Nesting beyond this depth inside a function body is a finding.
const MAX_NESTING: usize = 4;

/// INV-002: deeply nested control flow.
pub struct DeepNestingValidator;

impl RuleValidator for DeepNestingValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["INV-002"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for function in &ctx.ast.functions {
            if function.max_depth >= MAX_NESTING {
                findings.push(Finding::new(
                    ctx.path,
                    function.line,
                    1,
                    "INV-002",
                    Severity::Minor,
                    format!(
                        "function '{}' nests {} levels deep (limit {})",
                        function.name,
                        function.max_depth,
                        MAX_NESTING - 1
                    ),
                ));
            }
        }
        findings
    }
}
