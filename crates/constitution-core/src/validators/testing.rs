//! Test hygiene checks (TST).

use crate::finding::Finding;
use crate::source::FileContext;
use crate::validators::RuleValidator;
use constitution_store::Severity;
use regex::Regex;
use std::sync::LazyLock;

static ASSERTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bassert|\.expect\(|expect\(|\bshould\b|require\.|verify\(|\bpanic!").unwrap()
});

/// TST-001: a test that can never fail.
pub struct AssertionlessTestValidator;

impl RuleValidator for AssertionlessTestValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["TST-001"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let lines: Vec<&str> = ctx.text.lines().collect();
        let mut findings = Vec::new();
        for function in &ctx.ast.functions {
            if !function.is_test || function.body_lines() == 0 {
                continue;
            }
            let body = &lines[function.line..function.end_line.min(lines.len())];
            if body.iter().any(|l| ASSERTION.is_match(l)) {
                continue;
            }
            findings.push(Finding::new(
                ctx.path,
                function.line,
                1,
                "TST-001",
                Severity::Minor,
                format!("test '{}' contains no assertions", function.name),
            ));
        }
        findings
    }
}

static SKIP_MARK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#\[ignore|@unittest\.skip|@pytest\.mark\.skip|\bxit\s*\(|\bxdescribe\s*\(|\bt\.Skip\s*\(|@Disabled")
        .unwrap()
});

/// TST-002: a skipped or disabled test.
pub struct SkippedTestValidator;

impl RuleValidator for SkippedTestValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["TST-002"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (line_no, line) in ctx.lines() {
            if let Some(m) = SKIP_MARK.find(line) {
                findings.push(
                    Finding::new(
                        ctx.path,
                        line_no,
                        m.start() + 1,
                        "TST-002",
                        Severity::Info,
                        "skipped test; either fix and re-enable it or delete it",
                    )
                    .with_evidence(line),
                );
            }
        }
        findings
    }
}
