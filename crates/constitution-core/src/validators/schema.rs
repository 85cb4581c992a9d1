//! SQL construction checks (SCH).

use crate::finding::Finding;
use crate::source::FileContext;
use crate::validators::RuleValidator;
use constitution_store::Severity;
use regex::Regex;
use std::sync::LazyLock;

static SQL_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(select|insert|update|delete)\b").unwrap());

static INTERPOLATION: LazyLock<Regex> = LazyLock::new(|| {
    // String concatenation adjacent to a quote, printf-style %s, .format(),
    // f-string/template braces.
    Regex::new(r#""\s*\+|\+\s*"|'\s*\+|\+\s*'|%\s*\(|\.format\(|\{\w+\}"#).unwrap()
});

/// SCH-001: SQL assembled by string interpolation instead of parameters.
pub struct SqlConcatValidator;

impl RuleValidator for SqlConcatValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["SCH-001"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for literal in &ctx.ast.strings {
            if !SQL_LITERAL.is_match(&literal.value) {
                continue;
            }
            let Some(line) = ctx.line(literal.line) else {
                continue;
            };
            if INTERPOLATION.is_match(line) || is_python_fstring(line, literal.column) {
                findings.push(
                    Finding::new(
                        ctx.path,
                        literal.line,
                        literal.column,
                        "SCH-001",
                        Severity::Major,
                        "SQL statement built by string interpolation; use bound parameters",
                    )
                    .with_evidence(line)
                    .with_confidence(75),
                );
            }
        }
        findings
    }
}

fn is_python_fstring(line: &str, quote_column: usize) -> bool {
    quote_column >= 2
        && line.as_bytes().get(quote_column - 2) == Some(&b'f')
        && line.contains('{')
}

static SELECT_STAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bselect\s+\*\s+from\b").unwrap());

/// SCH-002: `SELECT *` pins the query to the full column set.
pub struct SelectStarValidator;

impl RuleValidator for SelectStarValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["SCH-002"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for literal in &ctx.ast.strings {
            if SELECT_STAR.is_match(&literal.value) {
                findings.push(
                    Finding::new(
                        ctx.path,
                        literal.line,
                        literal.column,
                        "SCH-002",
                        Severity::Minor,
                        "SELECT * couples the query to the full column set",
                    )
                    .with_evidence(ctx.line(literal.line).unwrap_or_default()),
                );
            }
        }
        // SQL files carry statements as bare text, not literals.
        if ctx.ast.source_kind() == crate::source::SourceKind::Sql {
            for (line_no, line) in ctx.lines() {
                if let Some(m) = SELECT_STAR.find(line) {
                    findings.push(
                        Finding::new(
                            ctx.path,
                            line_no,
                            m.start() + 1,
                            "SCH-002",
                            Severity::Minor,
                            "SELECT * couples the query to the full column set",
                        )
                        .with_evidence(line),
                    );
                }
            }
        }
        findings
    }
}
