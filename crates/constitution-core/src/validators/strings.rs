//! String hygiene checks (STR).

use crate::finding::Finding;
use crate::source::FileContext;
use crate::validators::RuleValidator;
use constitution_store::Severity;
use std::collections::HashMap;

/// Literals shorter than this are too generic to be worth deduplicating.
const MIN_LITERAL_LEN: usize = 8;
/// Occurrences at which a repeated literal becomes a finding.
const DUPLICATE_THRESHOLD: usize = 3;

/// STR-001: the same long string literal repeated across the file.
pub struct DuplicateLiteralValidator;

impl RuleValidator for DuplicateLiteralValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["STR-001"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut occurrences: HashMap<&str, Vec<(usize, usize)>> = HashMap::new();
        for literal in &ctx.ast.strings {
            if literal.value.len() >= MIN_LITERAL_LEN {
                occurrences
                    .entry(literal.value.as_str())
                    .or_default()
                    .push((literal.line, literal.column));
            }
        }

        let mut findings: Vec<Finding> = occurrences
            .into_iter()
            .filter(|(_, positions)| positions.len() >= DUPLICATE_THRESHOLD)
            .map(|(value, positions)| {
                let (line, column) = positions[0];
                Finding::new(
                    ctx.path,
                    line,
                    column,
                    "STR-001",
                    Severity::Minor,
                    format!(
                        "string literal \"{value}\" repeated {} times; extract a constant",
                        positions.len()
                    ),
                )
            })
            .collect();
        findings.sort_by_key(|f| (f.line, f.column));
        findings
    }
}

const MAX_LINE_LEN: usize = 120;

/// STR-002: overlong line.
pub struct LongLineValidator;

impl RuleValidator for LongLineValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["STR-002"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (line_no, line) in ctx.lines() {
            let width = line.chars().count();
            if width > MAX_LINE_LEN {
                findings.push(Finding::new(
                    ctx.path,
                    line_no,
                    MAX_LINE_LEN + 1,
                    "STR-002",
                    Severity::Minor,
                    format!("line is {width} characters (limit {MAX_LINE_LEN})"),
                ));
            }
        }
        findings
    }
}
