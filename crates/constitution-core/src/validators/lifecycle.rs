//! Lifecycle checks (LCM).

use crate::finding::Finding;
use crate::source::FileContext;
use crate::validators::RuleValidator;
use constitution_store::Severity;
use regex::Regex;
use std::sync::LazyLock;

static DEPRECATED_MARK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@deprecated\b|#\[deprecated|@Deprecated\b|DeprecationWarning").unwrap()
});
static MIGRATION_NOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(use|see|replaced by|migrate to|instead)\b").unwrap());

/// LCM-001: a deprecation marker without a migration note.
///
/// Deprecations that do not say what to use instead strand their callers.
pub struct DeprecatedApiValidator;

impl RuleValidator for DeprecatedApiValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["LCM-001"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let lines: Vec<&str> = ctx.text.lines().collect();
        let mut findings = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            if !DEPRECATED_MARK.is_match(line) {
                continue;
            }
            // Look for a replacement hint on the marker line or its
            // immediate neighbors.
            let window_start = index.saturating_sub(1);
            let window_end = (index + 2).min(lines.len());
            let has_note = lines[window_start..window_end]
                .iter()
                .any(|l| MIGRATION_NOTE.is_match(l));
            if !has_note {
                findings.push(
                    Finding::new(
                        ctx.path,
                        index + 1,
                        1,
                        "LCM-001",
                        Severity::Minor,
                        "deprecation without a migration note; name the replacement",
                    )
                    .with_evidence(line),
                );
            }
        }
        findings
    }
}

static CODE_LIKE_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[;{}]\s*$|^\s*(def |if |for |while |return |let |const |var |fn |import |from )")
        .unwrap()
});

/// Consecutive code-shaped comment lines that count as a dead block.
const COMMENTED_CODE_RUN: usize = 3;

/// LCM-002: blocks of commented-out code.
pub struct CommentedCodeValidator;

impl RuleValidator for CommentedCodeValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["LCM-002"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        let mut last_line = 0usize;

        for comment in &ctx.ast.comments {
            let code_like = CODE_LIKE_COMMENT.is_match(&comment.text);
            let contiguous = comment.line == last_line + 1;
            if code_like {
                if contiguous && run_len > 0 {
                    run_len += 1;
                } else {
                    flush_run(ctx, run_start, run_len, &mut findings);
                    run_start = comment.line;
                    run_len = 1;
                }
            } else {
                flush_run(ctx, run_start, run_len, &mut findings);
                run_len = 0;
            }
            last_line = comment.line;
        }
        flush_run(ctx, run_start, run_len, &mut findings);
        findings
    }
}

fn flush_run(ctx: &FileContext<'_>, start: usize, len: usize, findings: &mut Vec<Finding>) {
    if len >= COMMENTED_CODE_RUN {
        findings.push(Finding::new(
            ctx.path,
            start,
            1,
            "LCM-002",
            Severity::Minor,
            format!("{len} consecutive lines of commented-out code; delete or restore them"),
        ));
    }
}
