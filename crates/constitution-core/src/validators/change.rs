//! Change-management checks (CHG).

use crate::finding::Finding;
use crate::source::FileContext;
use crate::validators::RuleValidator;
use constitution_store::Severity;

/// CHG-001: unresolved merge conflict markers.
pub struct ConflictMarkerValidator;

impl RuleValidator for ConflictMarkerValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["CHG-001"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (line_no, line) in ctx.lines() {
            if line.starts_with("<<<<<<< ") || line.starts_with(">>>>>>> ") {
                findings.push(
                    Finding::new(
                        ctx.path,
                        line_no,
                        1,
                        "CHG-001",
                        Severity::Blocker,
                        "unresolved merge conflict marker",
                    )
                    .with_evidence(line)
                    .with_confidence(100),
                );
            }
        }
        findings
    }
}

/// Files beyond this many lines get a file-level finding.
const MAX_FILE_LINES: usize = 1_000;

/// CHG-002: oversized file.
pub struct OversizedFileValidator;

impl RuleValidator for OversizedFileValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["CHG-002"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        if ctx.ast.line_count <= MAX_FILE_LINES {
            return Vec::new();
        }
        vec![Finding::file_level(
            ctx.path,
            "CHG-002",
            Severity::Minor,
            format!(
                "file is {} lines (limit {MAX_FILE_LINES}); split it along module seams",
                ctx.ast.line_count
            ),
        )]
    }
}
