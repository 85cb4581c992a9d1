//! Finding aggregation: dedup, canonical ordering, counts, run summary.

use crate::finding::{Finding, ValidationRun};
use chrono::{DateTime, Utc};
use constitution_store::{BackendKind, Severity};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Consolidate per-file findings into a run result.
///
/// Counts (`finding_count`, `by_rule`, `by_severity`) are computed over the
/// deduplicated set *before* the severity filter, so summary numbers stay
/// accurate while the emitted list honors the threshold. The sink, when
/// provided, is invoked once per emitted finding in canonical order.
pub(crate) fn aggregate(
    per_file: Vec<(PathBuf, Vec<Finding>)>,
    threshold: Option<Severity>,
    backend_used: BackendKind,
    degraded: bool,
    started_at: DateTime<Utc>,
    file_count: usize,
    sink: Option<&(dyn Fn(&Finding) + Sync)>,
) -> ValidationRun {
    let mut seen: HashSet<(PathBuf, Option<usize>, Option<usize>, String, String)> =
        HashSet::new();
    let mut findings: Vec<Finding> = Vec::new();
    for (_, file_findings) in per_file {
        for finding in file_findings {
            let key = (
                finding.file_path.clone(),
                finding.line,
                finding.column,
                finding.rule_id.clone(),
                finding.message.clone(),
            );
            if seen.insert(key) {
                findings.push(finding);
            }
        }
    }

    findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut by_rule: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
    for finding in &findings {
        *by_rule.entry(finding.rule_id.clone()).or_default() += 1;
        *by_severity.entry(finding.severity).or_default() += 1;
    }
    let finding_count = findings.len();

    let emitted: Vec<Finding> = match threshold {
        Some(threshold) => findings
            .into_iter()
            .filter(|f| f.severity >= threshold)
            .collect(),
        None => findings,
    };
    if let Some(sink) = sink {
        for finding in &emitted {
            sink(finding);
        }
    }

    ValidationRun {
        started_at,
        completed_at: Utc::now(),
        file_count,
        finding_count,
        findings: emitted,
        by_rule,
        by_severity,
        backend_used,
        degraded,
    }
}
