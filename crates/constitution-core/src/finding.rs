//! Finding and validation-run result types.

use chrono::{DateTime, Utc};
use constitution_store::{BackendKind, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Maximum stored length of an evidence snippet, in characters.
pub const MAX_EVIDENCE_LEN: usize = 160;

/// A single rule triggering at a location in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub file_path: PathBuf,
    /// 1-based line; `None` for file-level findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// 0..=100 when the validator can estimate it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
}

impl Finding {
    pub fn new(
        file_path: impl Into<PathBuf>,
        line: usize,
        column: usize,
        rule_id: &str,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Finding {
            file_path: file_path.into(),
            line: Some(line),
            column: Some(column),
            rule_id: rule_id.to_string(),
            severity,
            message: message.into(),
            evidence: None,
            confidence: None,
        }
    }

    /// A finding attached to the file as a whole rather than a location.
    pub fn file_level(
        file_path: impl Into<PathBuf>,
        rule_id: &str,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Finding {
            file_path: file_path.into(),
            line: None,
            column: None,
            rule_id: rule_id.to_string(),
            severity,
            message: message.into(),
            evidence: None,
            confidence: None,
        }
    }

    /// Attach the offending source text, trimmed and truncated.
    pub fn with_evidence(mut self, snippet: &str) -> Self {
        let trimmed = snippet.trim();
        let truncated: String = trimmed.chars().take(MAX_EVIDENCE_LEN).collect();
        self.evidence = Some(truncated);
        self
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence.min(100));
        self
    }

    /// Canonical ordering key: (file, line, column, rule id). File-level
    /// findings sort before line 1.
    pub fn sort_key(&self) -> (&PathBuf, usize, usize, &str) {
        (
            &self.file_path,
            self.line.unwrap_or(0),
            self.column.unwrap_or(0),
            &self.rule_id,
        )
    }

    /// Identity used for deduplication across validators.
    pub fn dedup_key(&self) -> (&PathBuf, Option<usize>, Option<usize>, &str, &str) {
        (
            &self.file_path,
            self.line,
            self.column,
            &self.rule_id,
            &self.message,
        )
    }
}

/// The result of validating a set of paths.
///
/// Counts are computed before severity filtering; `findings` holds only the
/// entries at or above the requested threshold, in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRun {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub file_count: usize,
    /// Total findings before severity filtering.
    pub finding_count: usize,
    pub findings: Vec<Finding>,
    pub by_rule: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub backend_used: BackendKind,
    /// True when the run served from the fallback backend.
    pub degraded: bool,
}
