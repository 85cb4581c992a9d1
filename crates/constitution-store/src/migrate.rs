//! One-shot catalog migration between backends, with integrity verification.

use crate::backend::RuleBackend;
use crate::canon::{canonical_digest, canonical_json};
use crate::error::{StoreError, StoreResult};
use crate::model::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Result of a successful migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub source: BackendKind,
    pub destination: BackendKind,
    pub rule_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Digest of the migrated content, for audit trails.
    pub digest: String,
}

/// Copy the whole catalog from `source` to `destination` and verify the
/// destination reads back identical content.
pub fn migrate(
    source: &dyn RuleBackend,
    destination: &dyn RuleBackend,
) -> StoreResult<MigrationReport> {
    let started_at = Utc::now();
    let payload = source.snapshot()?;
    destination.apply_snapshot(&payload)?;
    let verify = destination.snapshot()?;

    let differences = diff(&payload, &verify)?;
    if !differences.is_empty() {
        return Err(StoreError::MigrationIntegrityFailure { differences });
    }

    let report = MigrationReport {
        source: source.kind(),
        destination: destination.kind(),
        rule_count: payload.rules.len(),
        started_at,
        finished_at: Utc::now(),
        digest: canonical_digest(&(&payload.rules, &payload.state))?,
    };
    info!(
        source = %report.source,
        destination = %report.destination,
        rule_count = report.rule_count,
        "migration complete"
    );
    Ok(report)
}

/// Compare two snapshots field by field, naming each divergence.
fn diff(
    expected: &crate::backend::Snapshot,
    actual: &crate::backend::Snapshot,
) -> StoreResult<Vec<String>> {
    let mut differences = Vec::new();

    for (id, rule) in &expected.rules {
        match actual.rules.get(id) {
            None => differences.push(format!("rule {id} missing from destination")),
            Some(copied) => {
                if canonical_json(rule)? != canonical_json(copied)? {
                    differences.push(format!("rule {id} differs after migration"));
                }
            }
        }
    }
    for id in actual.rules.keys() {
        if !expected.rules.contains_key(id) {
            differences.push(format!("unexpected rule {id} in destination"));
        }
    }
    for (id, state) in &expected.state {
        match actual.state.get(id) {
            None => differences.push(format!("state {id} missing from destination")),
            Some(copied) => {
                if canonical_json(state)? != canonical_json(copied)? {
                    differences.push(format!("state {id} differs after migration"));
                }
            }
        }
    }
    if expected.usage_events.len() != actual.usage_events.len() {
        differences.push(format!(
            "usage event count differs: {} vs {}",
            expected.usage_events.len(),
            actual.usage_events.len()
        ));
    }
    if expected.run_history.len() != actual.run_history.len() {
        differences.push(format!(
            "run history count differs: {} vs {}",
            expected.run_history.len(),
            actual.run_history.len()
        ));
    }
    Ok(differences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RuleQuery;
    use crate::backend::relational::RelationalBackend;
    use crate::config::RelationalConfig;
    use crate::model::{UsageEvent, UsageEventKind};
    use crate::testutil::{document_backend, sample_rule};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_migrate_document_to_relational() {
        let dir = TempDir::new().unwrap();
        let source = document_backend(&dir, "source.json");
        for id in ["M-1", "M-2", "M-3"] {
            source.upsert_rule(&sample_rule(id)).unwrap();
        }
        source.disable("M-2", "paused").unwrap();
        source
            .record_event(&UsageEvent::new("M-1", UsageEventKind::Triggered, "ctx"))
            .unwrap();

        let config = RelationalConfig {
            path: dir.path().join("dest.db"),
            busy_timeout_ms: 1_000,
            use_wal: true,
            pool_size: 2,
            unknown: Default::default(),
        };
        let destination =
            RelationalBackend::open(&config, 100, Duration::from_secs(2)).unwrap();

        let report = migrate(source.as_ref(), &destination).unwrap();
        assert_eq!(report.rule_count, 3);
        assert_eq!(report.source, source.kind());

        let migrated = destination.list_rules(&RuleQuery::all()).unwrap();
        assert_eq!(migrated.len(), 3);
        assert!(!destination.get_rule("M-2").unwrap().state.enabled);
        let snapshot = destination.snapshot().unwrap();
        assert_eq!(snapshot.usage_events.len(), 1);
    }

    #[test]
    fn test_migrate_relational_to_document() {
        let dir = TempDir::new().unwrap();
        let config = RelationalConfig {
            path: dir.path().join("source.db"),
            busy_timeout_ms: 1_000,
            use_wal: true,
            pool_size: 2,
            unknown: Default::default(),
        };
        let source = RelationalBackend::open(&config, 100, Duration::from_secs(2)).unwrap();
        source.upsert_rule(&sample_rule("R-1")).unwrap();

        let destination = document_backend(&dir, "dest.json");
        let report = migrate(&source, destination.as_ref()).unwrap();
        assert_eq!(report.rule_count, 1);
        assert!(destination.get_rule("R-1").is_ok());
    }

    #[test]
    fn test_migrate_replaces_preexisting_destination_content() {
        let dir = TempDir::new().unwrap();
        let source = document_backend(&dir, "source.json");
        source.upsert_rule(&sample_rule("KEEP-1")).unwrap();
        let destination = document_backend(&dir, "dest.json");
        destination.upsert_rule(&sample_rule("STALE-1")).unwrap();

        migrate(source.as_ref(), destination.as_ref()).unwrap();
        assert!(destination.get_rule("KEEP-1").is_ok());
        assert!(destination.get_rule("STALE-1").is_err());
    }

    #[test]
    fn test_diff_reports_missing_and_extra_rules() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("X-1")).unwrap();
        b.upsert_rule(&sample_rule("Y-1")).unwrap();

        let differences = diff(&a.snapshot().unwrap(), &b.snapshot().unwrap()).unwrap();
        assert!(differences.iter().any(|d| d.contains("X-1")));
        assert!(differences.iter().any(|d| d.contains("Y-1")));
    }
}
