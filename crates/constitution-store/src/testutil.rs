//! Shared fixtures for unit tests.

use crate::backend::document::DocumentBackend;
use crate::backend::{HealthStatus, RuleBackend, RuleQuery, Snapshot, Statistics};
use crate::config::DocumentConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{
    Rule, RuleRecord, RuleState, RunRecord, Severity, StateUpdate, UsageEvent,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

/// A well-formed rule with deterministic timestamps.
pub(crate) fn sample_rule(id: &str) -> Rule {
    Rule {
        rule_id: id.to_string(),
        title: format!("Rule {id}"),
        category: "strings".to_string(),
        severity: Severity::Major,
        description: "A sample rule".to_string(),
        requirements: vec!["must hold".to_string()],
        version: "1.0.0".to_string(),
        effective_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        last_updated: ts("2025-01-01T00:00:00Z"),
        policy_linkage: BTreeMap::new(),
        enabled_default: true,
        validator_hint: None,
        extras: BTreeMap::new(),
    }
}

/// A record pairing `rule` with an explicit enabled/disabled state.
pub(crate) fn record_with_state(rule: Rule, enabled: bool) -> RuleRecord {
    let mut state = RuleState::initial(&rule, ts("2025-01-02T00:00:00Z"));
    state.enabled = enabled;
    if !enabled {
        state.disabled_reason = Some("disabled in test".to_string());
        state.disabled_at = Some(state.updated_at);
    }
    RuleRecord { rule, state }
}

/// Parse a fixed RFC 3339 timestamp.
pub(crate) fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// Open a document backend on a fresh file inside `dir`.
pub(crate) fn document_backend(dir: &TempDir, name: &str) -> Arc<dyn RuleBackend> {
    let config = DocumentConfig {
        path: dir.path().join(name),
        atomic_writes: true,
        backup_retention: 2,
        unknown: Default::default(),
    };
    Arc::new(DocumentBackend::open(&config, 100).unwrap())
}

/// Wraps a backend and injects `BackendUnavailable` while `fail` is set;
/// `fail_health` makes `health()` report unhealthy independently.
pub(crate) struct FlakyBackend {
    inner: Arc<dyn RuleBackend>,
    pub fail: AtomicBool,
    pub fail_health: AtomicBool,
}

impl FlakyBackend {
    pub(crate) fn new(inner: Arc<dyn RuleBackend>) -> Self {
        FlakyBackend {
            inner,
            fail: AtomicBool::new(false),
            fail_health: AtomicBool::new(false),
        }
    }

    fn check(&self) -> StoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("injected failure"))
        } else {
            Ok(())
        }
    }
}

impl RuleBackend for FlakyBackend {
    fn kind(&self) -> crate::model::BackendKind {
        self.inner.kind()
    }
    fn get_rule(&self, rule_id: &str) -> StoreResult<RuleRecord> {
        self.check()?;
        self.inner.get_rule(rule_id)
    }
    fn list_rules(&self, filter: &RuleQuery) -> StoreResult<Vec<RuleRecord>> {
        self.check()?;
        self.inner.list_rules(filter)
    }
    fn upsert_rule(&self, rule: &Rule) -> StoreResult<()> {
        self.check()?;
        self.inner.upsert_rule(rule)
    }
    fn put_record(&self, record: &RuleRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.put_record(record)
    }
    fn enable(&self, rule_id: &str) -> StoreResult<RuleState> {
        self.check()?;
        self.inner.enable(rule_id)
    }
    fn disable(&self, rule_id: &str, reason: &str) -> StoreResult<RuleState> {
        self.check()?;
        self.inner.disable(rule_id, reason)
    }
    fn bulk_set(&self, updates: &[StateUpdate]) -> StoreResult<usize> {
        self.check()?;
        self.inner.bulk_set(updates)
    }
    fn statistics(&self) -> StoreResult<Statistics> {
        self.check()?;
        self.inner.statistics()
    }
    fn record_event(&self, event: &UsageEvent) -> StoreResult<()> {
        self.check()?;
        self.inner.record_event(event)
    }
    fn record_run(&self, run: &RunRecord) -> StoreResult<()> {
        self.check()?;
        self.inner.record_run(run)
    }
    fn health(&self) -> HealthStatus {
        if self.fail_health.load(Ordering::SeqCst) {
            HealthStatus::Unhealthy {
                reason: "injected".to_string(),
            }
        } else {
            self.inner.health()
        }
    }
    fn snapshot(&self) -> StoreResult<Snapshot> {
        self.check()?;
        self.inner.snapshot()
    }
    fn apply_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        self.check()?;
        self.inner.apply_snapshot(snapshot)
    }
}
