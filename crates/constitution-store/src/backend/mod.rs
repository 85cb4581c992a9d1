//! Backend capability set shared by the relational and document stores.

pub mod document;
pub mod relational;

use crate::error::StoreResult;
use crate::model::{
    BackendKind, Category, Rule, RuleRecord, RuleState, RunRecord, Severity, StateUpdate,
    UsageEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// On-disk/layout schema version shared by both backends and snapshots.
///
/// Backends refuse to open artifacts whose version is newer than this.
pub const SCHEMA_VERSION: u32 = 2;

/// Health of a backend, as reported by [`RuleBackend::health`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl HealthStatus {
    /// True for `Healthy` and `Degraded`; a degraded backend still serves.
    pub fn is_serving(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy { .. })
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Filter applied by [`RuleBackend::list_rules`].
///
/// All criteria are conjunctive; results are ordered by `rule_id` ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleQuery {
    pub category: Option<String>,
    pub enabled: Option<bool>,
    pub contains: Option<String>,
}

impl RuleQuery {
    pub fn all() -> Self {
        RuleQuery::default()
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn contains(mut self, needle: impl Into<String>) -> Self {
        self.contains = Some(needle.into());
        self
    }

    /// Whether a record passes this filter.
    pub fn matches(&self, record: &RuleRecord) -> bool {
        if let Some(category) = &self.category {
            if record.rule.category != *category {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if record.state.enabled != enabled {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            let needle = needle.to_lowercase();
            let haystack = format!(
                "{} {} {}",
                record.rule.rule_id, record.rule.title, record.rule.description
            )
            .to_lowercase();
            if !haystack.contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts over a backend's rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: Vec<Category>,
}

impl Statistics {
    /// Compute statistics from a full record listing.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a RuleRecord>) -> Self {
        let mut stats = Statistics::default();
        let mut categories: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for record in records {
            stats.total += 1;
            if record.state.enabled {
                stats.enabled += 1;
            } else {
                stats.disabled += 1;
            }
            *stats.by_severity.entry(record.rule.severity).or_default() += 1;
            let entry = categories.entry(record.rule.category.clone()).or_default();
            entry.0 += 1;
            if record.state.enabled {
                entry.1 += 1;
            }
        }
        stats.by_category = categories
            .into_iter()
            .map(|(name, (count, enabled_count))| Category {
                name,
                count,
                enabled_count,
            })
            .collect();
        stats
    }
}

/// A serialized point-in-time view of a backend's full contents.
///
/// Snapshots drive reconciliation and migration; applying one replaces the
/// destination's contents wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub taken_at: DateTime<Utc>,
    pub backend: BackendKind,
    pub rules: BTreeMap<String, Rule>,
    pub state: BTreeMap<String, RuleState>,
    pub usage_events: Vec<UsageEvent>,
    pub run_history: Vec<RunRecord>,
}

impl Snapshot {
    pub fn empty(backend: BackendKind) -> Self {
        Snapshot {
            schema_version: SCHEMA_VERSION,
            taken_at: Utc::now(),
            backend,
            rules: BTreeMap::new(),
            state: BTreeMap::new(),
            usage_events: Vec::new(),
            run_history: Vec::new(),
        }
    }

    /// Records keyed by rule id, pairing each rule with its state.
    ///
    /// State coherence (one state per rule) is a backend invariant; a rule
    /// missing its state here indicates a corrupted artifact and is skipped.
    pub fn records(&self) -> impl Iterator<Item = RuleRecord> + '_ {
        self.rules.iter().filter_map(|(id, rule)| {
            self.state.get(id).map(|state| RuleRecord {
                rule: rule.clone(),
                state: state.clone(),
            })
        })
    }
}

/// Capability set every backend implements with identical semantics.
///
/// Backends are shared behind `Arc<dyn RuleBackend>` and must serialize
/// their own mutations internally: within one process at most one thread
/// mutates a given backend at a time.
pub trait RuleBackend: Send + Sync {
    /// Which concrete backend this is.
    fn kind(&self) -> BackendKind;

    /// Fetch a rule with its state.
    fn get_rule(&self, rule_id: &str) -> StoreResult<RuleRecord>;

    /// List rules passing `filter`, ordered by `rule_id` ascending.
    fn list_rules(&self, filter: &RuleQuery) -> StoreResult<Vec<RuleRecord>>;

    /// Insert a rule (with its default state) or replace an existing rule
    /// definition while preserving its current state.
    fn upsert_rule(&self, rule: &Rule) -> StoreResult<()>;

    /// Write a full record (rule + state), as pushed by sync.
    fn put_record(&self, record: &RuleRecord) -> StoreResult<()>;

    /// Enable a rule; returns the state prior to the change.
    fn enable(&self, rule_id: &str) -> StoreResult<RuleState>;

    /// Disable a rule with a reason; returns the state prior to the change.
    fn disable(&self, rule_id: &str, reason: &str) -> StoreResult<RuleState>;

    /// Apply a batch of state updates atomically. Fails with `NotFound`
    /// (and applies nothing) if any referenced rule is absent.
    fn bulk_set(&self, updates: &[StateUpdate]) -> StoreResult<usize>;

    /// Aggregate counts by severity, category, and enablement.
    fn statistics(&self) -> StoreResult<Statistics>;

    /// Append a usage event, trimming oldest events beyond the configured cap.
    fn record_event(&self, event: &UsageEvent) -> StoreResult<()>;

    /// Append a validation-run record.
    fn record_run(&self, run: &RunRecord) -> StoreResult<()>;

    /// Cheap liveness/schema probe.
    fn health(&self) -> HealthStatus;

    /// Full-content snapshot for sync and migration.
    fn snapshot(&self) -> StoreResult<Snapshot>;

    /// Replace this backend's contents with the snapshot, atomically.
    fn apply_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{record_with_state, sample_rule};

    #[test]
    fn test_query_category_and_enabled_are_conjunctive() {
        let mut record = record_with_state(sample_rule("STR-001"), true);
        record.rule.category = "strings".to_string();

        assert!(RuleQuery::all().matches(&record));
        assert!(RuleQuery::all().category("strings").enabled(true).matches(&record));
        assert!(!RuleQuery::all().category("schema").matches(&record));
        assert!(!RuleQuery::all().enabled(false).matches(&record));
    }

    #[test]
    fn test_query_contains_searches_id_title_description() {
        let mut record = record_with_state(sample_rule("SCH-010"), true);
        record.rule.title = "No breaking schema drift".to_string();
        record.rule.description = "Migrations must be additive".to_string();

        assert!(RuleQuery::all().contains("sch-010").matches(&record));
        assert!(RuleQuery::all().contains("BREAKING").matches(&record));
        assert!(RuleQuery::all().contains("additive").matches(&record));
        assert!(!RuleQuery::all().contains("quantum").matches(&record));
    }

    #[test]
    fn test_statistics_counts_by_severity_and_category() {
        let mut a = record_with_state(sample_rule("A-1"), true);
        a.rule.severity = Severity::Blocker;
        a.rule.category = "alpha".to_string();
        let mut b = record_with_state(sample_rule("B-1"), false);
        b.rule.severity = Severity::Blocker;
        b.rule.category = "beta".to_string();
        let mut c = record_with_state(sample_rule("B-2"), true);
        c.rule.severity = Severity::Info;
        c.rule.category = "beta".to_string();

        let stats = Statistics::from_records([&a, &b, &c]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.enabled, 2);
        assert_eq!(stats.disabled, 1);
        assert_eq!(stats.by_severity[&Severity::Blocker], 2);
        assert_eq!(stats.by_severity[&Severity::Info], 1);
        let beta = stats.by_category.iter().find(|c| c.name == "beta").unwrap();
        assert_eq!(beta.count, 2);
        assert_eq!(beta.enabled_count, 1);
    }

    #[test]
    fn test_snapshot_records_pairs_rule_with_state() {
        let mut snapshot = Snapshot::empty(BackendKind::Document);
        let record = record_with_state(sample_rule("R-001"), true);
        snapshot
            .rules
            .insert("R-001".to_string(), record.rule.clone());
        snapshot
            .state
            .insert("R-001".to_string(), record.state.clone());
        // An orphan rule without state is skipped rather than fabricated.
        snapshot
            .rules
            .insert("R-002".to_string(), sample_rule("R-002"));

        let records: Vec<RuleRecord> = snapshot.records().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rule.rule_id, "R-001");
    }

    #[test]
    fn test_health_status_serving() {
        assert!(HealthStatus::Healthy.is_serving());
        assert!(
            HealthStatus::Degraded {
                reason: "count drift".to_string()
            }
            .is_serving()
        );
        assert!(
            !HealthStatus::Unhealthy {
                reason: "gone".to_string()
            }
            .is_serving()
        );
    }
}
