//! Shared data model: rules, per-rule state, usage events, run records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum stored length of a usage-event context string.
pub const MAX_EVENT_CONTEXT_LEN: usize = 512;

/// Rule severity, ordered from least to most severe so that derived
/// ordering can drive threshold filtering (`severity >= threshold`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Critical,
    Blocker,
}

impl Severity {
    /// All severities, most severe first.
    pub const ALL: [Severity; 5] = [
        Severity::Blocker,
        Severity::Critical,
        Severity::Major,
        Severity::Minor,
        Severity::Info,
    ];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
            Severity::Blocker => "blocker",
        })
    }
}

/// Which concrete backend a record or operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Relational,
    Document,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Relational => "relational",
            BackendKind::Document => "document",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "relational" => Some(BackendKind::Relational),
            "document" => Some(BackendKind::Document),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable authored rule definition.
///
/// Rules are loaded once from the constitution documents and never mutated
/// at runtime; only the [`RuleState`] overlay changes. Unknown keys from the
/// source document are preserved in `extras` for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub title: String,
    pub category: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub version: String,
    pub effective_date: NaiveDate,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub policy_linkage: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_enabled")]
    pub enabled_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_hint: Option<String>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

/// Mutable per-rule overlay. Exactly one state exists per stored rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    pub rule_id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RuleState {
    /// The default state a rule receives when it first enters a backend.
    pub fn initial(rule: &Rule, now: DateTime<Utc>) -> Self {
        RuleState {
            rule_id: rule.rule_id.clone(),
            enabled: rule.enabled_default,
            disabled_reason: None,
            disabled_at: None,
            updated_at: now,
        }
    }
}

/// A rule together with its runtime state, as returned by backend reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub rule: Rule,
    pub state: RuleState,
}

impl RuleRecord {
    /// The newest mutation timestamp carried by either half of the record.
    ///
    /// Used by newest-timestamp-wins conflict resolution.
    pub fn newest_timestamp(&self) -> DateTime<Utc> {
        self.state.updated_at.max(self.rule.last_updated)
    }
}

/// Derived per-category aggregate. Recomputed on read, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub count: usize,
    pub enabled_count: usize,
}

/// What kind of rule activity a usage event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageEventKind {
    Triggered,
    Enabled,
    Disabled,
    Overridden,
}

impl UsageEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UsageEventKind::Triggered => "triggered",
            UsageEventKind::Enabled => "enabled",
            UsageEventKind::Disabled => "disabled",
            UsageEventKind::Overridden => "overridden",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "triggered" => Some(UsageEventKind::Triggered),
            "enabled" => Some(UsageEventKind::Enabled),
            "disabled" => Some(UsageEventKind::Disabled),
            "overridden" => Some(UsageEventKind::Overridden),
            _ => None,
        }
    }
}

impl fmt::Display for UsageEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only observability record for rule activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub rule_id: String,
    pub kind: UsageEventKind,
    pub context: String,
}

impl UsageEvent {
    /// Build an event, truncating the context to [`MAX_EVENT_CONTEXT_LEN`].
    pub fn new(rule_id: impl Into<String>, kind: UsageEventKind, context: impl Into<String>) -> Self {
        let mut context = context.into();
        if context.len() > MAX_EVENT_CONTEXT_LEN {
            let mut cut = MAX_EVENT_CONTEXT_LEN;
            while !context.is_char_boundary(cut) {
                cut -= 1;
            }
            context.truncate(cut);
        }
        UsageEvent {
            timestamp: Utc::now(),
            rule_id: rule_id.into(),
            kind,
            context,
        }
    }
}

/// Per-run metadata persisted to the backend's run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub file_count: usize,
    pub finding_count: usize,
    pub backend_used: BackendKind,
    pub degraded: bool,
}

/// A single enable/disable instruction within a bulk update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub rule_id: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
