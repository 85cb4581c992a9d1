//! Store configuration: loading, defaults, validation, schema upgrade.

use crate::error::{StoreError, StoreResult};
use crate::model::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Current config schema version. Documents declaring a newer version are
/// rejected; `1.0` documents are upgraded in memory with a warning.
pub const CONFIG_VERSION: &str = "2.0";

/// How the sync manager resolves records that differ between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    PrimaryWins,
    NewestTimestampWins,
    FailOnConflict,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictPolicy::PrimaryWins => "primary-wins",
            ConflictPolicy::NewestTimestampWins => "newest-timestamp-wins",
            ConflictPolicy::FailOnConflict => "fail-on-conflict",
        })
    }
}

/// Non-fatal issues found while loading or validating a config document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Relational backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub use_wal: bool,
    pub pool_size: usize,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        RelationalConfig {
            path: PathBuf::from("constitution.db"),
            busy_timeout_ms: 5_000,
            use_wal: true,
            pool_size: 4,
            unknown: BTreeMap::new(),
        }
    }
}

/// Document backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub path: PathBuf,
    pub atomic_writes: bool,
    pub backup_retention: usize,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        DocumentConfig {
            path: PathBuf::from("constitution.json"),
            atomic_writes: true,
            backup_retention: 3,
            unknown: BTreeMap::new(),
        }
    }
}

/// Top-level store configuration document.
///
/// Missing fields receive the documented defaults; unknown fields are
/// collected and surfaced as warnings rather than failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub version: String,
    pub primary_backend: BackendKind,
    pub fallback_backend: Option<BackendKind>,
    pub auto_fallback_enabled: bool,
    pub auto_recovery_enabled: bool,
    pub sync_enabled: bool,
    /// 0 means on-write sync only; no periodic reconciliation.
    pub sync_interval_seconds: u64,
    pub conflict_resolution_policy: ConflictPolicy,
    /// Usage events beyond this cap are trimmed oldest-first.
    pub usage_event_cap: usize,
    /// Interval at which the scheduler probes the non-active backend.
    pub probe_interval_seconds: u64,
    /// Deadline for a backend health check.
    pub health_timeout_ms: u64,
    /// Deadline for a full reconciliation pass.
    pub sync_timeout_ms: u64,
    #[serde(rename = "relational")]
    pub relational_config: RelationalConfig,
    #[serde(rename = "document")]
    pub document_config: DocumentConfig,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            version: CONFIG_VERSION.to_string(),
            primary_backend: BackendKind::Relational,
            fallback_backend: Some(BackendKind::Document),
            auto_fallback_enabled: true,
            auto_recovery_enabled: true,
            sync_enabled: true,
            sync_interval_seconds: 300,
            conflict_resolution_policy: ConflictPolicy::PrimaryWins,
            usage_event_cap: 10_000,
            probe_interval_seconds: 30,
            health_timeout_ms: 2_000,
            sync_timeout_ms: 30_000,
            relational_config: RelationalConfig::default(),
            document_config: DocumentConfig::default(),
            unknown: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// Load and validate a TOML config document from disk.
    pub fn load(path: &Path) -> StoreResult<(StoreConfig, Vec<ConfigWarning>)> {
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a TOML config document.
    pub fn from_toml_str(text: &str) -> StoreResult<(StoreConfig, Vec<ConfigWarning>)> {
        let mut warnings = Vec::new();

        let value: toml::Value = text
            .parse()
            .map_err(|e| StoreError::config_invalid(format!("not valid TOML: {e}")))?;
        let value = upgrade_legacy(value, &mut warnings)?;

        let config: StoreConfig = value
            .try_into()
            .map_err(|e| StoreError::config_invalid(e.to_string()))?;

        config.validate(&mut warnings)?;
        Ok((config, warnings))
    }

    /// Validate field constraints, appending warnings for soft issues.
    pub fn validate(&self, warnings: &mut Vec<ConfigWarning>) -> StoreResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(StoreError::config_invalid(format!(
                "unsupported config version '{}', expected '{CONFIG_VERSION}'",
                self.version
            )));
        }
        if let Some(fallback) = self.fallback_backend {
            if fallback == self.primary_backend {
                return Err(StoreError::config_invalid(
                    "fallback_backend must differ from primary_backend",
                ));
            }
        }
        if self.sync_enabled && self.fallback_backend.is_none() {
            return Err(StoreError::config_invalid(
                "sync_enabled requires a fallback_backend",
            ));
        }
        if self.document_config.backup_retention == 0 {
            return Err(StoreError::config_invalid("backup_retention must be >= 1"));
        }
        if self.relational_config.pool_size == 0 {
            return Err(StoreError::config_invalid("pool_size must be >= 1"));
        }
        for (name, path) in [
            ("relational.path", &self.relational_config.path),
            ("document.path", &self.document_config.path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(StoreError::config_invalid(format!("{name} must not be empty")));
            }
        }
        if self.relational_config.path == self.document_config.path {
            return Err(StoreError::config_invalid(
                "relational.path and document.path must differ",
            ));
        }

        for key in self.unknown.keys() {
            warnings.push(ConfigWarning {
                field: key.clone(),
                message: "unknown configuration key ignored".to_string(),
            });
        }
        for (section, unknown) in [
            ("relational", &self.relational_config.unknown),
            ("document", &self.document_config.unknown),
        ] {
            for key in unknown.keys() {
                warnings.push(ConfigWarning {
                    field: format!("{section}.{key}"),
                    message: "unknown configuration key ignored".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Upgrade a `1.0` document to the current schema in memory.
///
/// Legacy key spellings are mapped to their v2 names; anything newer than
/// [`CONFIG_VERSION`] is rejected so a newer core is required to open it.
fn upgrade_legacy(
    value: toml::Value,
    warnings: &mut Vec<ConfigWarning>,
) -> StoreResult<toml::Value> {
    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or(CONFIG_VERSION)
        .to_string();

    match version.as_str() {
        v if v == CONFIG_VERSION => Ok(value),
        "1.0" => {
            let mut table = match value {
                toml::Value::Table(table) => table,
                other => {
                    return Err(StoreError::config_invalid(format!(
                        "config root must be a table, got {}",
                        other.type_str()
                    )));
                }
            };
            // v1 key spellings, renamed in v2.
            for (old, new) in [
                ("backend", "primary_backend"),
                ("fallback", "fallback_backend"),
                ("sync_every", "sync_interval_seconds"),
                ("conflict_policy", "conflict_resolution_policy"),
            ] {
                if let Some(v) = table.remove(old) {
                    table.insert(new.to_string(), v);
                }
            }
            table.insert(
                "version".to_string(),
                toml::Value::String(CONFIG_VERSION.to_string()),
            );
            warnings.push(ConfigWarning {
                field: "version".to_string(),
                message: format!("legacy 1.0 config upgraded in memory to {CONFIG_VERSION}"),
            });
            Ok(toml::Value::Table(table))
        }
        other => Err(StoreError::config_invalid(format!(
            "config version '{other}' is newer than supported '{CONFIG_VERSION}'"
        ))),
    }
}
