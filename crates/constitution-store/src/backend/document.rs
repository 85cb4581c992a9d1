//! Single-file document backend.
//!
//! The entire catalog lives in one JSON document. Every mutation is a
//! read-modify-write of the whole document through the atomic writer, so a
//! crash mid-write leaves either the old or the new content. Parse failures
//! are repaired from the backup ring; if no backup parses the backend
//! refuses to serve.

use crate::atomic::AtomicFileWriter;
use crate::backend::{
    HealthStatus, RuleBackend, RuleQuery, SCHEMA_VERSION, Snapshot, Statistics,
};
use crate::config::DocumentConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{
    BackendKind, Rule, RuleRecord, RuleState, RunRecord, StateUpdate, UsageEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::warn;

/// Serialized shape of the document file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Document {
    schema_version: u32,
    written_at: DateTime<Utc>,
    rules: BTreeMap<String, Rule>,
    state: BTreeMap<String, RuleState>,
    usage_events: Vec<UsageEvent>,
    run_history: Vec<RunRecord>,
}

impl Document {
    fn empty() -> Self {
        Document {
            schema_version: SCHEMA_VERSION,
            written_at: Utc::now(),
            rules: BTreeMap::new(),
            state: BTreeMap::new(),
            usage_events: Vec::new(),
            run_history: Vec::new(),
        }
    }
}

/// Parsed document plus the file mtime it was read at.
struct CachedDocument {
    modified: Option<SystemTime>,
    document: Document,
}

/// Backend storing the full catalog in a single JSON file.
pub struct DocumentBackend {
    path: PathBuf,
    writer: AtomicFileWriter,
    atomic_writes: bool,
    usage_event_cap: usize,
    cache: Mutex<Option<CachedDocument>>,
}

impl DocumentBackend {
    /// Open (or create) the document file.
    ///
    /// A missing file is initialized empty. A file that fails to parse is
    /// restored from the most recent parseable backup; if none parses the
    /// open fails with `BackendCorrupt`.
    pub fn open(config: &DocumentConfig, usage_event_cap: usize) -> StoreResult<Self> {
        let backend = DocumentBackend {
            path: config.path.clone(),
            writer: AtomicFileWriter::new(&config.path, config.backup_retention),
            atomic_writes: config.atomic_writes,
            usage_event_cap,
            cache: Mutex::new(None),
        };

        if !backend.path.exists() {
            backend.persist(&Document::empty())?;
        } else {
            // Force an initial load so corruption is surfaced at open time.
            backend.with_document(|_| Ok(()))?;
        }
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_mtime(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn parse_file(&self) -> StoreResult<Document> {
        let bytes = fs::read(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let document: Document = serde_json::from_slice(&bytes)?;
        if document.schema_version > SCHEMA_VERSION {
            return Err(StoreError::IncompatibleSchema {
                found: document.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(document)
    }

    /// Load the document, repairing from backups on parse failure.
    fn load(&self) -> StoreResult<Document> {
        match self.parse_file() {
            Ok(document) => Ok(document),
            Err(StoreError::IncompatibleSchema { found, supported }) => {
                Err(StoreError::IncompatibleSchema { found, supported })
            }
            Err(first_error) => {
                warn!(
                    path = %self.path.display(),
                    error = %first_error,
                    "document backend failed to parse, attempting backup restore"
                );
                loop {
                    self.writer.restore_latest_backup().map_err(|_| {
                        StoreError::BackendCorrupt {
                            path: self.path.clone(),
                        }
                    })?;
                    match self.parse_file() {
                        Ok(document) => return Ok(document),
                        Err(_) => {
                            // The restored backup is itself bad; drop it so the
                            // next iteration tries the one before it.
                            match self.writer.latest_backup() {
                                Ok(Some(bad)) if fs::remove_file(&bad).is_ok() => {}
                                _ => {
                                    return Err(StoreError::BackendCorrupt {
                                        path: self.path.clone(),
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Run `f` against a read-only view of the current document.
    ///
    /// The parsed document is cached until the file mtime changes.
    fn with_document<T>(&self, f: impl FnOnce(&Document) -> StoreResult<T>) -> StoreResult<T> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| StoreError::unavailable("document cache lock poisoned"))?;
        let mtime = self.read_mtime();
        let fresh = match cache.as_ref() {
            Some(cached) if cached.modified == mtime && mtime.is_some() => None,
            _ => Some(self.load()?),
        };
        if let Some(document) = fresh {
            *cache = Some(CachedDocument {
                modified: mtime,
                document,
            });
        }
        let cached = cache.as_ref().ok_or_else(|| {
            StoreError::unavailable("document cache unexpectedly empty")
        })?;
        f(&cached.document)
    }

    /// Read-modify-write the whole document under the cache lock.
    fn mutate<T>(&self, f: impl FnOnce(&mut Document) -> StoreResult<T>) -> StoreResult<T> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| StoreError::unavailable("document cache lock poisoned"))?;
        let mut document = match cache.take() {
            Some(cached) if cached.modified == self.read_mtime() && cached.modified.is_some() => {
                cached.document
            }
            _ => self.load()?,
        };

        let result = f(&mut document)?;
        document.written_at = Utc::now();
        self.persist(&document)?;
        *cache = Some(CachedDocument {
            modified: self.read_mtime(),
            document,
        });
        Ok(result)
    }

    fn persist(&self, document: &Document) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        if self.atomic_writes {
            self.writer.write(&bytes)
        } else {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            fs::write(&self.path, &bytes).map_err(|e| StoreError::io(&self.path, e))
        }
    }

    fn record_from(document: &Document, rule_id: &str) -> StoreResult<RuleRecord> {
        let rule = document
            .rules
            .get(rule_id)
            .ok_or_else(|| StoreError::not_found(rule_id))?;
        let state = document
            .state
            .get(rule_id)
            .ok_or_else(|| StoreError::not_found(rule_id))?;
        Ok(RuleRecord {
            rule: rule.clone(),
            state: state.clone(),
        })
    }
}

impl RuleBackend for DocumentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn get_rule(&self, rule_id: &str) -> StoreResult<RuleRecord> {
        self.with_document(|document| Self::record_from(document, rule_id))
    }

    fn list_rules(&self, filter: &RuleQuery) -> StoreResult<Vec<RuleRecord>> {
        self.with_document(|document| {
            // BTreeMap iteration is already rule_id ascending.
            let mut records = Vec::new();
            for rule_id in document.rules.keys() {
                let record = Self::record_from(document, rule_id)?;
                if filter.matches(&record) {
                    records.push(record);
                }
            }
            Ok(records)
        })
    }

    fn upsert_rule(&self, rule: &Rule) -> StoreResult<()> {
        self.mutate(|document| {
            document
                .state
                .entry(rule.rule_id.clone())
                .or_insert_with(|| RuleState::initial(rule, Utc::now()));
            document.rules.insert(rule.rule_id.clone(), rule.clone());
            Ok(())
        })
    }

    fn put_record(&self, record: &RuleRecord) -> StoreResult<()> {
        self.mutate(|document| {
            document
                .rules
                .insert(record.rule.rule_id.clone(), record.rule.clone());
            document
                .state
                .insert(record.rule.rule_id.clone(), record.state.clone());
            Ok(())
        })
    }

    fn enable(&self, rule_id: &str) -> StoreResult<RuleState> {
        self.mutate(|document| {
            if !document.rules.contains_key(rule_id) {
                return Err(StoreError::not_found(rule_id));
            }
            let state = document
                .state
                .get_mut(rule_id)
                .ok_or_else(|| StoreError::not_found(rule_id))?;
            let prior = state.clone();
            state.enabled = true;
            state.disabled_reason = None;
            state.disabled_at = None;
            state.updated_at = Utc::now();
            Ok(prior)
        })
    }

    fn disable(&self, rule_id: &str, reason: &str) -> StoreResult<RuleState> {
        self.mutate(|document| {
            if !document.rules.contains_key(rule_id) {
                return Err(StoreError::not_found(rule_id));
            }
            let state = document
                .state
                .get_mut(rule_id)
                .ok_or_else(|| StoreError::not_found(rule_id))?;
            let prior = state.clone();
            let now = Utc::now();
            state.enabled = false;
            state.disabled_reason = Some(reason.to_string());
            state.disabled_at = Some(now);
            state.updated_at = now;
            Ok(prior)
        })
    }

    fn bulk_set(&self, updates: &[StateUpdate]) -> StoreResult<usize> {
        self.mutate(|document| {
            // Validate every id before touching anything.
            for update in updates {
                if !document.state.contains_key(&update.rule_id) {
                    return Err(StoreError::not_found(&update.rule_id));
                }
            }
            let now = Utc::now();
            for update in updates {
                let state = document
                    .state
                    .get_mut(&update.rule_id)
                    .ok_or_else(|| StoreError::not_found(&update.rule_id))?;
                state.enabled = update.enabled;
                state.updated_at = now;
                if update.enabled {
                    state.disabled_reason = None;
                    state.disabled_at = None;
                } else {
                    state.disabled_reason = update.reason.clone();
                    state.disabled_at = Some(now);
                }
            }
            Ok(updates.len())
        })
    }

    fn statistics(&self) -> StoreResult<Statistics> {
        self.with_document(|document| {
            let records: Vec<RuleRecord> = document
                .rules
                .keys()
                .filter_map(|id| Self::record_from(document, id).ok())
                .collect();
            Ok(Statistics::from_records(records.iter()))
        })
    }

    fn record_event(&self, event: &UsageEvent) -> StoreResult<()> {
        let cap = self.usage_event_cap;
        self.mutate(|document| {
            document.usage_events.push(event.clone());
            if document.usage_events.len() > cap {
                let excess = document.usage_events.len() - cap;
                document.usage_events.drain(..excess);
            }
            Ok(())
        })
    }

    fn record_run(&self, run: &RunRecord) -> StoreResult<()> {
        self.mutate(|document| {
            document.run_history.push(run.clone());
            Ok(())
        })
    }

    fn health(&self) -> HealthStatus {
        if !self.path.exists() {
            return HealthStatus::Unhealthy {
                reason: format!("document file missing: {}", self.path.display()),
            };
        }
        match self.parse_file() {
            Ok(document) => {
                if document.rules.len() == document.state.len() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded {
                        reason: format!(
                            "rule/state count drift: {} rules, {} states",
                            document.rules.len(),
                            document.state.len()
                        ),
                    }
                }
            }
            Err(e) => HealthStatus::Unhealthy {
                reason: e.to_string(),
            },
        }
    }

    fn snapshot(&self) -> StoreResult<Snapshot> {
        self.with_document(|document| {
            Ok(Snapshot {
                schema_version: document.schema_version,
                taken_at: Utc::now(),
                backend: BackendKind::Document,
                rules: document.rules.clone(),
                state: document.state.clone(),
                usage_events: document.usage_events.clone(),
                run_history: document.run_history.clone(),
            })
        })
    }

    fn apply_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(StoreError::IncompatibleSchema {
                found: snapshot.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        self.mutate(|document| {
            document.rules = snapshot.rules.clone();
            document.state = snapshot.state.clone();
            document.usage_events = snapshot.usage_events.clone();
            document.run_history = snapshot.run_history.clone();
            Ok(())
        })
    }
}
