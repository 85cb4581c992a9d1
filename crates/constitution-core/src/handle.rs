//! The embedder-facing core handle.
//!
//! `CoreHandle` is the single entry point: it owns the store, the catalog,
//! the validator registry, and the AST cache, and threads them through
//! every operation. There is no process-global state.

use crate::cache::{AstCache, DEFAULT_CACHE_BUDGET};
use crate::catalog::{self, Catalog, LoadWarning};
use crate::dispatch::{self, ValidateOptions};
use crate::error::CoreResult;
use crate::finding::{Finding, ValidationRun};
use crate::registry::RuleRegistry;
use crate::{aggregate, source};
use chrono::Utc;
use constitution_store::{
    BackendKind, ConstitutionStore, EventHandler, MigrationReport, Rule, RuleQuery, RuleRecord,
    RuleState, RunRecord, StateUpdate, Statistics, StoreConfig, StoreError, StoreEventKind,
    SyncReport, UsageEvent, UsageEventKind,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

/// Configuration for [`CoreHandle::open`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Directory holding the rule source documents.
    pub rules_dir: PathBuf,
    /// Store configuration (backends, sync, failover).
    pub store: StoreConfig,
    /// Byte budget for the AST cache.
    pub ast_cache_bytes: usize,
}

impl CoreConfig {
    pub fn new(rules_dir: impl Into<PathBuf>, store: StoreConfig) -> Self {
        CoreConfig {
            rules_dir: rules_dir.into(),
            store,
            ast_cache_bytes: DEFAULT_CACHE_BUDGET,
        }
    }
}

/// Process-wide handle over the rule store and validation engine.
pub struct CoreHandle {
    store: ConstitutionStore,
    registry: RuleRegistry,
    cache: AstCache,
    catalog: RwLock<Catalog>,
    rules_dir: PathBuf,
}

impl CoreHandle {
    /// Load the catalog, open the store, and seed any missing rules.
    pub fn open(config: CoreConfig) -> CoreResult<Self> {
        let catalog = catalog::load(&config.rules_dir)?;
        info!(
            rules = catalog.len(),
            warnings = catalog.warnings().len(),
            dir = %config.rules_dir.display(),
            "catalog loaded"
        );

        let store = ConstitutionStore::open(config.store)?;
        let handle = CoreHandle {
            store,
            registry: RuleRegistry::with_defaults(),
            cache: AstCache::new(config.ast_cache_bytes),
            catalog: RwLock::new(catalog),
            rules_dir: config.rules_dir,
        };
        handle.seed_catalog()?;
        Ok(handle)
    }

    /// Re-read the rule documents. On any load error the previous catalog
    /// remains in effect and the error is returned.
    pub fn reload_catalog(&self) -> CoreResult<Vec<LoadWarning>> {
        let fresh = catalog::load(&self.rules_dir)?;
        let warnings = fresh.warnings().to_vec();
        let rule_count = fresh.len();
        {
            let mut guard = match self.catalog.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = fresh;
        }
        self.seed_catalog()?;
        self.store
            .notify_catalog_reloaded(rule_count, warnings.len());
        Ok(warnings)
    }

    /// Push catalog rules the active backend does not yet store (or stores
    /// with a stale definition). RuleState overlays are never touched: the
    /// catalog owns definitions, the backends own state.
    fn seed_catalog(&self) -> CoreResult<()> {
        let rules: Vec<Rule> = self.catalog_guard().iter().cloned().collect();
        let mut seeded = 0usize;
        for rule in rules {
            let needs_write = match self.store.get_rule(&rule.rule_id) {
                Ok(record) => record.rule != rule,
                Err(StoreError::NotFound { .. }) => true,
                Err(e) => return Err(e.into()),
            };
            if needs_write {
                self.store.upsert_rule(&rule)?;
                seeded += 1;
            }
        }
        if seeded > 0 {
            debug!(seeded, "catalog rules seeded into active backend");
        }
        Ok(())
    }

    /// Number of rules in the loaded catalog.
    pub fn catalog_len(&self) -> usize {
        self.catalog_guard().len()
    }

    /// A catalog rule definition by id.
    pub fn catalog_rule(&self, rule_id: &str) -> Option<Rule> {
        self.catalog_guard().get(rule_id).cloned()
    }

    /// Warnings from the most recent catalog load.
    pub fn catalog_warnings(&self) -> Vec<LoadWarning> {
        self.catalog_guard().warnings().to_vec()
    }

    // ---- store pass-throughs ----

    pub fn get_rule(&self, rule_id: &str) -> CoreResult<RuleRecord> {
        Ok(self.store.get_rule(rule_id)?)
    }

    pub fn list_rules(&self, filter: &RuleQuery) -> CoreResult<Vec<RuleRecord>> {
        Ok(self.store.list_rules(filter)?)
    }

    pub fn enable(&self, rule_id: &str) -> CoreResult<RuleState> {
        Ok(self.store.enable(rule_id)?)
    }

    pub fn disable(&self, rule_id: &str, reason: &str) -> CoreResult<RuleState> {
        Ok(self.store.disable(rule_id, reason)?)
    }

    pub fn bulk_set(&self, updates: &[StateUpdate]) -> CoreResult<usize> {
        Ok(self.store.bulk_set(updates)?)
    }

    pub fn statistics(&self) -> CoreResult<Statistics> {
        Ok(self.store.statistics()?)
    }

    pub fn sync_now(&self) -> CoreResult<SyncReport> {
        Ok(self.store.sync_now()?)
    }

    pub fn migrate(
        &self,
        source: BackendKind,
        destination: BackendKind,
    ) -> CoreResult<MigrationReport> {
        Ok(self.store.migrate(source, destination)?)
    }

    pub fn subscribe(&self, kind: StoreEventKind, handler: EventHandler) {
        self.store.subscribe(kind, handler);
    }

    // ---- validation ----

    /// Validate `paths` (files or directories) against the enabled rules.
    pub fn validate(&self, paths: &[PathBuf], options: &ValidateOptions) -> CoreResult<ValidationRun> {
        self.validate_with_sink(paths, options, |_| {})
    }

    /// Like [`validate`], invoking `sink` once per emitted finding in
    /// canonical order.
    ///
    /// [`validate`]: CoreHandle::validate
    pub fn validate_with_sink(
        &self,
        paths: &[PathBuf],
        options: &ValidateOptions,
        sink: impl Fn(&Finding) + Sync,
    ) -> CoreResult<ValidationRun> {
        let started_at = Utc::now();
        let backend_used = self.store.active_backend();
        let degraded = self.store.is_degraded();

        // Enabled set: rules enabled in the store that the catalog knows.
        let catalog = self.catalog_guard();
        let enabled: HashSet<String> = self
            .store
            .list_rules(&RuleQuery::all().enabled(true))?
            .into_iter()
            .map(|record| record.rule.rule_id)
            .filter(|id| catalog.contains(id))
            .collect();

        let files = dispatch::expand_paths(paths);
        let per_file = dispatch::run_validation(
            &files,
            &catalog,
            &self.registry,
            &enabled,
            &self.cache,
            options,
        )?;
        drop(catalog);

        let sink_ref: &(dyn Fn(&Finding) + Sync) = &sink;
        let run = aggregate::aggregate(
            per_file,
            options.severity_threshold,
            backend_used,
            degraded,
            started_at,
            files.len(),
            Some(sink_ref),
        );

        self.record_run_outcome(&run);
        Ok(run)
    }

    /// Persist run history and triggered-rule usage events, best effort.
    fn record_run_outcome(&self, run: &ValidationRun) {
        for (rule_id, count) in &run.by_rule {
            if rule_id.starts_with("core::") {
                continue;
            }
            let event = UsageEvent::new(
                rule_id.clone(),
                UsageEventKind::Triggered,
                format!("{count} finding(s) in {} file(s)", run.file_count),
            );
            if let Err(e) = self.store.record_event(&event) {
                debug!(rule_id = %rule_id, error = %e, "usage event dropped");
                break;
            }
        }

        let record = RunRecord {
            started_at: run.started_at,
            completed_at: run.completed_at,
            file_count: run.file_count,
            finding_count: run.finding_count,
            backend_used: run.backend_used,
            degraded: run.degraded,
        };
        if let Err(e) = self.store.record_run(&record) {
            warn!(error = %e, "run history entry dropped");
        }
    }

    /// Validators registered, for introspection.
    pub fn validator_count(&self) -> usize {
        self.registry.len()
    }

    /// Source kinds the engine analyzes.
    pub fn analyzable_kinds(&self) -> &'static [source::SourceKind] {
        &source::SourceKind::ANALYZABLE
    }

    /// Direct store access for tests and embedder tooling.
    #[doc(hidden)]
    pub fn store(&self) -> &ConstitutionStore {
        &self.store
    }

    fn catalog_guard(&self) -> RwLockReadGuard<'_, Catalog> {
        match self.catalog.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for CoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreHandle")
            .field("rules", &self.catalog_len())
            .field("validators", &self.registry.len())
            .field("active_backend", &self.store.active_backend())
            .finish()
    }
}
