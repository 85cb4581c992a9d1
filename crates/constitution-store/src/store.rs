//! The assembled hybrid store: factory routing, sync, scheduler, events.
//!
//! `ConstitutionStore` is the only handle embedders hold. It wires the two
//! backends behind the factory, runs sync and health probes on one
//! background scheduler thread, and records usage events for qualifying
//! operations.

use crate::backend::document::DocumentBackend;
use crate::backend::relational::RelationalBackend;
use crate::backend::{RuleBackend, RuleQuery, Snapshot, Statistics};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::events::{EventBus, EventHandler, StoreEventKind};
use crate::factory::BackendFactory;
use crate::migrate::{self, MigrationReport};
use crate::model::{
    BackendKind, Rule, RuleRecord, RuleState, RunRecord, StateUpdate, UsageEvent, UsageEventKind,
};
use crate::sync::{SyncManager, SyncReport};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SCHEDULER_TICK: Duration = Duration::from_millis(200);

/// Process-wide handle over both backends.
pub struct ConstitutionStore {
    config: StoreConfig,
    factory: Arc<BackendFactory>,
    sync: Option<Arc<SyncManager>>,
    events: Arc<EventBus>,
    migration_log: PathBuf,
    scheduler_stop: Arc<AtomicBool>,
    scheduler: Option<JoinHandle<()>>,
}

impl ConstitutionStore {
    /// Open backends per `config` and start the background scheduler.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let health_timeout = Duration::from_millis(config.health_timeout_ms);

        let mut build = |kind: BackendKind| -> StoreResult<Arc<dyn RuleBackend>> {
            match kind {
                BackendKind::Relational => Ok(Arc::new(RelationalBackend::open(
                    &config.relational_config,
                    config.usage_event_cap,
                    health_timeout,
                )?)),
                BackendKind::Document => Ok(Arc::new(DocumentBackend::open(
                    &config.document_config,
                    config.usage_event_cap,
                )?)),
            }
        };

        let primary = build(config.primary_backend)?;
        let fallback = config.fallback_backend.map(&mut build).transpose()?;
        Self::open_with_backends(config, primary, fallback)
    }

    /// Open with pre-built backends. The seam used by tests to inject
    /// failing backends; production code goes through [`open`].
    ///
    /// [`open`]: ConstitutionStore::open
    pub fn open_with_backends(
        config: StoreConfig,
        primary: Arc<dyn RuleBackend>,
        fallback: Option<Arc<dyn RuleBackend>>,
    ) -> StoreResult<Self> {
        let events = Arc::new(EventBus::new());
        let factory = Arc::new(BackendFactory::open(
            Arc::clone(&primary),
            fallback.clone(),
            config.auto_fallback_enabled,
            Arc::clone(&events),
        )?);

        let sync = match (&fallback, config.sync_enabled) {
            (Some(fallback_backend), true) => Some(Arc::new(SyncManager::new(
                Arc::clone(&primary),
                Arc::clone(fallback_backend),
                config.conflict_resolution_policy,
                config.document_config.path.with_extension("sync.jsonl"),
                Duration::from_millis(config.sync_timeout_ms),
            ))),
            _ => None,
        };

        let migration_log = config
            .document_config
            .path
            .with_extension("migrations.jsonl");

        let scheduler_stop = Arc::new(AtomicBool::new(false));
        let scheduler = Self::spawn_scheduler(
            &config,
            Arc::clone(&factory),
            sync.clone(),
            Arc::clone(&scheduler_stop),
        );

        Ok(ConstitutionStore {
            config,
            factory,
            sync,
            events,
            migration_log,
            scheduler_stop,
            scheduler,
        })
    }

    fn spawn_scheduler(
        config: &StoreConfig,
        factory: Arc<BackendFactory>,
        sync: Option<Arc<SyncManager>>,
        stop: Arc<AtomicBool>,
    ) -> Option<JoinHandle<()>> {
        let sync_interval = (config.sync_interval_seconds > 0 && sync.is_some())
            .then(|| Duration::from_secs(config.sync_interval_seconds));
        let probe_interval = (config.probe_interval_seconds > 0)
            .then(|| Duration::from_secs(config.probe_interval_seconds));
        if sync_interval.is_none() && probe_interval.is_none() {
            return None;
        }
        let auto_recovery = config.auto_recovery_enabled;

        std::thread::Builder::new()
            .name("constitution-scheduler".to_string())
            .spawn(move || {
                let mut last_sync = Instant::now();
                let mut last_probe = Instant::now();
                while !stop.load(Ordering::SeqCst) {
                    std::thread::sleep(SCHEDULER_TICK);

                    if let (Some(interval), Some(sync)) = (sync_interval, sync.as_ref()) {
                        if last_sync.elapsed() >= interval {
                            last_sync = Instant::now();
                            let outcome = sync.reconcile().and_then(SyncReport::into_result);
                            if let Err(e) = outcome {
                                warn!(error = %e, "periodic reconciliation failed");
                            }
                        }
                    }

                    if let Some(interval) = probe_interval {
                        if last_probe.elapsed() >= interval {
                            last_probe = Instant::now();
                            probe_once(&factory, sync.as_deref(), auto_recovery);
                        }
                    }
                }
            })
            .ok()
    }

    /// The event bus for `subscribe`.
    pub fn subscribe(&self, kind: StoreEventKind, handler: EventHandler) {
        self.events.subscribe(kind, handler);
    }

    /// Publish a catalog-reload notification to subscribers.
    ///
    /// Called by the validation core after a successful `reload_catalog`.
    pub fn notify_catalog_reloaded(&self, rule_count: usize, warning_count: usize) {
        self.events
            .publish(&crate::events::StoreEvent::CatalogReloaded {
                rule_count,
                warning_count,
            });
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Which backend operations currently route to.
    pub fn active_backend(&self) -> BackendKind {
        self.factory.active_kind()
    }

    /// True while the store serves from its configured fallback.
    pub fn is_degraded(&self) -> bool {
        !self.factory.is_primary_active()
    }

    pub fn get_rule(&self, rule_id: &str) -> StoreResult<RuleRecord> {
        self.factory.execute(|backend| backend.get_rule(rule_id))
    }

    pub fn list_rules(&self, filter: &RuleQuery) -> StoreResult<Vec<RuleRecord>> {
        self.factory.execute(|backend| backend.list_rules(filter))
    }

    /// Insert or refresh a rule definition, creating default state on first
    /// sight. Used by catalog seeding and reloads.
    pub fn upsert_rule(&self, rule: &Rule) -> StoreResult<()> {
        self.factory.execute(|backend| backend.upsert_rule(rule))?;
        self.after_write(&rule.rule_id);
        Ok(())
    }

    pub fn enable(&self, rule_id: &str) -> StoreResult<RuleState> {
        let prior = self.factory.execute(|backend| backend.enable(rule_id))?;
        self.record_usage(rule_id, UsageEventKind::Enabled, "enable");
        self.after_write(rule_id);
        Ok(prior)
    }

    pub fn disable(&self, rule_id: &str, reason: &str) -> StoreResult<RuleState> {
        let prior = self
            .factory
            .execute(|backend| backend.disable(rule_id, reason))?;
        self.record_usage(rule_id, UsageEventKind::Disabled, reason);
        self.after_write(rule_id);
        Ok(prior)
    }

    pub fn bulk_set(&self, updates: &[StateUpdate]) -> StoreResult<usize> {
        let applied = self.factory.execute(|backend| backend.bulk_set(updates))?;
        for update in updates {
            let kind = if update.enabled {
                UsageEventKind::Enabled
            } else {
                UsageEventKind::Disabled
            };
            self.record_usage(&update.rule_id, kind, "bulk_set");
            self.after_write(&update.rule_id);
        }
        Ok(applied)
    }

    pub fn statistics(&self) -> StoreResult<Statistics> {
        self.factory.execute(|backend| backend.statistics())
    }

    pub fn record_event(&self, event: &UsageEvent) -> StoreResult<()> {
        self.factory.execute(|backend| backend.record_event(event))
    }

    pub fn record_run(&self, run: &RunRecord) -> StoreResult<()> {
        self.factory.execute(|backend| backend.record_run(run))
    }

    /// Snapshot of the active backend.
    pub fn snapshot(&self) -> StoreResult<Snapshot> {
        self.factory.execute(|backend| backend.snapshot())
    }

    /// Force an immediate reconciliation pass.
    pub fn sync_now(&self) -> StoreResult<SyncReport> {
        let sync = self
            .sync
            .as_ref()
            .ok_or_else(|| StoreError::invalid_input("sync is not enabled"))?;
        let report = sync.reconcile()?;
        self.events
            .publish(&crate::events::StoreEvent::SyncCompleted {
                report: report.clone(),
            });
        Ok(report)
    }

    /// Whole-catalog copy between the two held backends.
    pub fn migrate(
        &self,
        source: BackendKind,
        destination: BackendKind,
    ) -> StoreResult<MigrationReport> {
        if source == destination {
            return Err(StoreError::invalid_input(
                "migration source and destination must differ",
            ));
        }
        let source_backend = self
            .factory
            .backend_of_kind(source)
            .ok_or_else(|| StoreError::invalid_input(format!("no {source} backend configured")))?;
        let destination_backend = self.factory.backend_of_kind(destination).ok_or_else(|| {
            StoreError::invalid_input(format!("no {destination} backend configured"))
        })?;

        let report = migrate::migrate(source_backend.as_ref(), destination_backend.as_ref())?;
        self.append_migration_history(&report);
        Ok(report)
    }

    /// Direct backend access for tests and tooling. Not part of the stable
    /// API: routing, failover, and sync bookkeeping are bypassed.
    #[doc(hidden)]
    pub fn raw_backend(&self, kind: BackendKind) -> Option<Arc<dyn RuleBackend>> {
        self.factory.backend_of_kind(kind)
    }

    /// Schedule the on-write push for a mutation that just committed.
    fn after_write(&self, rule_id: &str) {
        if let Some(sync) = &self.sync {
            sync.schedule_push(rule_id, self.factory.is_primary_active());
        }
    }

    /// Usage events are observability, not state: failures only log.
    fn record_usage(&self, rule_id: &str, kind: UsageEventKind, context: &str) {
        let event = UsageEvent::new(rule_id, kind, context);
        if let Err(e) = self.factory.execute(|backend| backend.record_event(&event)) {
            debug!(rule_id, error = %e, "usage event dropped");
        }
    }

    fn append_migration_history(&self, report: &MigrationReport) {
        let Ok(line) = serde_json::to_string(report) else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.migration_log)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            warn!(path = %self.migration_log.display(), error = %e, "migration history append failed");
        }
    }
}

/// One probe cycle: if the primary is healthy again while the fallback is
/// active, switch back only once sync reports convergence.
fn probe_once(factory: &BackendFactory, sync: Option<&SyncManager>, auto_recovery: bool) {
    if factory.is_primary_active() {
        return;
    }
    let primary = factory.primary_backend();
    if !primary.health().is_healthy() || !auto_recovery {
        return;
    }
    match sync {
        Some(sync) => {
            // Reconcile first so the recovered primary is not stale.
            if let Err(e) = sync.reconcile() {
                warn!(error = %e, "recovery reconciliation failed");
                return;
            }
            if sync.is_converged() {
                factory.recover_primary();
            }
        }
        None => factory.recover_primary(),
    }
}

impl Drop for ConstitutionStore {
    fn drop(&mut self) {
        self.scheduler_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ConstitutionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstitutionStore")
            .field("active", &self.active_backend())
            .field("sync", &self.sync.is_some())
            .finish()
    }
}
