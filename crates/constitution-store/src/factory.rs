//! Backend factory: health-based routing and one-retry failover.
//!
//! The factory is the sole mediator between callers and backends. Callers
//! never hold a backend handle; every operation routes through the active
//! pointer, and a `BackendUnavailable` from the active side is retried at
//! most once on a healthy alternate.

use crate::backend::RuleBackend;
use crate::error::{StoreError, StoreResult};
use crate::events::{EventBus, StoreEvent};
use crate::model::BackendKind;
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Primary,
    Fallback,
}

/// Routes operations to the active backend and fails over when it reports
/// unavailable.
pub struct BackendFactory {
    primary: Arc<dyn RuleBackend>,
    fallback: Option<Arc<dyn RuleBackend>>,
    active: RwLock<Slot>,
    auto_fallback: bool,
    events: Arc<EventBus>,
}

impl BackendFactory {
    /// Open the factory: health-check the primary and pick the initial
    /// active backend.
    ///
    /// If the primary is unhealthy and auto-fallback is enabled, the
    /// fallback is activated and a `BackendSwitched` event is emitted. If
    /// neither backend can serve, the open fails.
    pub fn open(
        primary: Arc<dyn RuleBackend>,
        fallback: Option<Arc<dyn RuleBackend>>,
        auto_fallback: bool,
        events: Arc<EventBus>,
    ) -> StoreResult<Self> {
        let primary_health = primary.health();
        let active = if primary_health.is_serving() {
            Slot::Primary
        } else if auto_fallback {
            match &fallback {
                Some(fallback_backend) if fallback_backend.health().is_serving() => {
                    events.publish(&StoreEvent::BackendSwitched {
                        from: primary.kind(),
                        to: fallback_backend.kind(),
                        reason: format!("primary unhealthy at open: {primary_health:?}"),
                    });
                    Slot::Fallback
                }
                _ => {
                    return Err(StoreError::unavailable(format!(
                        "primary backend unhealthy and no serving fallback: {primary_health:?}"
                    )));
                }
            }
        } else {
            return Err(StoreError::unavailable(format!(
                "primary backend unhealthy: {primary_health:?}"
            )));
        };

        Ok(BackendFactory {
            primary,
            fallback,
            active: RwLock::new(active),
            auto_fallback,
            events,
        })
    }

    /// The kind currently receiving operations.
    pub fn active_kind(&self) -> BackendKind {
        self.backend_for(self.active_slot()).kind()
    }

    /// True while operations route to the configured primary.
    pub fn is_primary_active(&self) -> bool {
        self.active_slot() == Slot::Primary
    }

    /// The backend currently receiving operations.
    pub fn active_backend(&self) -> Arc<dyn RuleBackend> {
        Arc::clone(self.backend_for(self.active_slot()))
    }

    /// The backend not currently receiving operations, if one exists.
    pub fn inactive_backend(&self) -> Option<Arc<dyn RuleBackend>> {
        match self.active_slot() {
            Slot::Primary => self.fallback.clone(),
            Slot::Fallback => Some(Arc::clone(&self.primary)),
        }
    }

    /// The configured primary, regardless of which side is active.
    pub fn primary_backend(&self) -> Arc<dyn RuleBackend> {
        Arc::clone(&self.primary)
    }

    /// Look up a held backend by kind (for sync and migration wiring).
    pub fn backend_of_kind(&self, kind: BackendKind) -> Option<Arc<dyn RuleBackend>> {
        if self.primary.kind() == kind {
            return Some(Arc::clone(&self.primary));
        }
        self.fallback
            .as_ref()
            .filter(|b| b.kind() == kind)
            .map(Arc::clone)
    }

    /// Execute `op` against the active backend, failing over at most once.
    pub fn execute<T>(
        &self,
        op: impl Fn(&dyn RuleBackend) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let active_slot = self.active_slot();
        let active = Arc::clone(self.backend_for(active_slot));
        match op(active.as_ref()) {
            Ok(value) => Ok(value),
            Err(error) if error.is_retryable() && self.auto_fallback => {
                let alternate_slot = match active_slot {
                    Slot::Primary => Slot::Fallback,
                    Slot::Fallback => Slot::Primary,
                };
                let alternate = match alternate_slot {
                    Slot::Primary => Some(Arc::clone(&self.primary)),
                    Slot::Fallback => self.fallback.clone(),
                };
                let Some(alternate) = alternate else {
                    return Err(error);
                };
                if !alternate.health().is_serving() {
                    return Err(error);
                }
                warn!(
                    active = %active.kind(),
                    alternate = %alternate.kind(),
                    error = %error,
                    "active backend unavailable, retrying on alternate"
                );
                self.switch_slot(alternate_slot, &error.to_string());
                op(alternate.as_ref())
            }
            Err(error) => Err(error),
        }
    }

    /// Switch back to the primary after it has recovered.
    ///
    /// Called by the scheduler once the sync manager reports convergence, so
    /// the recovered primary does not serve stale data.
    pub fn recover_primary(&self) {
        let mut active = match self.active.write() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *active == Slot::Fallback {
            *active = Slot::Primary;
            drop(active);
            self.events.publish(&StoreEvent::BackendRecovered {
                backend: self.primary.kind(),
            });
        }
    }

    fn active_slot(&self) -> Slot {
        match self.active.read() {
            Ok(active) => *active,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn backend_for(&self, slot: Slot) -> &Arc<dyn RuleBackend> {
        match slot {
            Slot::Primary => &self.primary,
            Slot::Fallback => self.fallback.as_ref().unwrap_or(&self.primary),
        }
    }

    /// Move the active pointer, emitting `BackendSwitched` only on an actual
    /// change so a contiguous unhealthy period produces exactly one event.
    fn switch_slot(&self, target: Slot, reason: &str) {
        let mut active = match self.active.write() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *active != target {
            let from = self.backend_for(*active).kind();
            let to = self.backend_for(target).kind();
            *active = target;
            drop(active);
            self.events.publish(&StoreEvent::BackendSwitched {
                from,
                to,
                reason: reason.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory")
            .field("primary", &self.primary.kind())
            .field("fallback", &self.fallback.as_ref().map(|b| b.kind()))
            .field("active", &self.active_kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StoreEventKind;
    use crate::testutil::{FlakyBackend, document_backend, sample_rule};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_healthy_primary_is_active() {
        let dir = TempDir::new().unwrap();
        let primary = document_backend(&dir, "a.json");
        let fallback = document_backend(&dir, "b.json");
        let factory =
            BackendFactory::open(primary, Some(fallback), true, Arc::new(EventBus::new()))
                .unwrap();
        assert!(factory.is_primary_active());
    }

    #[test]
    fn test_operation_fails_over_once_and_switches() {
        let dir = TempDir::new().unwrap();
        let primary = Arc::new(FlakyBackend::new(document_backend(&dir, "a.json")));
        let fallback = document_backend(&dir, "b.json");
        fallback.upsert_rule(&sample_rule("R-001")).unwrap();

        let events = Arc::new(EventBus::new());
        let switches = Arc::new(AtomicUsize::new(0));
        {
            let switches = Arc::clone(&switches);
            events.subscribe(
                StoreEventKind::BackendSwitched,
                Arc::new(move |_| {
                    switches.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let factory = BackendFactory::open(
            Arc::clone(&primary) as Arc<dyn RuleBackend>,
            Some(fallback),
            true,
            events,
        )
        .unwrap();

        primary.fail.store(true, Ordering::SeqCst);

        // Several operations during one contiguous unhealthy period.
        for _ in 0..3 {
            let record = factory.execute(|b| b.get_rule("R-001")).unwrap();
            assert_eq!(record.rule.rule_id, "R-001");
        }
        assert!(!factory.is_primary_active());
        assert_eq!(
            switches.load(Ordering::SeqCst),
            1,
            "exactly one switch per contiguous unhealthy period"
        );
    }

    #[test]
    fn test_no_failover_when_disabled() {
        let dir = TempDir::new().unwrap();
        let primary = Arc::new(FlakyBackend::new(document_backend(&dir, "a.json")));
        let fallback = document_backend(&dir, "b.json");
        let factory = BackendFactory::open(
            Arc::clone(&primary) as Arc<dyn RuleBackend>,
            Some(fallback),
            false,
            Arc::new(EventBus::new()),
        )
        .unwrap();

        primary.fail.store(true, Ordering::SeqCst);
        let err = factory.execute(|b| b.get_rule("R-001")).unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable { .. }));
        assert!(factory.is_primary_active());
    }

    #[test]
    fn test_both_backends_down_surfaces_error() {
        let dir = TempDir::new().unwrap();
        let primary = Arc::new(FlakyBackend::new(document_backend(&dir, "a.json")));
        let fallback = Arc::new(FlakyBackend::new(document_backend(&dir, "b.json")));
        let factory = BackendFactory::open(
            Arc::clone(&primary) as Arc<dyn RuleBackend>,
            Some(Arc::clone(&fallback) as Arc<dyn RuleBackend>),
            true,
            Arc::new(EventBus::new()),
        )
        .unwrap();

        primary.fail.store(true, Ordering::SeqCst);
        fallback.fail.store(true, Ordering::SeqCst);
        fallback.fail_health.store(true, Ordering::SeqCst);

        let err = factory.execute(|b| b.get_rule("R-001")).unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable { .. }));
    }

    #[test]
    fn test_unhealthy_primary_at_open_activates_fallback() {
        let dir = TempDir::new().unwrap();
        let primary = Arc::new(FlakyBackend::new(document_backend(&dir, "a.json")));
        primary.fail_health.store(true, Ordering::SeqCst);
        let fallback = document_backend(&dir, "b.json");

        let events = Arc::new(EventBus::new());
        let switches = Arc::new(AtomicUsize::new(0));
        {
            let switches = Arc::clone(&switches);
            events.subscribe(
                StoreEventKind::BackendSwitched,
                Arc::new(move |_| {
                    switches.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        let factory = BackendFactory::open(
            Arc::clone(&primary) as Arc<dyn RuleBackend>,
            Some(fallback),
            true,
            events,
        )
        .unwrap();
        assert!(!factory.is_primary_active());
        assert_eq!(switches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recover_primary_emits_event_once() {
        let dir = TempDir::new().unwrap();
        let primary = Arc::new(FlakyBackend::new(document_backend(&dir, "a.json")));
        let fallback = document_backend(&dir, "b.json");
        let events = Arc::new(EventBus::new());
        let recovered = Arc::new(AtomicUsize::new(0));
        {
            let recovered = Arc::clone(&recovered);
            events.subscribe(
                StoreEventKind::BackendRecovered,
                Arc::new(move |_| {
                    recovered.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        let factory = BackendFactory::open(
            Arc::clone(&primary) as Arc<dyn RuleBackend>,
            Some(fallback),
            true,
            events,
        )
        .unwrap();

        primary.fail.store(true, Ordering::SeqCst);
        let _ = factory.execute(|b| b.statistics());
        assert!(!factory.is_primary_active());

        primary.fail.store(false, Ordering::SeqCst);
        factory.recover_primary();
        factory.recover_primary(); // idempotent
        assert!(factory.is_primary_active());
        assert_eq!(recovered.load(Ordering::SeqCst), 1);
    }
}
