//! Event bus for store lifecycle notifications.
//!
//! Embedders subscribe per event kind; handlers run synchronously on the
//! thread that publishes the event and must not block.

use crate::model::BackendKind;
use crate::sync::SyncReport;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Kinds an embedder can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreEventKind {
    BackendSwitched,
    SyncCompleted,
    BackendRecovered,
    CatalogReloaded,
}

/// A store lifecycle event.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    BackendSwitched {
        from: BackendKind,
        to: BackendKind,
        reason: String,
    },
    SyncCompleted {
        report: SyncReport,
    },
    BackendRecovered {
        backend: BackendKind,
    },
    CatalogReloaded {
        rule_count: usize,
        warning_count: usize,
    },
}

impl StoreEvent {
    pub fn kind(&self) -> StoreEventKind {
        match self {
            StoreEvent::BackendSwitched { .. } => StoreEventKind::BackendSwitched,
            StoreEvent::SyncCompleted { .. } => StoreEventKind::SyncCompleted,
            StoreEvent::BackendRecovered { .. } => StoreEventKind::BackendRecovered,
            StoreEvent::CatalogReloaded { .. } => StoreEventKind::CatalogReloaded,
        }
    }
}

/// Callback invoked for each matching published event.
pub type EventHandler = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Per-kind subscriber registry.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<StoreEventKind, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe(&self, kind: StoreEventKind, handler: EventHandler) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.entry(kind).or_default().push(handler);
        }
    }

    pub fn publish(&self, event: &StoreEvent) {
        match event {
            StoreEvent::BackendSwitched { from, to, reason } => {
                info!(%from, %to, reason = %reason, "backend switched");
            }
            StoreEvent::SyncCompleted { report } => {
                info!(
                    copied = report.copied,
                    overwritten = report.overwritten,
                    conflicts = report.conflicts.len(),
                    unchanged = report.unchanged,
                    applied = report.applied,
                    "sync completed"
                );
            }
            StoreEvent::BackendRecovered { backend } => {
                info!(%backend, "backend recovered");
            }
            StoreEvent::CatalogReloaded {
                rule_count,
                warning_count,
            } => {
                info!(rule_count, warning_count, "catalog reloaded");
            }
        }

        let handlers = match self.subscribers.read() {
            Ok(subscribers) => subscribers.get(&event.kind()).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for handler in handlers {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .subscribers
            .read()
            .map(|s| s.values().map(Vec::len).sum::<usize>())
            .unwrap_or(0);
        f.debug_struct("EventBus")
            .field("subscribers", &count)
            .finish()
    }
}
