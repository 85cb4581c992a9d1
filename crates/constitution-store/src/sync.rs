//! Bidirectional synchronization between the two backends.
//!
//! Three triggers feed the same machinery: on-write pushes (queued, applied
//! by a dedicated pusher thread in write order), periodic reconciliation
//! (driven by the store scheduler), and `sync_now`. Reconciliation applies
//! one record at a time so queued pushes interleave and mutation latency
//! stays bounded.

use crate::backend::RuleBackend;
use crate::canon::canonical_record;
use crate::config::ConflictPolicy;
use crate::error::{StoreError, StoreResult};
use crate::model::{BackendKind, RuleRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A rule that differed between backends during a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub rule_id: String,
    pub primary_updated: DateTime<Utc>,
    pub secondary_updated: DateTime<Utc>,
    /// Which side won, or `None` under fail-on-conflict.
    pub winner: Option<BackendKind>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub policy: ConflictPolicy,
    /// Records present on one side only and copied to the other.
    pub copied: usize,
    /// Conflicting records overwritten per the policy.
    pub overwritten: usize,
    pub unchanged: usize,
    pub conflicts: Vec<SyncConflict>,
    /// False when fail-on-conflict aborted the pass.
    pub applied: bool,
    pub error: Option<String>,
}

impl SyncReport {
    /// The pass as a result: a fail-on-conflict abort surfaces as
    /// `ConflictUnresolvable`. `sync_now` hands the report to the caller
    /// as-is; the periodic scheduler goes through this.
    pub fn into_result(self) -> StoreResult<SyncReport> {
        if !self.applied && !self.conflicts.is_empty() {
            return Err(StoreError::ConflictUnresolvable {
                rule_ids: self.conflicts.iter().map(|c| c.rule_id.clone()).collect(),
            });
        }
        Ok(self)
    }
}

#[derive(Debug, Serialize)]
struct HistoryEntry<'a> {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    copied: usize,
    overwritten: usize,
    conflicts: usize,
    unchanged: usize,
    policy: ConflictPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

struct PushJob {
    rule_id: String,
    from_primary: bool,
}

/// Keeps the two backends convergent under the configured conflict policy.
///
/// The manager holds only `RuleBackend` handles and never consults the
/// factory's routing state, so sync and routing cannot deadlock each other.
pub struct SyncManager {
    primary: Arc<dyn RuleBackend>,
    secondary: Arc<dyn RuleBackend>,
    policy: ConflictPolicy,
    history_path: PathBuf,
    history_lock: Mutex<()>,
    pass_lock: Mutex<()>,
    deadline: Duration,
    converged: Arc<AtomicBool>,
    cancel: AtomicBool,
    push_tx: Mutex<Option<Sender<PushJob>>>,
    pusher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncManager {
    pub fn new(
        primary: Arc<dyn RuleBackend>,
        secondary: Arc<dyn RuleBackend>,
        policy: ConflictPolicy,
        history_path: PathBuf,
        deadline: Duration,
    ) -> Self {
        let (push_tx, push_rx) = channel::<PushJob>();
        let converged = Arc::new(AtomicBool::new(false));

        let pusher = {
            let primary = Arc::clone(&primary);
            let secondary = Arc::clone(&secondary);
            std::thread::Builder::new()
                .name("constitution-sync-push".to_string())
                .spawn(move || {
                    // Single consumer: pushes apply in the order the
                    // originating writes committed.
                    while let Ok(job) = push_rx.recv() {
                        let (source, dest) = if job.from_primary {
                            (&primary, &secondary)
                        } else {
                            (&secondary, &primary)
                        };
                        match source.get_rule(&job.rule_id) {
                            Ok(record) => {
                                if let Err(e) = dest.put_record(&record) {
                                    // The source is never modified on a push
                                    // failure; the next periodic pass retries.
                                    warn!(
                                        rule_id = %job.rule_id,
                                        error = %e,
                                        "on-write push failed, deferring to reconciliation"
                                    );
                                }
                            }
                            Err(e) => {
                                debug!(rule_id = %job.rule_id, error = %e, "push skipped");
                            }
                        }
                    }
                })
                .ok()
        };

        SyncManager {
            primary,
            secondary,
            policy,
            history_path,
            history_lock: Mutex::new(()),
            pass_lock: Mutex::new(()),
            deadline,
            converged,
            cancel: AtomicBool::new(false),
            push_tx: Mutex::new(Some(push_tx)),
            pusher: Mutex::new(pusher),
        }
    }

    /// Request cancellation of the in-flight reconciliation pass.
    ///
    /// Copies already applied stay applied; the pass stops between rules
    /// and reports `Cancelled`.
    pub fn cancel_pass(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// True after a reconciliation pass finished with nothing left to do.
    pub fn is_converged(&self) -> bool {
        self.converged.load(Ordering::SeqCst)
    }

    /// Queue a one-way push of `rule_id` from the side that just committed
    /// a write. Returns immediately; the caller's write has already
    /// succeeded.
    pub fn schedule_push(&self, rule_id: &str, from_primary: bool) {
        self.converged.store(false, Ordering::SeqCst);
        if let Ok(tx) = self.push_tx.lock() {
            if let Some(tx) = tx.as_ref() {
                let _ = tx.send(PushJob {
                    rule_id: rule_id.to_string(),
                    from_primary,
                });
            }
        }
    }

    /// Run one bidirectional reconciliation pass.
    ///
    /// Only one pass runs at a time. Snapshots of the two backends are taken
    /// sequentially; a mutation racing between them is resolved by the
    /// conflict policy on the next pass.
    pub fn reconcile(&self) -> StoreResult<SyncReport> {
        let _pass = self
            .pass_lock
            .lock()
            .map_err(|_| StoreError::unavailable("reconciliation lock poisoned"))?;

        let started_at = Utc::now();
        let clock = Instant::now();

        let primary_snapshot = self.primary.snapshot()?;
        let secondary_snapshot = self.secondary.snapshot()?;

        let mut report = SyncReport {
            started_at,
            finished_at: started_at,
            policy: self.policy,
            copied: 0,
            overwritten: 0,
            unchanged: 0,
            conflicts: Vec::new(),
            applied: true,
            error: None,
        };

        let ids: BTreeSet<&String> = primary_snapshot
            .rules
            .keys()
            .chain(secondary_snapshot.rules.keys())
            .collect();

        // Planned copies: (record, destination backend, is_overwrite).
        let mut plan: Vec<(RuleRecord, &Arc<dyn RuleBackend>, bool)> = Vec::new();

        for id in ids {
            let interrupted = if self.cancel.swap(false, Ordering::SeqCst) {
                Some(StoreError::Cancelled)
            } else if clock.elapsed() > self.deadline {
                Some(StoreError::Timeout {
                    elapsed_ms: clock.elapsed().as_millis() as u64,
                })
            } else {
                None
            };
            if let Some(err) = interrupted {
                report.finished_at = Utc::now();
                report.applied = false;
                report.error = Some(err.to_string());
                self.append_history(&report);
                return Err(err);
            }

            let in_primary = record_of(&primary_snapshot, id);
            let in_secondary = record_of(&secondary_snapshot, id);
            match (in_primary, in_secondary) {
                (Some(record), None) => plan.push((record, &self.secondary, false)),
                (None, Some(record)) => plan.push((record, &self.primary, false)),
                (Some(primary_record), Some(secondary_record)) => {
                    let same = canonical_record(&primary_record)? == canonical_record(&secondary_record)?;
                    if same {
                        report.unchanged += 1;
                        continue;
                    }
                    let conflict = SyncConflict {
                        rule_id: id.clone(),
                        primary_updated: primary_record.newest_timestamp(),
                        secondary_updated: secondary_record.newest_timestamp(),
                        winner: None,
                    };
                    match self.policy {
                        ConflictPolicy::PrimaryWins => {
                            report.conflicts.push(SyncConflict {
                                winner: Some(self.primary.kind()),
                                ..conflict
                            });
                            plan.push((primary_record, &self.secondary, true));
                        }
                        ConflictPolicy::NewestTimestampWins => {
                            // Ties resolve to the primary.
                            if secondary_record.newest_timestamp()
                                > primary_record.newest_timestamp()
                            {
                                report.conflicts.push(SyncConflict {
                                    winner: Some(self.secondary.kind()),
                                    ..conflict
                                });
                                plan.push((secondary_record, &self.primary, true));
                            } else {
                                report.conflicts.push(SyncConflict {
                                    winner: Some(self.primary.kind()),
                                    ..conflict
                                });
                                plan.push((primary_record, &self.secondary, true));
                            }
                        }
                        ConflictPolicy::FailOnConflict => {
                            report.conflicts.push(conflict);
                        }
                    }
                }
                (None, None) => {}
            }
        }

        if self.policy == ConflictPolicy::FailOnConflict && !report.conflicts.is_empty() {
            // Record and abort: nothing is applied.
            report.applied = false;
            report.finished_at = Utc::now();
            self.append_history(&report);
            return Ok(report);
        }

        let mut push_errors = Vec::new();
        for (record, dest, overwrite) in plan {
            // Cancellation lands between records: applied copies stay.
            if self.cancel.swap(false, Ordering::SeqCst) {
                report.finished_at = Utc::now();
                report.applied = false;
                report.error = Some(StoreError::Cancelled.to_string());
                self.append_history(&report);
                return Err(StoreError::Cancelled);
            }
            match dest.put_record(&record) {
                Ok(()) => {
                    if overwrite {
                        report.overwritten += 1;
                    } else {
                        report.copied += 1;
                    }
                }
                Err(e) => {
                    // Recorded and retried on the next pass; the source side
                    // is left untouched.
                    warn!(rule_id = %record.rule.rule_id, error = %e, "reconciliation copy failed");
                    push_errors.push(format!("{}: {e}", record.rule.rule_id));
                }
            }
        }

        report.finished_at = Utc::now();
        if push_errors.is_empty() {
            self.converged.store(true, Ordering::SeqCst);
        } else {
            report.error = Some(push_errors.join("; "));
            self.converged.store(false, Ordering::SeqCst);
        }
        self.append_history(&report);
        Ok(report)
    }

    /// Append one JSON line to the sync history log.
    ///
    /// The log is append-only and owned by this manager; writers serialize
    /// through `history_lock`.
    fn append_history(&self, report: &SyncReport) {
        let entry = HistoryEntry {
            started_at: report.started_at,
            finished_at: report.finished_at,
            copied: report.copied,
            overwritten: report.overwritten,
            conflicts: report.conflicts.len(),
            unchanged: report.unchanged,
            policy: report.policy,
            error: report.error.as_deref(),
        };
        let Ok(line) = serde_json::to_string(&entry) else {
            return;
        };
        let _guard = self.history_lock.lock();
        if let Some(parent) = self.history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history_path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            warn!(path = %self.history_path.display(), error = %e, "sync history append failed");
        }
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        // Closing the channel stops the pusher; join it so queued pushes
        // finish before the backends are torn down.
        if let Ok(mut tx) = self.push_tx.lock() {
            tx.take();
        }
        if let Ok(mut pusher) = self.pusher.lock() {
            if let Some(handle) = pusher.take() {
                let _ = handle.join();
            }
        }
    }
}

fn record_of(snapshot: &crate::backend::Snapshot, rule_id: &str) -> Option<RuleRecord> {
    let rule = snapshot.rules.get(rule_id)?;
    let state = snapshot.state.get(rule_id)?;
    Some(RuleRecord {
        rule: rule.clone(),
        state: state.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RuleQuery;
    use crate::testutil::{document_backend, sample_rule};
    use tempfile::TempDir;

    fn manager(
        dir: &TempDir,
        primary: Arc<dyn RuleBackend>,
        secondary: Arc<dyn RuleBackend>,
        policy: ConflictPolicy,
    ) -> SyncManager {
        SyncManager::new(
            primary,
            secondary,
            policy,
            dir.path().join("sync_history.jsonl"),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_one_sided_rules_are_copied_both_ways() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("ONLY-A")).unwrap();
        b.upsert_rule(&sample_rule("ONLY-B")).unwrap();

        let sync = manager(&dir, Arc::clone(&a), Arc::clone(&b), ConflictPolicy::PrimaryWins);
        let report = sync.reconcile().unwrap();

        assert_eq!(report.copied, 2);
        assert_eq!(report.overwritten, 0);
        assert!(report.applied);
        assert!(a.get_rule("ONLY-B").is_ok());
        assert!(b.get_rule("ONLY-A").is_ok());
        assert!(sync.is_converged());
    }

    #[test]
    fn test_identical_records_are_unchanged() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        let rule = sample_rule("SAME-1");
        a.upsert_rule(&rule).unwrap();
        let record = a.get_rule("SAME-1").unwrap();
        b.put_record(&record).unwrap();

        let sync = manager(&dir, a, b, ConflictPolicy::PrimaryWins);
        let report = sync.reconcile().unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.copied, 0);
        assert_eq!(report.overwritten, 0);
    }

    #[test]
    fn test_primary_wins_overwrites_secondary() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("R-100")).unwrap();
        b.put_record(&a.get_rule("R-100").unwrap()).unwrap();

        // Diverge: disable on secondary only.
        b.disable("R-100", "secondary opinion").unwrap();

        let sync = manager(&dir, Arc::clone(&a), Arc::clone(&b), ConflictPolicy::PrimaryWins);
        let report = sync.reconcile().unwrap();

        assert_eq!(report.overwritten, 1);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].winner, Some(a.kind()));
        assert!(b.get_rule("R-100").unwrap().state.enabled);
    }

    #[test]
    fn test_newest_timestamp_wins_prefers_later_mutation() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("R-100")).unwrap();
        b.put_record(&a.get_rule("R-100").unwrap()).unwrap();

        // Older mutation on primary, newer on secondary.
        a.disable("R-100", "first").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        b.disable("R-100", "second").unwrap();

        let sync = manager(
            &dir,
            Arc::clone(&a),
            Arc::clone(&b),
            ConflictPolicy::NewestTimestampWins,
        );
        let report = sync.reconcile().unwrap();

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].winner, Some(b.kind()));
        let on_a = a.get_rule("R-100").unwrap();
        assert_eq!(on_a.state.disabled_reason.as_deref(), Some("second"));
    }

    #[test]
    fn test_fail_on_conflict_applies_nothing() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("R-100")).unwrap();
        b.put_record(&a.get_rule("R-100").unwrap()).unwrap();
        a.upsert_rule(&sample_rule("ONLY-A")).unwrap();
        b.disable("R-100", "divergent").unwrap();

        let sync = manager(
            &dir,
            Arc::clone(&a),
            Arc::clone(&b),
            ConflictPolicy::FailOnConflict,
        );
        let report = sync.reconcile().unwrap();

        assert!(!report.applied);
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.conflicts[0].winner.is_none());
        // Even the uncontested one-sided copy is withheld.
        assert!(b.get_rule("ONLY-A").is_err());
        assert!(!sync.is_converged());
    }

    #[test]
    fn test_schedule_push_copies_to_other_side() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("PUSH-1")).unwrap();

        let sync = manager(&dir, Arc::clone(&a), Arc::clone(&b), ConflictPolicy::PrimaryWins);
        sync.schedule_push("PUSH-1", true);

        // The pusher is asynchronous; poll briefly.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if b.get_rule("PUSH-1").is_ok() {
                break;
            }
            assert!(Instant::now() < deadline, "push did not arrive in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_push_order_matches_write_order() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("SEQ-1")).unwrap();

        let sync = manager(&dir, Arc::clone(&a), Arc::clone(&b), ConflictPolicy::PrimaryWins);
        a.disable("SEQ-1", "step-1").unwrap();
        sync.schedule_push("SEQ-1", true);
        a.enable("SEQ-1").unwrap();
        sync.schedule_push("SEQ-1", true);
        drop(sync); // joins the pusher, draining the queue in order

        let record = b.get_rule("SEQ-1").unwrap();
        assert!(record.state.enabled, "later write must land last");
    }

    #[test]
    fn test_fail_on_conflict_report_converts_to_error() {
        let report = SyncReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            policy: ConflictPolicy::FailOnConflict,
            copied: 0,
            overwritten: 0,
            unchanged: 0,
            conflicts: vec![SyncConflict {
                rule_id: "R-9".to_string(),
                primary_updated: Utc::now(),
                secondary_updated: Utc::now(),
                winner: None,
            }],
            applied: false,
            error: None,
        };
        let err = report.into_result().unwrap_err();
        let StoreError::ConflictUnresolvable { rule_ids } = err else {
            panic!("expected ConflictUnresolvable");
        };
        assert_eq!(rule_ids, vec!["R-9".to_string()]);
    }

    #[test]
    fn test_applied_report_passes_through_into_result() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("OK-1")).unwrap();

        let sync = manager(&dir, a, b, ConflictPolicy::PrimaryWins);
        let report = sync.reconcile().unwrap().into_result().unwrap();
        assert!(report.applied);
    }

    #[test]
    fn test_cancelled_pass_aborts_and_next_pass_runs() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("C-1")).unwrap();

        let sync = manager(&dir, Arc::clone(&a), Arc::clone(&b), ConflictPolicy::PrimaryWins);
        sync.cancel_pass();
        assert!(matches!(sync.reconcile(), Err(StoreError::Cancelled)));
        assert!(!sync.is_converged());

        // The request is consumed; the next pass proceeds normally.
        let report = sync.reconcile().unwrap();
        assert_eq!(report.copied, 1);
        assert!(b.get_rule("C-1").is_ok());
    }

    #[test]
    fn test_history_log_appends_one_line_per_pass() {
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        a.upsert_rule(&sample_rule("H-1")).unwrap();

        let sync = manager(&dir, a, b, ConflictPolicy::PrimaryWins);
        sync.reconcile().unwrap();
        sync.reconcile().unwrap();

        let text = std::fs::read_to_string(dir.path().join("sync_history.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["copied"], 1);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["unchanged"], 1);
    }

    #[test]
    fn test_convergence_after_primary_wins_pass() {
        // Arbitrary divergent starting states converge in one pass.
        let dir = TempDir::new().unwrap();
        let a = document_backend(&dir, "a.json");
        let b = document_backend(&dir, "b.json");
        for id in ["P5-1", "P5-2", "P5-3"] {
            a.upsert_rule(&sample_rule(id)).unwrap();
        }
        b.upsert_rule(&sample_rule("P5-2")).unwrap();
        b.upsert_rule(&sample_rule("P5-9")).unwrap();
        a.disable("P5-1", "off").unwrap();
        b.disable("P5-2", "other").unwrap();

        let sync = manager(&dir, Arc::clone(&a), Arc::clone(&b), ConflictPolicy::PrimaryWins);
        sync.reconcile().unwrap();

        let list_a = a.list_rules(&RuleQuery::all()).unwrap();
        let list_b = b.list_rules(&RuleQuery::all()).unwrap();
        assert_eq!(list_a.len(), list_b.len());
        for (ra, rb) in list_a.iter().zip(list_b.iter()) {
            assert_eq!(
                canonical_record(ra).unwrap(),
                canonical_record(rb).unwrap()
            );
        }
    }
}
