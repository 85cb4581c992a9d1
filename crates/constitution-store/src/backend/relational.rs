//! Embedded relational backend over SQLite.
//!
//! Rules are stored twice: once as queryable columns (title, category,
//! severity) and once as `raw_definition`, the full JSON serialization that
//! round-trips unknown keys. Reads rehydrate from `raw_definition` so the
//! two backends stay byte-compatible through sync and migration.
//!
//! One connection executes writes (behind a mutex, one transaction per
//! logical operation); a small pool of additional connections serves reads.

use crate::backend::{
    HealthStatus, RuleBackend, RuleQuery, SCHEMA_VERSION, Snapshot, Statistics,
};
use crate::config::RelationalConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{
    BackendKind, Rule, RuleRecord, RuleState, RunRecord, StateUpdate, UsageEvent,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const CREATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS rules (
    rule_id        TEXT PRIMARY KEY,
    title          TEXT NOT NULL,
    category       TEXT NOT NULL,
    severity       TEXT NOT NULL,
    raw_definition TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS rule_state (
    rule_id         TEXT PRIMARY KEY REFERENCES rules(rule_id) ON DELETE CASCADE,
    enabled         INTEGER NOT NULL,
    disabled_reason TEXT,
    disabled_at     TEXT,
    updated_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS categories (
    name        TEXT PRIMARY KEY,
    description TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS usage_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp  TEXT NOT NULL,
    rule_id    TEXT NOT NULL,
    event_kind TEXT NOT NULL,
    context    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS run_history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at    TEXT NOT NULL,
    completed_at  TEXT NOT NULL,
    file_count    INTEGER NOT NULL,
    finding_count INTEGER NOT NULL,
    backend_used  TEXT NOT NULL,
    degraded      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rules_category ON rules(category);
CREATE INDEX IF NOT EXISTS idx_usage_events_rule ON usage_events(rule_id);
";

/// SQLite-backed rule store.
pub struct RelationalBackend {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    usage_event_cap: usize,
    health_timeout: Duration,
}

impl RelationalBackend {
    /// Open (or create) the database file and initialize the schema.
    pub fn open(
        config: &RelationalConfig,
        usage_event_cap: usize,
        health_timeout: Duration,
    ) -> StoreResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let writer = open_connection(config)?;
        writer.execute_batch(CREATE_SCHEMA)?;
        init_meta(&writer)?;

        let reader_count = config.pool_size.saturating_sub(1).max(1);
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            readers.push(Mutex::new(open_connection(config)?));
        }

        Ok(RelationalBackend {
            path: config.path.clone(),
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            usage_event_cap,
            health_timeout,
        })
    }

    /// Run `f` on the next reader connection in round-robin order.
    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[index]
            .lock()
            .map_err(|_| StoreError::unavailable("reader connection poisoned"))?;
        f(&conn)
    }

    /// Run `f` inside a single write transaction.
    fn with_write_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| StoreError::unavailable("writer connection poisoned"))?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

fn open_connection(config: &RelationalConfig) -> StoreResult<Connection> {
    let conn = Connection::open(&config.path)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    if config.use_wal {
        // PRAGMA returns a result row, so query_row instead of execute.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    }
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

fn init_meta(conn: &Connection) -> StoreResult<()> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match stored {
        Some(value) => {
            let found: u32 = value
                .parse()
                .map_err(|_| StoreError::unavailable(format!("bad schema_version: {value}")))?;
            if found > SCHEMA_VERSION {
                return Err(StoreError::IncompatibleSchema {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
        }
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO meta (key, value) VALUES ('rule_count', '0')",
                [],
            )?;
        }
    }
    Ok(())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(text: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::unavailable(format!("bad timestamp '{text}': {e}")))
}

fn rule_from_raw(raw: &str) -> StoreResult<Rule> {
    Ok(serde_json::from_str(raw)?)
}

fn state_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, bool, Option<String>, Option<String>, String)> {
    Ok((
        row.get(0)?,
        row.get::<_, i64>(1)? != 0,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn build_state(
    (rule_id, enabled, disabled_reason, disabled_at, updated_at): (
        String,
        bool,
        Option<String>,
        Option<String>,
        String,
    ),
) -> StoreResult<RuleState> {
    Ok(RuleState {
        rule_id,
        enabled,
        disabled_reason,
        disabled_at: disabled_at.as_deref().map(parse_ts).transpose()?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn get_state_tx(tx: &Transaction<'_>, rule_id: &str) -> StoreResult<RuleState> {
    let row = tx
        .query_row(
            "SELECT rule_id, enabled, disabled_reason, disabled_at, updated_at
             FROM rule_state WHERE rule_id = ?1",
            params![rule_id],
            state_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found(rule_id))?;
    build_state(row)
}

fn write_state_tx(tx: &Transaction<'_>, state: &RuleState) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO rule_state (rule_id, enabled, disabled_reason, disabled_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(rule_id) DO UPDATE SET
             enabled = excluded.enabled,
             disabled_reason = excluded.disabled_reason,
             disabled_at = excluded.disabled_at,
             updated_at = excluded.updated_at",
        params![
            state.rule_id,
            state.enabled as i64,
            state.disabled_reason,
            state.disabled_at.map(format_ts),
            format_ts(state.updated_at),
        ],
    )?;
    Ok(())
}

fn write_rule_tx(tx: &Transaction<'_>, rule: &Rule) -> StoreResult<()> {
    let raw = serde_json::to_string(rule)?;
    tx.execute(
        "INSERT INTO rules (rule_id, title, category, severity, raw_definition)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(rule_id) DO UPDATE SET
             title = excluded.title,
             category = excluded.category,
             severity = excluded.severity,
             raw_definition = excluded.raw_definition",
        params![
            rule.rule_id,
            rule.title,
            rule.category,
            rule.severity.to_string(),
            raw,
        ],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO categories (name) VALUES (?1)",
        params![rule.category],
    )?;
    Ok(())
}

/// Keep the stored rule count equal to the actual row count.
fn refresh_rule_count_tx(tx: &Transaction<'_>) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO meta (key, value)
         VALUES ('rule_count', CAST((SELECT COUNT(*) FROM rules) AS TEXT))
         ON CONFLICT(key) DO UPDATE SET
             value = CAST((SELECT COUNT(*) FROM rules) AS TEXT)",
        [],
    )?;
    Ok(())
}

fn trim_usage_events_tx(tx: &Transaction<'_>, cap: usize) -> StoreResult<()> {
    tx.execute(
        "DELETE FROM usage_events WHERE id NOT IN
             (SELECT id FROM usage_events ORDER BY id DESC LIMIT ?1)",
        params![cap as i64],
    )?;
    Ok(())
}

impl RuleBackend for RelationalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn get_rule(&self, rule_id: &str) -> StoreResult<RuleRecord> {
        self.with_reader(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT raw_definition FROM rules WHERE rule_id = ?1",
                    params![rule_id],
                    |row| row.get(0),
                )
                .optional()?;
            let raw = raw.ok_or_else(|| StoreError::not_found(rule_id))?;
            let state_row = conn
                .query_row(
                    "SELECT rule_id, enabled, disabled_reason, disabled_at, updated_at
                     FROM rule_state WHERE rule_id = ?1",
                    params![rule_id],
                    state_from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::not_found(rule_id))?;
            Ok(RuleRecord {
                rule: rule_from_raw(&raw)?,
                state: build_state(state_row)?,
            })
        })
    }

    fn list_rules(&self, filter: &RuleQuery) -> StoreResult<Vec<RuleRecord>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.raw_definition,
                        s.rule_id, s.enabled, s.disabled_reason, s.disabled_at, s.updated_at
                 FROM rules r JOIN rule_state s ON s.rule_id = r.rule_id
                 ORDER BY r.rule_id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                let raw: String = row.get(0)?;
                Ok((
                    raw,
                    (
                        row.get(1)?,
                        row.get::<_, i64>(2)? != 0,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ),
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (raw, state_row) = row?;
                let record = RuleRecord {
                    rule: rule_from_raw(&raw)?,
                    state: build_state(state_row)?,
                };
                if filter.matches(&record) {
                    records.push(record);
                }
            }
            Ok(records)
        })
    }

    fn upsert_rule(&self, rule: &Rule) -> StoreResult<()> {
        self.with_write_tx(|tx| {
            write_rule_tx(tx, rule)?;
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM rule_state WHERE rule_id = ?1",
                    params![rule.rule_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_none() {
                write_state_tx(tx, &RuleState::initial(rule, Utc::now()))?;
            }
            refresh_rule_count_tx(tx)
        })
    }

    fn put_record(&self, record: &RuleRecord) -> StoreResult<()> {
        self.with_write_tx(|tx| {
            write_rule_tx(tx, &record.rule)?;
            write_state_tx(tx, &record.state)?;
            refresh_rule_count_tx(tx)
        })
    }

    fn enable(&self, rule_id: &str) -> StoreResult<RuleState> {
        self.with_write_tx(|tx| {
            let prior = get_state_tx(tx, rule_id)?;
            let next = RuleState {
                rule_id: rule_id.to_string(),
                enabled: true,
                disabled_reason: None,
                disabled_at: None,
                updated_at: Utc::now(),
            };
            write_state_tx(tx, &next)?;
            Ok(prior)
        })
    }

    fn disable(&self, rule_id: &str, reason: &str) -> StoreResult<RuleState> {
        self.with_write_tx(|tx| {
            let prior = get_state_tx(tx, rule_id)?;
            let now = Utc::now();
            let next = RuleState {
                rule_id: rule_id.to_string(),
                enabled: false,
                disabled_reason: Some(reason.to_string()),
                disabled_at: Some(now),
                updated_at: now,
            };
            write_state_tx(tx, &next)?;
            Ok(prior)
        })
    }

    fn bulk_set(&self, updates: &[StateUpdate]) -> StoreResult<usize> {
        self.with_write_tx(|tx| {
            // The transaction makes this all-or-nothing: a NotFound midway
            // rolls back every earlier update.
            let now = Utc::now();
            for update in updates {
                let _prior = get_state_tx(tx, &update.rule_id)?;
                let next = RuleState {
                    rule_id: update.rule_id.clone(),
                    enabled: update.enabled,
                    disabled_reason: if update.enabled {
                        None
                    } else {
                        update.reason.clone()
                    },
                    disabled_at: if update.enabled { None } else { Some(now) },
                    updated_at: now,
                };
                write_state_tx(tx, &next)?;
            }
            Ok(updates.len())
        })
    }

    fn statistics(&self) -> StoreResult<Statistics> {
        let records = self.list_rules(&RuleQuery::all())?;
        Ok(Statistics::from_records(records.iter()))
    }

    fn record_event(&self, event: &UsageEvent) -> StoreResult<()> {
        let cap = self.usage_event_cap;
        self.with_write_tx(|tx| {
            tx.execute(
                "INSERT INTO usage_events (timestamp, rule_id, event_kind, context)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    format_ts(event.timestamp),
                    event.rule_id,
                    event.kind.as_str(),
                    event.context,
                ],
            )?;
            trim_usage_events_tx(tx, cap)
        })
    }

    fn record_run(&self, run: &RunRecord) -> StoreResult<()> {
        self.with_write_tx(|tx| {
            tx.execute(
                "INSERT INTO run_history
                     (started_at, completed_at, file_count, finding_count, backend_used, degraded)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    format_ts(run.started_at),
                    format_ts(run.completed_at),
                    run.file_count as i64,
                    run.finding_count as i64,
                    run.backend_used.to_string(),
                    run.degraded as i64,
                ],
            )?;
            Ok(())
        })
    }

    fn health(&self) -> HealthStatus {
        let started = Instant::now();
        let probe = self.with_reader(|conn| {
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            let version: String = conn.query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )?;
            let declared: Option<String> = conn
                .query_row(
                    "SELECT value FROM meta WHERE key = 'rule_count'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let actual: i64 = conn.query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))?;
            Ok((one, version, declared, actual))
        });

        match probe {
            Ok((_, version, declared, actual)) => {
                if started.elapsed() > self.health_timeout {
                    return HealthStatus::Degraded {
                        reason: format!("health probe took {:?}", started.elapsed()),
                    };
                }
                if version != SCHEMA_VERSION.to_string() {
                    return HealthStatus::Unhealthy {
                        reason: format!("schema version mismatch: {version}"),
                    };
                }
                let declared: i64 = declared.and_then(|v| v.parse().ok()).unwrap_or(actual);
                if declared != actual {
                    return HealthStatus::Degraded {
                        reason: format!("rule count drift: meta says {declared}, table has {actual}"),
                    };
                }
                HealthStatus::Healthy
            }
            Err(e) => HealthStatus::Unhealthy {
                reason: e.to_string(),
            },
        }
    }

    fn snapshot(&self) -> StoreResult<Snapshot> {
        self.with_reader(|conn| {
            let mut snapshot = Snapshot::empty(BackendKind::Relational);

            let mut stmt = conn.prepare("SELECT rule_id, raw_definition FROM rules")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (rule_id, raw) = row?;
                snapshot.rules.insert(rule_id, rule_from_raw(&raw)?);
            }

            let mut stmt = conn.prepare(
                "SELECT rule_id, enabled, disabled_reason, disabled_at, updated_at FROM rule_state",
            )?;
            let rows = stmt.query_map([], state_from_row)?;
            for row in rows {
                let state = build_state(row?)?;
                snapshot.state.insert(state.rule_id.clone(), state);
            }

            let mut stmt = conn.prepare(
                "SELECT timestamp, rule_id, event_kind, context FROM usage_events ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (timestamp, rule_id, event_kind, context) = row?;
                let kind = crate::model::UsageEventKind::parse(&event_kind).ok_or_else(|| {
                    StoreError::unavailable(format!("bad event kind '{event_kind}'"))
                })?;
                snapshot.usage_events.push(UsageEvent {
                    timestamp: parse_ts(&timestamp)?,
                    rule_id,
                    kind,
                    context,
                });
            }

            let mut stmt = conn.prepare(
                "SELECT started_at, completed_at, file_count, finding_count, backend_used, degraded
                 FROM run_history ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)? != 0,
                ))
            })?;
            for row in rows {
                let (started_at, completed_at, file_count, finding_count, backend_used, degraded) =
                    row?;
                let backend_used = BackendKind::parse(&backend_used).ok_or_else(|| {
                    StoreError::unavailable(format!("bad backend kind '{backend_used}'"))
                })?;
                snapshot.run_history.push(RunRecord {
                    started_at: parse_ts(&started_at)?,
                    completed_at: parse_ts(&completed_at)?,
                    file_count: file_count as usize,
                    finding_count: finding_count as usize,
                    backend_used,
                    degraded,
                });
            }

            Ok(snapshot)
        })
    }

    fn apply_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(StoreError::IncompatibleSchema {
                found: snapshot.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        self.with_write_tx(|tx| {
            for table in ["rule_state", "rules", "categories", "usage_events", "run_history"] {
                tx.execute(&format!("DELETE FROM {table}"), [])?;
            }
            for rule in snapshot.rules.values() {
                write_rule_tx(tx, rule)?;
            }
            for state in snapshot.state.values() {
                write_state_tx(tx, state)?;
            }
            for event in &snapshot.usage_events {
                tx.execute(
                    "INSERT INTO usage_events (timestamp, rule_id, event_kind, context)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        format_ts(event.timestamp),
                        event.rule_id,
                        event.kind.as_str(),
                        event.context,
                    ],
                )?;
            }
            for run in &snapshot.run_history {
                tx.execute(
                    "INSERT INTO run_history
                         (started_at, completed_at, file_count, finding_count, backend_used, degraded)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        format_ts(run.started_at),
                        format_ts(run.completed_at),
                        run.file_count as i64,
                        run.finding_count as i64,
                        run.backend_used.to_string(),
                        run.degraded as i64,
                    ],
                )?;
            }
            refresh_rule_count_tx(tx)
        })
    }
}

impl std::fmt::Debug for RelationalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalBackend")
            .field("path", &self.path)
            .field("readers", &self.readers.len())
            .finish()
    }
}
