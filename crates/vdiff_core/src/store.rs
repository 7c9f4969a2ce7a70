//! Durable per-shard run state: the `vdiff`, `vdiff_table` and `vdiff_log`
//! sidecar tables.
//!
//! Every target shard primary owns one of these databases. State transitions
//! that touch both the run row and its table rows commit in one transaction,
//! and every mutation appends an audit line to `vdiff_log`. Nothing outside
//! this module issues SQL against the sidecar.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::VdiffError;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vdiff (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vdiff_uuid TEXT NOT NULL UNIQUE,
    keyspace TEXT NOT NULL,
    workflow TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    last_error TEXT,
    options_json TEXT NOT NULL,
    rows_compared INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS vdiff_table (
    vdiff_id INTEGER NOT NULL,
    table_name TEXT NOT NULL,
    state TEXT NOT NULL,
    rows_compared INTEGER NOT NULL DEFAULT 0,
    mismatched_rows INTEGER NOT NULL DEFAULT 0,
    extra_rows_source INTEGER NOT NULL DEFAULT 0,
    extra_rows_target INTEGER NOT NULL DEFAULT 0,
    lastpk_json TEXT,
    report_json TEXT,
    PRIMARY KEY (vdiff_id, table_name)
);
CREATE TABLE IF NOT EXISTS vdiff_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vdiff_id INTEGER NOT NULL,
    ts TEXT NOT NULL,
    message TEXT NOT NULL
);
";

/// Lifecycle state of a run on one shard, and of one table within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Started,
    Stopped,
    Error,
    Completed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Started => "started",
            RunState::Stopped => "stopped",
            RunState::Error => "error",
            RunState::Completed => "completed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = VdiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunState::Pending),
            "started" => Ok(RunState::Started),
            "stopped" => Ok(RunState::Stopped),
            "error" => Ok(RunState::Error),
            "completed" => Ok(RunState::Completed),
            other => Err(VdiffError::Permanent(format!("unknown run state {other:?}"))),
        }
    }
}

/// One `vdiff` row.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub uuid: String,
    pub keyspace: String,
    pub workflow: String,
    pub state: RunState,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub last_error: Option<String>,
    pub options_json: String,
    pub rows_compared: i64,
}

/// One `vdiff_table` row.
#[derive(Debug, Clone)]
pub struct TableRecord {
    pub vdiff_id: i64,
    pub table_name: String,
    pub state: RunState,
    pub rows_compared: i64,
    pub mismatched_rows: i64,
    pub extra_rows_source: i64,
    pub extra_rows_target: i64,
    pub lastpk_json: Option<String>,
    pub report_json: Option<String>,
}

impl TableRecord {
    pub fn has_mismatch(&self) -> bool {
        self.mismatched_rows > 0 || self.extra_rows_source > 0 || self.extra_rows_target > 0
    }
}

/// Progress delta the differ checkpoints. Writes are keyed by
/// `(vdiff_id, table_name)` and idempotent for a given position.
#[derive(Debug, Default, Clone)]
pub struct TableProgress {
    pub lastpk_json: Option<String>,
    pub rows_delta: i64,
    pub mismatched_delta: i64,
    pub extra_source_delta: i64,
    pub extra_target_delta: i64,
    pub samples: Vec<serde_json::Value>,
    pub sample_cap: usize,
}

pub struct SidecarDb {
    conn: Mutex<Connection>,
}

impl SidecarDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<SidecarDb>, VdiffError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Arc::new(SidecarDb {
            conn: Mutex::new(conn),
        }))
    }

    pub fn open_in_memory() -> Result<Arc<SidecarDb>, VdiffError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Arc::new(SidecarDb {
            conn: Mutex::new(conn),
        }))
    }

    fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, VdiffError>,
    ) -> Result<T, VdiffError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Insert the `vdiff` row for a new run on this shard.
    pub fn create_run(
        &self,
        uuid: &str,
        keyspace: &str,
        workflow: &str,
        options_json: &str,
    ) -> Result<i64, VdiffError> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO vdiff (vdiff_uuid, keyspace, workflow, state, created_at, options_json)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
                params![uuid, keyspace, workflow, now_utc(), options_json],
            )?;
            let id = tx.last_insert_rowid();
            log_tx(tx, id, &format!("created vdiff {uuid}"))?;
            Ok(id)
        })
    }

    pub fn run_by_uuid(&self, uuid: &str) -> Result<Option<RunRecord>, VdiffError> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                &format!("{RUN_SELECT} WHERE vdiff_uuid = ?1"),
                params![uuid],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    /// The most recently created run for a workflow.
    pub fn latest_run(&self, workflow: &str) -> Result<Option<RunRecord>, VdiffError> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                &format!("{RUN_SELECT} WHERE workflow = ?1 ORDER BY id DESC LIMIT 1"),
                params![workflow],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    pub fn runs_for_workflow(&self, workflow: &str) -> Result<Vec<RunRecord>, VdiffError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{RUN_SELECT} WHERE workflow = ?1 ORDER BY id"))?;
        let runs = stmt
            .query_map(params![workflow], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    pub fn runs_in_state(
        &self,
        workflow: &str,
        state: RunState,
    ) -> Result<Vec<RunRecord>, VdiffError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("{RUN_SELECT} WHERE workflow = ?1 AND state = ?2 ORDER BY id"))?;
        let runs = stmt
            .query_map(params![workflow, state.as_str()], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Runs a restarted engine must pick back up.
    pub fn resumable_runs(&self, workflow: &str) -> Result<Vec<RunRecord>, VdiffError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{RUN_SELECT} WHERE workflow = ?1 AND state IN ('pending', 'started') ORDER BY id"
        ))?;
        let runs = stmt
            .query_map(params![workflow], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Move a run into `started`, stamping `started_at` on first start and
    /// clearing any prior error.
    pub fn transition_started(&self, vdiff_id: i64) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE vdiff SET state = 'started', last_error = NULL,
                        started_at = COALESCE(started_at, ?2)
                 WHERE id = ?1",
                params![vdiff_id, now_utc()],
            )?;
            log_tx(tx, vdiff_id, "state changed to started")
        })
    }

    /// Record a shard-level failure: run and in-flight tables move to
    /// `error` together, `completed_at` is voided.
    pub fn mark_error(&self, vdiff_id: i64, message: &str) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE vdiff SET state = 'error', last_error = ?2, completed_at = NULL
                 WHERE id = ?1",
                params![vdiff_id, message],
            )?;
            tx.execute(
                "UPDATE vdiff_table SET state = 'error'
                 WHERE vdiff_id = ?1 AND state = 'started'",
                params![vdiff_id],
            )?;
            log_tx(tx, vdiff_id, &format!("error: {message}"))
        })
    }

    /// Cooperative stop. Clears `last_error` so a cancellation artifact
    /// never shows up as a failure in `show`.
    pub fn stop_run(&self, vdiff_id: i64) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE vdiff SET state = 'stopped'
                 WHERE id = ?1 AND state IN ('pending', 'started', 'error')",
                params![vdiff_id],
            )?;
            // Even an already-terminal run sheds cancellation artifacts.
            tx.execute(
                "UPDATE vdiff SET last_error = NULL WHERE id = ?1",
                params![vdiff_id],
            )?;
            tx.execute(
                "UPDATE vdiff_table SET state = 'stopped'
                 WHERE vdiff_id = ?1 AND state IN ('pending', 'started')",
                params![vdiff_id],
            )?;
            if changed > 0 {
                log_tx(tx, vdiff_id, "state changed to stopped")?;
            }
            Ok(())
        })
    }

    /// Rewind a finished, stopped or failed run so its differ starts again
    /// from the saved checkpoints. Counters and `lastpk` survive; the next
    /// pass only walks rows past the checkpoint, which is what makes
    /// `rows_compared` cumulative across resumes.
    pub fn resume_reset(&self, vdiff_id: i64) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE vdiff SET state = 'pending', last_error = NULL, completed_at = NULL
                 WHERE id = ?1",
                params![vdiff_id],
            )?;
            tx.execute(
                "UPDATE vdiff_table SET state = 'pending' WHERE vdiff_id = ?1",
                params![vdiff_id],
            )?;
            log_tx(tx, vdiff_id, "resumed from checkpoint")
        })
    }

    /// Terminal success for this shard. `completed_at` must land strictly
    /// after `started_at` even at second granularity.
    pub fn complete_run(&self, vdiff_id: i64) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            let started_at: Option<String> = tx.query_row(
                "SELECT started_at FROM vdiff WHERE id = ?1",
                params![vdiff_id],
                |row| row.get(0),
            )?;
            let completed = completed_after(started_at.as_deref());
            tx.execute(
                "UPDATE vdiff SET state = 'completed', completed_at = ?2, last_error = NULL
                 WHERE id = ?1",
                params![vdiff_id, completed],
            )?;
            log_tx(tx, vdiff_id, "state changed to completed")
        })
    }

    /// Ensure a `vdiff_table` row exists; keyed by `(vdiff_id, table_name)`
    /// so repeated initialization is a no-op.
    pub fn init_table(&self, vdiff_id: i64, table: &str) -> Result<(), VdiffError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO vdiff_table (vdiff_id, table_name, state)
             VALUES (?1, ?2, 'pending')",
            params![vdiff_id, table],
        )?;
        Ok(())
    }

    pub fn table_record(&self, vdiff_id: i64, table: &str) -> Result<TableRecord, VdiffError> {
        let conn = self.conn.lock().unwrap();
        let rec = conn.query_row(
            &format!("{TABLE_SELECT} WHERE vdiff_id = ?1 AND table_name = ?2"),
            params![vdiff_id, table],
            table_from_row,
        )?;
        Ok(rec)
    }

    pub fn table_records(&self, vdiff_id: i64) -> Result<Vec<TableRecord>, VdiffError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("{TABLE_SELECT} WHERE vdiff_id = ?1 ORDER BY table_name"))?;
        let recs = stmt
            .query_map(params![vdiff_id], table_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recs)
    }

    pub fn table_started(&self, vdiff_id: i64, table: &str) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE vdiff_table SET state = 'started'
                 WHERE vdiff_id = ?1 AND table_name = ?2",
                params![vdiff_id, table],
            )?;
            log_tx(tx, vdiff_id, &format!("table {table} started"))
        })
    }

    pub fn complete_table(&self, vdiff_id: i64, table: &str) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE vdiff_table SET state = 'completed'
                 WHERE vdiff_id = ?1 AND table_name = ?2",
                params![vdiff_id, table],
            )?;
            log_tx(tx, vdiff_id, &format!("table {table} completed"))
        })
    }

    /// Persist a progress checkpoint: position, counter deltas and bounded
    /// mismatch samples, plus the run-level `rows_compared` aggregate, in
    /// one transaction.
    pub fn save_progress(
        &self,
        vdiff_id: i64,
        table: &str,
        progress: &TableProgress,
    ) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            if let Some(lastpk) = &progress.lastpk_json {
                tx.execute(
                    "UPDATE vdiff_table SET lastpk_json = ?3
                     WHERE vdiff_id = ?1 AND table_name = ?2",
                    params![vdiff_id, table, lastpk],
                )?;
            }
            tx.execute(
                "UPDATE vdiff_table SET
                     rows_compared = rows_compared + ?3,
                     mismatched_rows = mismatched_rows + ?4,
                     extra_rows_source = extra_rows_source + ?5,
                     extra_rows_target = extra_rows_target + ?6
                 WHERE vdiff_id = ?1 AND table_name = ?2",
                params![
                    vdiff_id,
                    table,
                    progress.rows_delta,
                    progress.mismatched_delta,
                    progress.extra_source_delta,
                    progress.extra_target_delta
                ],
            )?;
            tx.execute(
                "UPDATE vdiff SET rows_compared = rows_compared + ?2 WHERE id = ?1",
                params![vdiff_id, progress.rows_delta],
            )?;

            if !progress.samples.is_empty() {
                let current: Option<String> = tx.query_row(
                    "SELECT report_json FROM vdiff_table
                     WHERE vdiff_id = ?1 AND table_name = ?2",
                    params![vdiff_id, table],
                    |row| row.get(0),
                )?;
                let mut samples: Vec<serde_json::Value> = match current.as_deref() {
                    Some(json) => serde_json::from_str::<serde_json::Value>(json)?
                        .get("samples")
                        .and_then(|v| v.as_array().cloned())
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                for sample in &progress.samples {
                    if samples.len() >= progress.sample_cap {
                        break;
                    }
                    samples.push(sample.clone());
                }
                let report = serde_json::json!({ "samples": samples });
                tx.execute(
                    "UPDATE vdiff_table SET report_json = ?3
                     WHERE vdiff_id = ?1 AND table_name = ?2",
                    params![vdiff_id, table, report.to_string()],
                )?;
            }

            log_tx(
                tx,
                vdiff_id,
                &format!("table {table} progress: +{} rows", progress.rows_delta),
            )
        })
    }

    /// Purge one run and its children. The orphan invariant holds because
    /// all three deletes commit together.
    pub fn delete_run_by_uuid(&self, uuid: &str) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            let id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM vdiff WHERE vdiff_uuid = ?1",
                    params![uuid],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = id {
                delete_run_tx(tx, id)?;
            }
            Ok(())
        })
    }

    /// Purge every run of a workflow on this shard, children included. Also
    /// the sweep executed when the surrounding workflow is completed.
    pub fn delete_workflow(&self, keyspace: &str, workflow: &str) -> Result<(), VdiffError> {
        self.with_tx(|tx| {
            let mut stmt =
                tx.prepare("SELECT id FROM vdiff WHERE keyspace = ?1 AND workflow = ?2")?;
            let ids = stmt
                .query_map(params![keyspace, workflow], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);
            for id in ids {
                delete_run_tx(tx, id)?;
            }
            Ok(())
        })
    }

    /// Raw statement execution, the same surface a primary's query service
    /// exposes. Tests use it to inject simulated failures.
    pub fn execute_sql(&self, sql: &str) -> Result<usize, VdiffError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(sql, [])?)
    }

    /// Scalar count query against the sidecar tables.
    pub fn count(&self, sql: &str) -> Result<i64, VdiffError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row(sql, [], |row| row.get(0))?)
    }
}

const RUN_SELECT: &str = "SELECT id, vdiff_uuid, keyspace, workflow, state, created_at, \
                          started_at, completed_at, last_error, options_json, rows_compared \
                          FROM vdiff";

const TABLE_SELECT: &str = "SELECT vdiff_id, table_name, state, rows_compared, mismatched_rows, \
                            extra_rows_source, extra_rows_target, lastpk_json, report_json \
                            FROM vdiff_table";

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let state: String = row.get(4)?;
    Ok(RunRecord {
        id: row.get(0)?,
        uuid: row.get(1)?,
        keyspace: row.get(2)?,
        workflow: row.get(3)?,
        state: state.parse().unwrap_or(RunState::Error),
        created_at: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        last_error: row.get(8)?,
        options_json: row.get(9)?,
        rows_compared: row.get(10)?,
    })
}

fn table_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TableRecord> {
    let state: String = row.get(2)?;
    Ok(TableRecord {
        vdiff_id: row.get(0)?,
        table_name: row.get(1)?,
        state: state.parse().unwrap_or(RunState::Error),
        rows_compared: row.get(3)?,
        mismatched_rows: row.get(4)?,
        extra_rows_source: row.get(5)?,
        extra_rows_target: row.get(6)?,
        lastpk_json: row.get(7)?,
        report_json: row.get(8)?,
    })
}

fn delete_run_tx(tx: &Transaction<'_>, vdiff_id: i64) -> Result<(), VdiffError> {
    tx.execute("DELETE FROM vdiff_log WHERE vdiff_id = ?1", params![vdiff_id])?;
    tx.execute(
        "DELETE FROM vdiff_table WHERE vdiff_id = ?1",
        params![vdiff_id],
    )?;
    tx.execute("DELETE FROM vdiff WHERE id = ?1", params![vdiff_id])?;
    Ok(())
}

fn log_tx(tx: &Transaction<'_>, vdiff_id: i64, message: &str) -> Result<(), VdiffError> {
    tx.execute(
        "INSERT INTO vdiff_log (vdiff_id, ts, message) VALUES (?1, ?2, ?3)",
        params![vdiff_id, now_utc(), message],
    )?;
    Ok(())
}

fn now_utc() -> String {
    Utc::now().format(TIME_FORMAT).to_string()
}

/// Completion timestamp strictly after `started_at`, even when the run
/// finished within the same wall-clock second.
fn completed_after(started_at: Option<&str>) -> String {
    let now = Utc::now().naive_utc();
    let floor = started_at
        .and_then(|s| NaiveDateTime::parse_from_str(s, TIME_FORMAT).ok())
        .map(|started| started + ChronoDuration::seconds(1));
    let completed = match floor {
        Some(floor) if now < floor => floor,
        _ => now,
    };
    completed.format(TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Arc<SidecarDb> {
        SidecarDb::open_in_memory().unwrap()
    }

    #[test]
    fn run_lifecycle_round_trips() {
        let db = db();
        let id = db.create_run("u-1", "customer", "p1c2", "{}").unwrap();
        let run = db.run_by_uuid("u-1").unwrap().unwrap();
        assert_eq!(run.state, RunState::Pending);
        assert!(run.started_at.is_none());

        db.transition_started(id).unwrap();
        let run = db.run_by_uuid("u-1").unwrap().unwrap();
        assert_eq!(run.state, RunState::Started);
        assert!(run.started_at.is_some());

        db.complete_run(id).unwrap();
        let run = db.run_by_uuid("u-1").unwrap().unwrap();
        assert_eq!(run.state, RunState::Completed);
        // completed_at is strictly after started_at, at second precision.
        assert!(run.completed_at.unwrap() > run.started_at.unwrap());
    }

    #[test]
    fn uuid_is_unique_per_shard() {
        let db = db();
        db.create_run("u-1", "customer", "p1c2", "{}").unwrap();
        assert!(db.create_run("u-1", "customer", "p1c2", "{}").is_err());
    }

    #[test]
    fn progress_accumulates_and_bounds_samples() {
        let db = db();
        let id = db.create_run("u-1", "customer", "p1c2", "{}").unwrap();
        db.init_table(id, "customer").unwrap();
        db.init_table(id, "customer").unwrap();

        let progress = TableProgress {
            lastpk_json: Some("[10]".into()),
            rows_delta: 10,
            mismatched_delta: 1,
            samples: vec![serde_json::json!({"pk": [3]})],
            sample_cap: 2,
            ..Default::default()
        };
        db.save_progress(id, "customer", &progress).unwrap();
        db.save_progress(id, "customer", &progress).unwrap();
        db.save_progress(id, "customer", &progress).unwrap();

        let rec = db.table_record(id, "customer").unwrap();
        assert_eq!(rec.rows_compared, 30);
        assert_eq!(rec.mismatched_rows, 3);
        assert_eq!(rec.lastpk_json.as_deref(), Some("[10]"));
        let report: serde_json::Value =
            serde_json::from_str(rec.report_json.as_deref().unwrap()).unwrap();
        assert_eq!(report["samples"].as_array().unwrap().len(), 2);

        let run = db.run_by_uuid("u-1").unwrap().unwrap();
        assert_eq!(run.rows_compared, 30);
    }

    #[test]
    fn stop_clears_last_error() {
        let db = db();
        let id = db.create_run("u-1", "customer", "p1c2", "{}").unwrap();
        db.transition_started(id).unwrap();
        db.mark_error(id, "context canceled").unwrap();
        db.stop_run(id).unwrap();
        let run = db.run_by_uuid("u-1").unwrap().unwrap();
        assert_eq!(run.state, RunState::Stopped);
        assert!(run.last_error.is_none());
    }

    #[test]
    fn error_transition_moves_run_and_tables_together() {
        let db = db();
        let id = db.create_run("u-1", "customer", "p1c2", "{}").unwrap();
        db.init_table(id, "customer").unwrap();
        db.transition_started(id).unwrap();
        db.table_started(id, "customer").unwrap();
        db.mark_error(id, "(errno 1213) (sqlstate 40001)").unwrap();
        let run = db.run_by_uuid("u-1").unwrap().unwrap();
        assert_eq!(run.state, RunState::Error);
        assert_eq!(
            db.table_record(id, "customer").unwrap().state,
            RunState::Error
        );
    }

    #[test]
    fn delete_leaves_no_orphans() {
        let db = db();
        let id = db.create_run("u-1", "customer", "p1c2", "{}").unwrap();
        db.init_table(id, "customer").unwrap();
        db.transition_started(id).unwrap();
        db.delete_run_by_uuid("u-1").unwrap();

        for table in ["vdiff", "vdiff_table", "vdiff_log"] {
            assert_eq!(
                db.count(&format!("SELECT COUNT(*) FROM {table}")).unwrap(),
                0,
                "{table}"
            );
        }
        // Deleting an absent run stays a no-op.
        db.delete_run_by_uuid("u-1").unwrap();
    }

    #[test]
    fn workflow_delete_sweeps_every_run() {
        let db = db();
        for n in 0..3 {
            let id = db
                .create_run(&format!("u-{n}"), "customer", "p1c2", "{}")
                .unwrap();
            db.init_table(id, "customer").unwrap();
        }
        db.create_run("other", "customer", "other_wf", "{}").unwrap();

        db.delete_workflow("customer", "p1c2").unwrap();
        assert_eq!(db.count("SELECT COUNT(*) FROM vdiff").unwrap(), 1);
        assert_eq!(db.count("SELECT COUNT(*) FROM vdiff_table").unwrap(), 0);
    }

    #[test]
    fn mutations_append_to_the_log() {
        let db = db();
        let id = db.create_run("u-1", "customer", "p1c2", "{}").unwrap();
        db.transition_started(id).unwrap();
        db.complete_run(id).unwrap();
        let logged = db
            .count(&format!("SELECT COUNT(*) FROM vdiff_log WHERE vdiff_id = {id}"))
            .unwrap();
        assert!(logged >= 3);
    }
}
