//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, Utc};
use orgflow_types::result::{RecordError, RunStatus, StepResult, StepStatus};
use orgflow_types::state::{OrgId, TemplateId};
use rusqlite::Connection;

use crate::backend::{RunRow, StateBackend};
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for run history tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS migration_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    template_id TEXT NOT NULL,
    source_org TEXT NOT NULL,
    target_org TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    total_records INTEGER DEFAULT 0,
    successful_records INTEGER DEFAULT 0,
    failed_records INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS step_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES migration_runs(id),
    step_name TEXT NOT NULL,
    status TEXT NOT NULL,
    total_records INTEGER NOT NULL,
    successful_records INTEGER NOT NULL,
    failed_records INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS record_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES migration_runs(id),
    step_name TEXT NOT NULL,
    record_id TEXT,
    external_id TEXT,
    error_code TEXT NOT NULL,
    error_message TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_step_results_run ON step_results (run_id);
CREATE INDEX IF NOT EXISTS idx_record_errors_run_step ON record_errors (run_id, step_name);
";

/// `SQLite`-backed run history storage.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` state database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created, or
    /// [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Format a UTC timestamp for `SQLite` storage.
    fn to_sqlite(ts: DateTime<Utc>) -> String {
        ts.format(SQLITE_DATETIME_FMT).to_string()
    }

    /// Parse a `SQLite` datetime string back to a UTC timestamp.
    fn from_sqlite(raw: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT)
            .map_or_else(|_| Utc::now(), |ndt| ndt.and_utc())
    }
}

impl StateBackend for SqliteStateBackend {
    fn start_run(
        &self,
        template: &TemplateId,
        source_org: &OrgId,
        target_org: &OrgId,
    ) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO migration_runs (template_id, source_org, target_org, status) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                template.as_str(),
                source_org.as_str(),
                target_org.as_str(),
                RunStatus::Running.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(
        &self,
        run_id: i64,
        status: RunStatus,
        total: u64,
        successful: u64,
        failed: u64,
    ) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE migration_runs SET status = ?1, finished_at = datetime('now'), \
             total_records = ?2, successful_records = ?3, failed_records = ?4 \
             WHERE id = ?5",
            rusqlite::params![
                status.as_str(),
                total as i64,
                successful as i64,
                failed as i64,
                run_id,
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn insert_step_result(&self, run_id: i64, result: &StepResult) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO step_results \
             (run_id, step_name, status, total_records, successful_records, failed_records, \
              started_at, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                run_id,
                result.step_name,
                result.status.as_str(),
                result.total_records as i64,
                result.successful_records as i64,
                result.failed_records as i64,
                Self::to_sqlite(result.started_at),
                Self::to_sqlite(result.finished_at),
            ],
        )?;
        Ok(())
    }

    fn insert_record_errors(
        &self,
        run_id: i64,
        step_name: &str,
        errors: &[RecordError],
    ) -> error::Result<u64> {
        if errors.is_empty() {
            return Ok(0);
        }

        let conn = self.lock_conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut stmt = tx.prepare(
            "INSERT INTO record_errors \
             (run_id, step_name, record_id, external_id, error_code, error_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;

        let mut count = 0u64;
        for err in errors {
            stmt.execute(rusqlite::params![
                run_id,
                step_name,
                err.record_id,
                err.external_id,
                err.code,
                err.message,
            ])?;
            count += 1;
        }
        drop(stmt);
        tx.commit()?;

        Ok(count)
    }

    #[allow(clippy::cast_sign_loss)]
    fn list_runs(&self, limit: u32) -> error::Result<Vec<RunRow>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, template_id, source_org, target_org, status, \
                    total_records, successful_records, failed_records, \
                    started_at, finished_at \
             FROM migration_runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            let status_raw: String = row.get(4)?;
            Ok(RunRow {
                run_id: row.get(0)?,
                template_id: TemplateId::new(row.get::<_, String>(1)?),
                source_org: OrgId::new(row.get::<_, String>(2)?),
                target_org: OrgId::new(row.get::<_, String>(3)?),
                status: RunStatus::parse(&status_raw).unwrap_or(RunStatus::Failed),
                total_records: row.get::<_, i64>(5)? as u64,
                successful_records: row.get::<_, i64>(6)? as u64,
                failed_records: row.get::<_, i64>(7)? as u64,
                started_at: row.get(8)?,
                finished_at: row.get(9)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StateError::from)
    }

    #[allow(clippy::cast_sign_loss)]
    fn step_results(&self, run_id: i64) -> error::Result<Vec<StepResult>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT step_name, status, total_records, successful_records, failed_records, \
                    started_at, finished_at \
             FROM step_results WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([run_id], |row| {
            let status_raw: String = row.get(1)?;
            let started_raw: String = row.get(5)?;
            let finished_raw: String = row.get(6)?;
            Ok(StepResult {
                step_name: row.get(0)?,
                status: StepStatus::parse(&status_raw).unwrap_or(StepStatus::Failed),
                total_records: row.get::<_, i64>(2)? as u64,
                successful_records: row.get::<_, i64>(3)? as u64,
                failed_records: row.get::<_, i64>(4)? as u64,
                errors: Vec::new(),
                started_at: Self::from_sqlite(&started_raw),
                finished_at: Self::from_sqlite(&finished_raw),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StateError::from)
    }

    fn record_errors(
        &self,
        run_id: i64,
        step_name: &str,
        limit: u32,
    ) -> error::Result<Vec<RecordError>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_id, external_id, error_code, error_message \
             FROM record_errors WHERE run_id = ?1 AND step_name = ?2 \
             ORDER BY id LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![run_id, step_name, limit],
            |row| {
                Ok(RecordError {
                    record_id: row.get(0)?,
                    external_id: row.get(1)?,
                    code: row.get(2)?,
                    message: row.get(3)?,
                })
            },
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StateError::from)
    }
}
