// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent spool backed by SQLite.
//
// Control records (everything about a job except its documents) live in
// `spool.db` inside the spool directory, one JSON record per job.  Document
// payloads are plain files next to it, named `d{id:05}-{n:03}` with `n`
// counting from 1.  A `meta` table keeps the highest job id ever saved so
// ids stay unique after records are deleted.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::error::{Result, SpoolError};
use spoolwerk_core::types::JobId;

use crate::job::ControlRecord;

/// SQLite schema for the jobs and meta tables.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY,
        state TEXT NOT NULL,
        terminal INTEGER NOT NULL,
        record TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
"#;

const LAST_JOB_ID: &str = "last_job_id";

/// A control record as read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedRecord {
    Valid(ControlRecord),
    /// The stored record could not be decoded.  `row` is the raw row id,
    /// which need not fit a `JobId`.
    Malformed { row: i64, reason: String },
}

/// Durable storage for control records and document files.
pub trait Spool {
    /// Insert or replace the record for `record.id`.
    fn save(&self, record: &ControlRecord) -> Result<()>;

    /// Delete a control record.  Deleting a missing record is not an error.
    fn delete(&self, id: JobId) -> Result<()> {
        self.delete_row(i64::from(id.0))
    }

    /// Delete the stored row `row`, valid or not.
    fn delete_row(&self, row: i64) -> Result<()>;

    /// Records of jobs that are not in a terminal state.
    fn load_active(&self) -> Result<Vec<LoadedRecord>>;

    /// Records of canceled, aborted and completed jobs.
    fn load_history(&self) -> Result<Vec<LoadedRecord>>;

    /// Highest job id ever saved, including jobs whose records were deleted.
    fn last_job_id(&self) -> Result<Option<JobId>>;

    /// Path of document `index` (0-based) of job `id`.
    fn data_file(&self, id: JobId, index: usize) -> PathBuf;

    /// Copy `source` into the spool as document `index` of job `id`.
    fn import_data_file(&self, id: JobId, index: usize, source: &Path) -> Result<PathBuf>;

    /// Remove the first `count` documents of job `id`.  Missing files are
    /// skipped.
    fn remove_data_files(&self, id: JobId, count: usize);
}

/// Spool stored in a SQLite database plus a directory of data files.
pub struct SqliteSpool {
    conn: Connection,
    dir: PathBuf,
}

impl SqliteSpool {
    /// Open (or create) `spool.db` inside `spool_dir`.
    #[instrument(skip_all, fields(dir = %spool_dir.as_ref().display()))]
    pub fn open(spool_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = spool_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let conn = Connection::open(dir.join("spool.db"))
            .map_err(|e| SpoolError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| SpoolError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| SpoolError::Database(format!("create table: {e}")))?;

        info!("spool database opened");
        Ok(Self { conn, dir })
    }

    /// In-memory control records with data files under `spool_dir`.
    pub fn open_in_memory(spool_dir: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SpoolError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| SpoolError::Database(format!("create table: {e}")))?;

        debug!("in-memory spool database opened");
        Ok(Self {
            conn,
            dir: spool_dir.as_ref().to_path_buf(),
        })
    }

    fn load_where(&self, terminal: bool) -> Result<Vec<LoadedRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, record FROM jobs WHERE terminal = ?1 ORDER BY id ASC")
            .map_err(|e| SpoolError::Database(format!("prepare load: {e}")))?;

        let rows = stmt
            .query_map(params![terminal], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| SpoolError::Database(format!("query load: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SpoolError::Database(format!("collect rows: {e}")))?;

        Ok(rows.into_iter().map(|(id, json)| decode_record(id, &json)).collect())
    }
}

impl Spool for SqliteSpool {
    #[instrument(skip(self, record), fields(job_id = record.id))]
    fn save(&self, record: &ControlRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.conn
            .execute(
                "INSERT INTO jobs (id, state, terminal, record, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    state = excluded.state,
                    terminal = excluded.terminal,
                    record = excluded.record,
                    updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.state.to_string(),
                    record.state.is_terminal(),
                    json,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| SpoolError::Database(format!("save job: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = MAX(value, excluded.value)",
                params![LAST_JOB_ID, record.id],
            )
            .map_err(|e| SpoolError::Database(format!("save last job id: {e}")))?;

        debug!(job_id = record.id, state = %record.state, "control record saved");
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete_row(&self, row: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![row])
            .map_err(|e| SpoolError::Database(format!("delete job: {e}")))?;

        debug!(row, "control record deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    fn load_active(&self) -> Result<Vec<LoadedRecord>> {
        let records = self.load_where(false)?;
        debug!(count = records.len(), "loaded active records");
        Ok(records)
    }

    #[instrument(skip(self))]
    fn load_history(&self) -> Result<Vec<LoadedRecord>> {
        let records = self.load_where(true)?;
        debug!(count = records.len(), "loaded history records");
        Ok(records)
    }

    fn last_job_id(&self) -> Result<Option<JobId>> {
        let last: i64 = self
            .conn
            .query_row(
                "SELECT MAX(
                    COALESCE((SELECT value FROM meta WHERE key = ?1), 0),
                    COALESCE((SELECT MAX(id) FROM jobs WHERE id <= 4294967295), 0)
                 )",
                params![LAST_JOB_ID],
                |row| row.get(0),
            )
            .map_err(|e| SpoolError::Database(format!("last job id: {e}")))?;
        Ok(u32::try_from(last).ok().filter(|id| *id > 0).map(JobId))
    }

    fn data_file(&self, id: JobId, index: usize) -> PathBuf {
        self.dir.join(format!("d{:05}-{:03}", id.0, index + 1))
    }

    #[instrument(skip(self, source), fields(job_id = %id))]
    fn import_data_file(&self, id: JobId, index: usize, source: &Path) -> Result<PathBuf> {
        let dest = self.data_file(id, index);
        std::fs::copy(source, &dest)?;
        debug!(job_id = %id, file = %dest.display(), "document spooled");
        Ok(dest)
    }

    fn remove_data_files(&self, id: JobId, count: usize) {
        for index in 0..count {
            let path = self.data_file(id, index);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id = %id, file = %path.display(), error = %e, "failed to remove data file"),
            }
        }
    }
}

fn decode_record(row: i64, json: &str) -> LoadedRecord {
    match serde_json::from_str::<ControlRecord>(json) {
        Ok(record) if i64::from(record.id) == row => LoadedRecord::Valid(record),
        Ok(record) => LoadedRecord::Malformed {
            row,
            reason: format!("record carries id {}", record.id),
        },
        Err(e) => LoadedRecord::Malformed {
            row,
            reason: e.to_string(),
        },
    }
}
