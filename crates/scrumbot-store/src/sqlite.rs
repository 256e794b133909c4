//! SQLite-backed job and run store.
//! One row per job and per run; structured fields (channel, members,
//! responses) are stored as JSON text.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use scrumbot_core::error::{Result, ScrumError};
use scrumbot_core::traits::JobStore;
use scrumbot_core::types::{ChannelRef, JobConfig, MemberResponse, RunRecord};

const JOB_COLUMNS: &str = "group_id, job_id, team_name, local_start_time, time_zone_id, \
     utc_hour_bucket, weekdays_only, active, channel, fallback_channel, members, created_at, updated_at";

const RUN_COLUMNS: &str = "run_id, group_id, job_id, started_at, completed, closed_at, \
     message_id, channel, members, responses";

/// SQLite persistence for jobs and runs.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: impl std::fmt::Display) -> ScrumError {
    ScrumError::Store(e.to_string())
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        tracing::debug!("🗄️ Job store opened at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(db_err)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS scrum_jobs (
                group_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                team_name TEXT NOT NULL,
                local_start_time TEXT NOT NULL,
                time_zone_id TEXT NOT NULL,
                utc_hour_bucket INTEGER NOT NULL,
                weekdays_only INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                channel TEXT NOT NULL,           -- JSON ChannelRef
                fallback_channel TEXT,           -- JSON ChannelRef
                members TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (group_id, job_id)
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_bucket ON scrum_jobs (utc_hour_bucket, active);

            CREATE TABLE IF NOT EXISTS scrum_runs (
                run_id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                started_at_ms INTEGER NOT NULL,  -- for range deletes
                completed INTEGER NOT NULL DEFAULT 0,
                closed_at TEXT,
                message_id TEXT,
                channel TEXT NOT NULL,
                members TEXT NOT NULL DEFAULT '[]',
                responses TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_runs_open ON scrum_runs (group_id, job_id, completed);
            CREATE INDEX IF NOT EXISTS idx_runs_started ON scrum_runs (started_at_ms);
            ",
            )
            .map_err(|e| ScrumError::Store(format!("Migration: {e}")))
    }
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(&raw, idx)
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_time(&s, idx)).transpose()
}

fn parse_time(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobConfig> {
    let fallback: Option<String> = row.get(9)?;
    let fallback_channel = fallback
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))
        })
        .transpose()?;
    Ok(JobConfig {
        group_id: row.get(0)?,
        job_id: row.get(1)?,
        team_name: row.get(2)?,
        local_start_time: row.get(3)?,
        time_zone_id: row.get(4)?,
        utc_hour_bucket: row.get(5)?,
        weekdays_only: row.get::<_, i32>(6)? != 0,
        active: row.get::<_, i32>(7)? != 0,
        channel: json_col(row, 8)?,
        fallback_channel,
        members: json_col(row, 10)?,
        created_at: time_col(row, 11)?,
        updated_at: time_col(row, 12)?,
    })
}

fn select_run(conn: &Connection, run_id: &str) -> Result<Option<RunRecord>> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM scrum_runs WHERE run_id = ?1"),
        [run_id],
        run_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        run_id: row.get(0)?,
        group_id: row.get(1)?,
        job_id: row.get(2)?,
        started_at: time_col(row, 3)?,
        completed: row.get::<_, i32>(4)? != 0,
        closed_at: opt_time_col(row, 5)?,
        message_id: row.get(6)?,
        channel: json_col(row, 7)?,
        members: json_col(row, 8)?,
        responses: json_col(row, 9)?,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn query_active_by_bucket(&self, buckets: &[u8]) -> Result<Vec<JobConfig>> {
        if buckets.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; buckets.len()].join(", ");
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM scrum_jobs \
             WHERE active = 1 AND utc_hour_bucket IN ({placeholders}) ORDER BY group_id, job_id"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(buckets.iter()), job_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    async fn list_jobs(&self, group_id: &str) -> Result<Vec<JobConfig>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM scrum_jobs WHERE group_id = ?1 ORDER BY job_id"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([group_id], job_from_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    async fn get_job(&self, group_id: &str, job_id: &str) -> Result<Option<JobConfig>> {
        self.conn()?
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM scrum_jobs WHERE group_id = ?1 AND job_id = ?2"),
                params![group_id, job_id],
                job_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    async fn save_job(&self, job: &JobConfig) -> Result<()> {
        let fallback = job
            .fallback_channel
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()?
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO scrum_jobs ({JOB_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    job.group_id,
                    job.job_id,
                    job.team_name,
                    job.local_start_time,
                    job.time_zone_id,
                    job.utc_hour_bucket,
                    job.weekdays_only as i32,
                    job.active as i32,
                    serde_json::to_string(&job.channel)?,
                    fallback,
                    serde_json::to_string(&job.members)?,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| ScrumError::Store(format!("Save job: {e}")))?;
        Ok(())
    }

    async fn delete_job(&self, group_id: &str, job_id: &str) -> Result<bool> {
        let n = self
            .conn()?
            .execute(
                "DELETE FROM scrum_jobs WHERE group_id = ?1 AND job_id = ?2",
                params![group_id, job_id],
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    async fn get_open_runs(&self, group_id: &str, job_id: &str) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM scrum_runs \
                 WHERE group_id = ?1 AND job_id = ?2 AND completed = 0 ORDER BY started_at_ms"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![group_id, job_id], run_from_row)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.conn()?;
        select_run(&conn, run_id)
    }

    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO scrum_runs \
                 (run_id, group_id, job_id, started_at, started_at_ms, completed, closed_at, \
                  message_id, channel, members, responses) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    run.run_id,
                    run.group_id,
                    run.job_id,
                    run.started_at.to_rfc3339(),
                    run.started_at.timestamp_millis(),
                    run.completed as i32,
                    run.closed_at.map(|t| t.to_rfc3339()),
                    run.message_id,
                    serde_json::to_string(&run.channel)?,
                    serde_json::to_string(&run.members)?,
                    serde_json::to_string(&run.responses)?,
                ],
            )
            .map_err(|e| ScrumError::Store(format!("Save run: {e}")))?;
        Ok(())
    }

    async fn close_run_if_open(&self, run_id: &str, closed_at: DateTime<Utc>) -> Result<Option<RunRecord>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let changed = tx
            .execute(
                "UPDATE scrum_runs SET completed = 1, closed_at = ?1 WHERE run_id = ?2 AND completed = 0",
                params![closed_at.to_rfc3339(), run_id],
            )
            .map_err(|e| ScrumError::Store(format!("Close run: {e}")))?;
        let run = select_run(&tx, run_id)?.ok_or_else(|| ScrumError::NotFound(format!("run {run_id}")))?;
        tx.commit().map_err(db_err)?;
        Ok((changed > 0).then_some(run))
    }

    async fn add_response_if_open(&self, run_id: &str, response: &MemberResponse) -> Result<RunRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut run = select_run(&tx, run_id)?.ok_or_else(|| ScrumError::NotFound(format!("run {run_id}")))?;
        if run.completed {
            return Err(ScrumError::RunClosed(run_id.to_string()));
        }
        run.responses.insert(response.member.clone(), response.clone());
        tx.execute(
            "UPDATE scrum_runs SET responses = ?1 WHERE run_id = ?2 AND completed = 0",
            params![serde_json::to_string(&run.responses)?, run_id],
        )
        .map_err(|e| ScrumError::Store(format!("Save response: {e}")))?;
        tx.commit().map_err(db_err)?;
        Ok(run)
    }

    async fn set_run_delivery(
        &self,
        run_id: &str,
        channel: &ChannelRef,
        message_id: Option<&str>,
    ) -> Result<()> {
        let n = self
            .conn()?
            .execute(
                "UPDATE scrum_runs SET channel = ?1, message_id = ?2 WHERE run_id = ?3",
                params![serde_json::to_string(channel)?, message_id, run_id],
            )
            .map_err(|e| ScrumError::Store(format!("Save delivery: {e}")))?;
        if n == 0 {
            return Err(ScrumError::NotFound(format!("run {run_id}")));
        }
        Ok(())
    }

    async fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.conn()?
            .execute(
                "DELETE FROM scrum_runs WHERE started_at_ms < ?1",
                [cutoff.timestamp_millis()],
            )
            .map_err(db_err)
    }
}
