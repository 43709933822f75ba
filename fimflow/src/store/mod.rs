//! Durable job store.
//!
//! A single SQLite file holds the job table, captured log chunks, and a
//! metadata table carrying the schema version. All operations are atomic;
//! the connection is serialized behind a mutex so concurrent claimers
//! observe each job at most once.
//!
//! Input validation (unknown process, invalid input) happens in the process
//! registry before `enqueue` is reached; the store records whatever it is
//! given.

use crate::job::{JobId, JobRecord, JobStatus, LogStream};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;

const SCHEMA_VERSION: i64 = 1;

/// Capacity of the dismissal broadcast channel.
const CANCEL_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid transition for job {job_id}: {from} cannot become {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Outcome of a dismissal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissOutcome {
    /// Job had not started; no child exists.
    WasAccepted,
    /// Job was running; a cancellation signal was published.
    WasRunning,
    /// Job was already in a terminal state; nothing changed.
    AlreadyTerminal,
}

/// Handle to the job store; cheap to clone.
#[derive(Clone)]
pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
    cancellations: broadcast::Sender<JobId>,
}

impl JobStore {
    /// Opens (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                 job_id TEXT PRIMARY KEY,
                 process TEXT NOT NULL,
                 status TEXT NOT NULL,
                 submit_time TEXT NOT NULL,
                 start_time TEXT,
                 end_time TEXT,
                 dismiss_time TEXT,
                 child_pid INTEGER,
                 exit_code INTEGER,
                 input_json TEXT NOT NULL,
                 result_json TEXT,
                 error_json TEXT
             );
             CREATE TABLE IF NOT EXISTS job_logs (
                 job_id TEXT NOT NULL,
                 stream TEXT NOT NULL,
                 chunk_index INTEGER NOT NULL,
                 text TEXT NOT NULL,
                 PRIMARY KEY (job_id, stream, chunk_index)
             );
             CREATE TABLE IF NOT EXISTS metadata (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO metadata (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        let (cancellations, _) = broadcast::channel(CANCEL_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cancellations,
        })
    }

    /// Subscribes to dismissal signals for running jobs.
    pub fn subscribe_cancellations(&self) -> broadcast::Receiver<JobId> {
        self.cancellations.subscribe()
    }

    /// Inserts a new job in state `accepted` and returns its id.
    pub fn enqueue(&self, process: &str, input: &serde_json::Value) -> Result<JobId, StoreError> {
        let job_id = JobId::random();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (job_id, process, status, submit_time, input_json)
             VALUES (?1, ?2, 'accepted', ?3, ?4)",
            params![
                job_id.as_str(),
                process,
                Utc::now().to_rfc3339(),
                input.to_string()
            ],
        )?;
        Ok(job_id)
    }

    /// Claims the oldest `accepted` job, transitioning it to `running`.
    ///
    /// Returns `None` when nothing is claimable. The transaction guarantees
    /// at-most-once delivery across workers.
    pub fn claim(&self, _worker_id: usize) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let candidate: Option<String> = tx
            .query_row(
                "SELECT job_id FROM jobs WHERE status = 'accepted'
                 ORDER BY submit_time, rowid LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(job_id) = candidate else {
            return Ok(None);
        };
        let changed = tx.execute(
            "UPDATE jobs SET status = 'running' WHERE job_id = ?1 AND status = 'accepted'",
            params![job_id],
        )?;
        if changed != 1 {
            tx.rollback()?;
            return Ok(None);
        }
        let record = read_job(&tx, &job_id)?;
        tx.commit()?;
        Ok(record)
    }

    /// Records the child pid and start time of a claimed job.
    pub fn mark_started(&self, job_id: &JobId, pid: u32) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET child_pid = ?2, start_time = ?3
             WHERE job_id = ?1 AND status = 'running'",
            params![job_id.as_str(), pid, Utc::now().to_rfc3339()],
        )?;
        if changed != 1 {
            return Err(self.transition_error(&conn, job_id, JobStatus::Running));
        }
        Ok(())
    }

    /// Appends one captured log chunk.
    pub fn append_log(
        &self,
        job_id: &JobId,
        stream: LogStream,
        text: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_logs (job_id, stream, chunk_index, text)
             SELECT ?1, ?2, COALESCE(MAX(chunk_index) + 1, 0), ?3
             FROM job_logs WHERE job_id = ?1 AND stream = ?2",
            params![job_id.as_str(), stream.as_str(), text],
        )?;
        Ok(())
    }

    /// Captured log text of one stream, in append order.
    pub fn read_logs(&self, job_id: &JobId, stream: LogStream) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT text FROM job_logs WHERE job_id = ?1 AND stream = ?2 ORDER BY chunk_index",
        )?;
        let chunks = stmt
            .query_map(params![job_id.as_str(), stream.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    /// Transitions `running → successful | failed`, recording the end time
    /// and documents.
    pub fn complete(
        &self,
        job_id: &JobId,
        exit_code: i32,
        result: Option<&serde_json::Value>,
        error: Option<&serde_json::Value>,
    ) -> Result<(), StoreError> {
        let status = if exit_code == 0 && error.is_none() {
            JobStatus::Successful
        } else {
            JobStatus::Failed
        };
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, exit_code = ?3, end_time = ?4,
                             result_json = ?5, error_json = ?6
             WHERE job_id = ?1 AND status = 'running'",
            params![
                job_id.as_str(),
                status.as_str(),
                exit_code,
                Utc::now().to_rfc3339(),
                result.map(|v| v.to_string()),
                error.map(|v| v.to_string()),
            ],
        )?;
        if changed != 1 {
            return Err(self.transition_error(&conn, job_id, status));
        }
        Ok(())
    }

    /// Transitions `accepted | running → dismissed`.
    ///
    /// For a running job, publishes the id on the cancellation channel and
    /// returns without waiting for the child. Dismissing a terminal job is a
    /// no-op reported as [`DismissOutcome::AlreadyTerminal`].
    pub fn dismiss(&self, job_id: &JobId) -> Result<DismissOutcome, StoreError> {
        let previous = {
            let conn = self.conn.lock().unwrap();
            let tx = conn.unchecked_transaction()?;
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM jobs WHERE job_id = ?1",
                    params![job_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(status) = status else {
                return Err(StoreError::NotFound(job_id.clone()));
            };
            let status = JobStatus::parse(&status).unwrap_or(JobStatus::Failed);
            if status.is_terminal() {
                return Ok(DismissOutcome::AlreadyTerminal);
            }
            tx.execute(
                "UPDATE jobs SET status = 'dismissed', dismiss_time = ?2,
                                 end_time = COALESCE(end_time, ?2)
                 WHERE job_id = ?1",
                params![job_id.as_str(), Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            status
        };
        match previous {
            JobStatus::Accepted => Ok(DismissOutcome::WasAccepted),
            JobStatus::Running => {
                let _ = self.cancellations.send(job_id.clone());
                Ok(DismissOutcome::WasRunning)
            }
            _ => Ok(DismissOutcome::AlreadyTerminal),
        }
    }

    /// Records the exit code and error document of a dismissed job once its
    /// child has terminated.
    pub fn record_dismissal_exit(
        &self,
        job_id: &JobId,
        exit_code: i32,
        error: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET exit_code = ?2, error_json = ?3, end_time = ?4
             WHERE job_id = ?1 AND status = 'dismissed'",
            params![
                job_id.as_str(),
                exit_code,
                error.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        read_job(&conn, job_id.as_str())
    }

    /// All jobs, most recently updated first.
    pub fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT job_id FROM jobs ORDER BY submit_time DESC, rowid DESC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = read_job(&conn, &id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn transition_error(
        &self,
        conn: &Connection,
        job_id: &JobId,
        to: JobStatus,
    ) -> StoreError {
        let from: Option<String> = conn
            .query_row(
                "SELECT status FROM jobs WHERE job_id = ?1",
                params![job_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();
        match from.and_then(|s| JobStatus::parse(&s)) {
            Some(from) => StoreError::InvalidTransition {
                job_id: job_id.clone(),
                from,
                to,
            },
            None => StoreError::NotFound(job_id.clone()),
        }
    }
}

fn read_job(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
    let record = conn
        .query_row(
            "SELECT job_id, process, status, submit_time, start_time, end_time,
                    dismiss_time, child_pid, exit_code, input_json, result_json, error_json
             FROM jobs WHERE job_id = ?1",
            params![job_id],
            |row| {
                Ok(RawJob {
                    job_id: row.get(0)?,
                    process: row.get(1)?,
                    status: row.get(2)?,
                    submit_time: row.get(3)?,
                    start_time: row.get(4)?,
                    end_time: row.get(5)?,
                    dismiss_time: row.get(6)?,
                    child_pid: row.get(7)?,
                    exit_code: row.get(8)?,
                    input_json: row.get(9)?,
                    result_json: row.get(10)?,
                    error_json: row.get(11)?,
                })
            },
        )
        .optional()?;
    Ok(record.map(RawJob::into_record))
}

struct RawJob {
    job_id: String,
    process: String,
    status: String,
    submit_time: String,
    start_time: Option<String>,
    end_time: Option<String>,
    dismiss_time: Option<String>,
    child_pid: Option<u32>,
    exit_code: Option<i32>,
    input_json: String,
    result_json: Option<String>,
    error_json: Option<String>,
}

impl RawJob {
    fn into_record(self) -> JobRecord {
        JobRecord {
            job_id: JobId::new(self.job_id),
            process: self.process,
            status: JobStatus::parse(&self.status).unwrap_or(JobStatus::Failed),
            submit_time: parse_time(&self.submit_time),
            start_time: self.start_time.as_deref().map(parse_time),
            end_time: self.end_time.as_deref().map(parse_time),
            dismiss_time: self.dismiss_time.as_deref().map(parse_time),
            child_pid: self.child_pid,
            exit_code: self.exit_code,
            input: serde_json::from_str(&self.input_json).unwrap_or(serde_json::Value::Null),
            result: self
                .result_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            error: self
                .error_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
        }
    }
}

fn parse_time(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
