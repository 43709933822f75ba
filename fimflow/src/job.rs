//! Job identity, status vocabulary, and the records the engine passes
//! around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a job: a random 128-bit token rendered as 32
/// lowercase hex characters.
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh random id.
    pub fn random() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job lifecycle status.
///
/// Transitions: `accepted → running → {successful, failed}`, and
/// `{accepted, running} → dismissed`. Terminal states are immutable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Accepted,
    Running,
    Successful,
    Failed,
    Dismissed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Dismissed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "accepted" => Some(Self::Accepted),
            "running" => Some(Self::Running),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Captured output stream of a job's child process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One job row as stored.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: JobId,
    pub process: String,
    pub status: JobStatus,
    pub submit_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub dismiss_time: Option<DateTime<Utc>>,
    pub child_pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
}

impl JobRecord {
    /// Most recent lifecycle timestamp.
    pub fn updated(&self) -> DateTime<Utc> {
        [self.start_time, self.end_time, self.dismiss_time]
            .into_iter()
            .flatten()
            .fold(self.submit_time, |acc, t| acc.max(t))
    }

    /// The OGC-shaped summary served over HTTP.
    pub fn summary(&self, include_traceback: bool) -> JobSummary {
        let traceback = if include_traceback {
            self.error
                .as_ref()
                .and_then(|e| e.get("traceback"))
                .and_then(|t| t.as_str())
                .map(|t| t.to_string())
        } else {
            None
        };
        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
            process_id: self.process.clone(),
            created: self.submit_time,
            started: self.start_time,
            finished: self.end_time,
            updated: self.updated(),
            exit_code: self.exit_code,
            traceback,
        }
    }
}

/// HTTP job summary document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    #[serde(rename = "jobID")]
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(rename = "processID")]
    pub process_id: String,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}
