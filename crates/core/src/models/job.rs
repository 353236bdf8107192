//! Background job models (directory scans and friends)

use crate::types::Progress;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a server-side job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Position in the forward-only lifecycle. All terminal states share a rank.
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 2,
        }
    }

    /// Map a status string as reported by the backend.
    ///
    /// The job queue reports `complete` and `timeout`, the client-facing
    /// schema uses `completed`; both spellings are accepted.
    pub fn from_wire(raw: &str) -> Option<(JobStatus, Option<&'static str>)> {
        let status = match raw.to_ascii_lowercase().as_str() {
            "pending" | "queued" => (JobStatus::Pending, None),
            "running" => (JobStatus::Running, None),
            "complete" | "completed" => (JobStatus::Completed, None),
            "failed" => (JobStatus::Failed, None),
            "timeout" => (JobStatus::Failed, Some("job timed out")),
            "cancelled" | "canceled" => (JobStatus::Cancelled, None),
            _ => return None,
        };
        Some(status)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Response returned when a job is submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmitResponse {
    pub job_id: String,
}

/// Request body for `POST /api/v1/videos/scan`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub path: String,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_recursive() -> bool {
    true
}

/// Raw status payload as it arrives on the wire
#[derive(Debug, Deserialize)]
struct RawJobSnapshot {
    job_id: String,
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// One server-reported observation of a job (`GET /api/v1/jobs/{id}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawJobSnapshot")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: Option<Progress>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            progress: None,
            result: None,
            error: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Progress::new(progress);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl TryFrom<RawJobSnapshot> for JobSnapshot {
    type Error = String;

    fn try_from(raw: RawJobSnapshot) -> std::result::Result<Self, Self::Error> {
        let (status, implied_error) = JobStatus::from_wire(&raw.status)
            .ok_or_else(|| format!("unknown job status '{}'", raw.status))?;

        Ok(Self {
            job_id: raw.job_id,
            status,
            progress: raw.progress.and_then(Progress::new),
            result: raw.result,
            error: raw.error.or_else(|| implied_error.map(str::to_string)),
        })
    }
}

/// Outcome of applying a snapshot to a tracked job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobUpdate {
    /// The job was already terminal; nothing changed
    Ignored,
    /// Progress and/or a non-terminal status changed
    Updated,
    /// The job just reached a terminal status
    Terminal(JobStatus),
}

/// Locally tracked view of a submitted job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: Option<Progress>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            progress: None,
            result: None,
            error: None,
        }
    }

    /// Apply a server snapshot.
    ///
    /// Status only moves forward; a stale `pending` after `running` keeps the
    /// job running. Terminal jobs are frozen. Progress is taken from every
    /// snapshot applied to a live job.
    pub fn apply(&mut self, snapshot: &JobSnapshot) -> JobUpdate {
        if self.status.is_terminal() {
            return JobUpdate::Ignored;
        }

        self.progress = snapshot.progress;

        if snapshot.status.rank() <= self.status.rank() {
            return JobUpdate::Updated;
        }

        self.status = snapshot.status;
        match snapshot.status {
            JobStatus::Completed => {
                self.result = snapshot.result.clone();
            }
            JobStatus::Failed => {
                self.error = Some(
                    snapshot
                        .error
                        .clone()
                        .unwrap_or_else(|| "job failed".to_string()),
                );
            }
            JobStatus::Cancelled => {
                self.error = snapshot.error.clone();
            }
            JobStatus::Pending | JobStatus::Running => return JobUpdate::Updated,
        }

        JobUpdate::Terminal(self.status)
    }
}
