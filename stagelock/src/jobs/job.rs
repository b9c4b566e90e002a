//! Job records and submission requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a job.
///
/// `Pending → Running → {Completed, Failed, Cancelled}`, with
/// `Running → Pending` on a retried failure and `Pending → Cancelled` for
/// jobs cancelled before admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a concurrency slot.
    Pending,
    /// Handed to its handler.
    Running,
    /// Finished with a result.
    Completed,
    /// Exhausted its retries.
    Failed,
    /// Cancelled before producing a result.
    Cancelled,
}

impl JobStatus {
    /// Returns true for states no job leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns the lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the last failed attempt of a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler returned an error or panicked.
    Fault,
    /// The handler exceeded the job's deadline.
    Timeout,
}

/// Progress reported by a running handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Percentage in `0..=100`.
    pub percent: u8,
    /// What the handler is doing.
    pub label: String,
}

/// A snapshot of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id.
    pub id: Uuid,
    /// Handler key.
    pub job_type: String,
    /// Current state.
    pub status: JobStatus,
    /// Higher runs first.
    pub priority: i32,
    /// Latest reported progress.
    pub progress: JobProgress,
    /// Retries consumed so far.
    pub retries: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Handler input.
    pub payload: serde_json::Value,
    /// Handler output, set on completion.
    pub result: Option<serde_json::Value>,
    /// Final error message, set when the job failed.
    pub error: Option<String>,
    /// Latest transient note (retry reason, cancellation reason).
    pub message: Option<String>,
    /// How the last failed attempt ended.
    pub failure_kind: Option<FailureKind>,
    /// Whether cancellation was requested.
    pub cancel_requested: bool,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the current or last attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Returns the per-attempt deadline.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Returns true if the job is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns a short subject used in logs and errors.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("job {} ({})", self.id, self.job_type)
    }
}

/// A request to run a job.
///
/// Unset retry budgets and deadlines fall back to the scheduler defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    /// Handler key.
    pub job_type: String,
    /// Higher runs first.
    pub priority: i32,
    /// Handler input.
    pub payload: serde_json::Value,
    /// Retry budget.
    pub max_retries: Option<u32>,
    /// Per-attempt deadline.
    pub timeout: Option<Duration>,
}

impl JobRequest {
    /// Creates a request with priority 0 and a null payload.
    #[must_use]
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            priority: 0,
            payload: serde_json::Value::Null,
            max_retries: None,
            timeout: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the handler input.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Job counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    /// Jobs waiting for a slot.
    pub pending: usize,
    /// Jobs currently running.
    pub running: usize,
    /// Jobs that completed.
    pub completed: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Jobs that were cancelled.
    pub cancelled: usize,
}

impl JobStats {
    /// Total number of jobs tracked.
    #[must_use]
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}
