use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its run_at time.
    Pending,
    /// Claimed by a worker and executing.
    Running,
    /// Handler returned success.
    Completed,
    /// All attempts exhausted.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Queue name, e.g. "sla-timers".
    pub queue: String,
    /// Stable identifier: caller-chosen for deduplication, UUID otherwise.
    pub id: String,
    /// Handler dispatch tag.
    pub kind: String,
    /// Opaque JSON payload forwarded to the handler.
    pub payload: String,
    pub status: JobStatus,
    /// ISO-8601 timestamp of the planned execution.
    pub run_at: String,
    /// Completed delivery attempts so far.
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Job {
    /// Deserialize the payload into a typed value.
    pub fn parse_payload<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Options for [`crate::QueueHandle::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Delay before the job becomes due. Zero means "as soon as possible".
    pub delay_ms: u64,
    /// Stable job id for deduplication and cancellation.
    pub job_id: Option<String>,
    /// Total delivery attempts before the job is marked failed.
    pub max_attempts: u32,
    /// Base of the exponential retry backoff.
    pub backoff_base_ms: u64,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            job_id: None,
            max_attempts: 3,
            backoff_base_ms: 1_000,
        }
    }
}

impl EnqueueOptions {
    pub fn delayed(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }

    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// SLA timer jobs use a single attempt: a missed check is re-scheduled
    /// by the handler, never retried blindly.
    pub fn single_attempt(mut self) -> Self {
        self.max_attempts = 1;
        self
    }
}

/// Result of an enqueue: either a fresh row, or the live job already
/// registered under the same id. Handlers must tolerate both.
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    Created(Job),
    Existing(Job),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &Job {
        match self {
            EnqueueOutcome::Created(j) | EnqueueOutcome::Existing(j) => j,
        }
    }
}
