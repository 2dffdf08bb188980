use crate::error::{CompressionError, ErrorKind};
use crate::utils::calculate_compression_ratio;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

pub type JobId = usize;

/// Lifecycle of a job: `Pending -> Processing -> {Done | Failed}`, or
/// `Pending -> Cancelled` for work that never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Done)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Why a job failed, kept as plain data so jobs stay cheap to copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&CompressionError> for JobFailure {
    fn from(err: &CompressionError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One input file and everything known about its compression.
///
/// Observers only ever see copies; the pipeline owns the canonical value.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub path: PathBuf,
    /// Where the result was placed, once the job is done.
    pub destination: Option<PathBuf>,
    pub original_size: u64,
    pub compressed_size: u64,
    /// Negative when the result came out larger than the input.
    pub saved_bytes: i64,
    pub saved_percent: f64,
    pub status: JobStatus,
    pub error: Option<JobFailure>,
}

impl Job {
    pub fn new(id: JobId, path: PathBuf, original_size: u64) -> Self {
        Self {
            id,
            path,
            destination: None,
            original_size,
            compressed_size: 0,
            saved_bytes: 0,
            saved_percent: 0.0,
            status: JobStatus::Pending,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the job forward. Returns `false` and leaves the job untouched
    /// for any move the lifecycle does not allow.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            debug!(
                job = self.id,
                from = %self.status,
                to = %next,
                "Ignoring invalid job transition"
            );
            return false;
        }
        self.status = next;
        true
    }

    pub fn record_success(
        &mut self,
        original_size: u64,
        compressed_size: u64,
        destination: PathBuf,
    ) -> bool {
        if !self.transition(JobStatus::Done) {
            return false;
        }
        self.original_size = original_size;
        self.compressed_size = compressed_size;
        self.saved_bytes = original_size as i64 - compressed_size as i64;
        self.saved_percent = calculate_compression_ratio(original_size, compressed_size);
        self.destination = Some(destination);
        true
    }

    pub fn record_failure(&mut self, err: &CompressionError) -> bool {
        if !self.transition(JobStatus::Failed) {
            return false;
        }
        self.error = Some(JobFailure::from(err));
        true
    }
}
