// crates/types/src/error.rs
use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// Errors surfaced synchronously by the orchestration API.
///
/// Failures that happen after a successful submission (worker errors, panics,
/// deadline expiry) are never raised through this type; they are recorded on
/// the `JobRecord` and observed via `get_status` or the status stream.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("requester does not own job {0}")]
    Forbidden(JobId),

    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job {id} is already terminal ({status})")]
    AlreadyTerminal { id: JobId, status: JobStatus },
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result type alias for orchestration operations.
pub type JobResult<T> = Result<T, JobError>;
