// crates/types/src/events.rs
//! Events emitted by a job status stream.

use serde::{Deserialize, Serialize};

use crate::job::{JobRecord, JobStatus};

/// One event on a per-job status stream, SSE-shaped: `update` while the job
/// makes progress, exactly one `complete` when it reaches a terminal state,
/// or a single `error` if the stream was opened against an unknown id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Update { status: JobStatus, progress: f64 },
    #[serde(rename_all = "camelCase")]
    Complete {
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

impl StreamEvent {
    /// An `update` snapshot of the given record.
    pub fn update(record: &JobRecord) -> Self {
        Self::Update {
            status: record.status,
            progress: record.progress,
        }
    }

    /// The terminal `complete` event for the given record.
    pub fn complete(record: &JobRecord) -> Self {
        Self::Complete {
            status: record.status,
            result: record.result.clone(),
            error: record.error.clone(),
        }
    }
}
