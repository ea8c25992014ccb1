// crates/types/src/job.rs
//! Core types for tracked asynchronous jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique identifier for a job. Opaque to callers; ulids sort by creation
/// time, which `list_by_owner` relies on for tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_str(s)?))
    }
}

/// Status of a job within its lifecycle state machine.
///
/// Legal transitions: Pending→Running, Pending→Cancelled,
/// Running→{Completed, Failed, Cancelled}. The three terminal states have no
/// outgoing edges.
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
    /// Whether this status has no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The full state of one tracked unit of asynchronous work.
///
/// Invariants (enforced by the store, not by this struct):
/// - `progress` stays within [0, 100] and never decreases while Running.
/// - `result` is set iff `status == Completed`; `error` iff `Failed`.
/// - Once terminal, no field mutates again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub owner_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    /// A fresh Pending record, as created at submission time.
    pub fn new(job_type: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            owner_id: owner_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            result: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_illegal_transitions() {
        // No backward moves, no skipping Pending→Completed, nothing out of
        // a terminal state.
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for next in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_job_ids_unique_and_sortable() {
        let a = JobId::new();
        // Ulid ordering follows the timestamp component; within the same
        // millisecond the random tail decides, so force a later tick.
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = JobId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = JobRecord::new("batch_predict", "user-1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["jobType"], "batch_predict");
        assert_eq!(json["ownerId"], "user-1");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["progress"], 0.0);
        // Unset optionals are omitted entirely.
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
        assert!(json.get("startedAt").is_none());
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = JobRecord::new("export", "owner-a");
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.progress, 0.0);
        assert!(record.started_at.is_none());
        assert!(record.completed_at.is_none());
    }
}
