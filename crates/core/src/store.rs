// crates/core/src/store.rs
//! Concurrency-safe registry of job records; the single source of truth.
//!
//! All mutation routes through this API. Every write validates the status
//! state machine under the lock, and every successful mutation broadcasts a
//! post-mutation snapshot to per-job subscribers after the lock is released,
//! so readers and stream observers only ever see whole records.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tokio::sync::broadcast;

use conveyor_types::{JobError, JobId, JobRecord, JobResult, JobStatus};

/// Capacity of each per-job notification channel. Subscribers that lag are
/// fine: they re-read the full snapshot from the store, the channel only
/// signals "something changed".
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

struct JobEntry {
    record: JobRecord,
    notify_tx: broadcast::Sender<JobRecord>,
}

/// In-memory job registry. Thread-safe via an internal `RwLock`; wrap in an
/// `Arc` to share across tasks.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a fresh Pending record and return its id.
    pub fn create(&self, job_type: impl Into<String>, owner_id: impl Into<String>) -> JobId {
        let record = JobRecord::new(job_type, owner_id);
        let id = record.id;
        let (notify_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        let mut jobs = self.write_jobs();
        jobs.insert(id, JobEntry { record, notify_tx });
        id
    }

    /// Snapshot of the record for `id`.
    pub fn get(&self, id: JobId) -> JobResult<JobRecord> {
        let jobs = self.read_jobs();
        jobs.get(&id)
            .map(|entry| entry.record.clone())
            .ok_or(JobError::NotFound(id))
    }

    /// Validated Pending→Running transition; stamps `started_at`.
    pub fn set_running(&self, id: JobId) -> JobResult<JobRecord> {
        self.transition(id, JobStatus::Running, |record| {
            record.started_at = Some(Utc::now());
        })
    }

    /// Atomic Running→Completed carrying the result payload.
    pub fn set_result(&self, id: JobId, result: serde_json::Value) -> JobResult<JobRecord> {
        self.transition(id, JobStatus::Completed, |record| {
            record.result = Some(result);
            record.progress = 100.0;
        })
    }

    /// Atomic Running→Failed carrying the error message.
    pub fn set_error(&self, id: JobId, error: impl Into<String>) -> JobResult<JobRecord> {
        let error = error.into();
        self.transition(id, JobStatus::Failed, |record| {
            record.error = Some(error);
        })
    }

    /// Cancel a Pending or Running job. Fails `AlreadyTerminal` otherwise.
    pub fn cancel(&self, id: JobId) -> JobResult<JobRecord> {
        self.transition(id, JobStatus::Cancelled, |_| {})
    }

    /// Pending→Cancelled only. A job that already started fails
    /// `InvalidTransition`, so callers can fall back to cooperative
    /// cancellation instead of freezing a record whose work is still running.
    pub fn cancel_pending(&self, id: JobId) -> JobResult<JobRecord> {
        let (snapshot, notify_tx) = {
            let mut jobs = self.write_jobs();
            let entry = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
            let current = entry.record.status;
            if current.is_terminal() {
                return Err(JobError::AlreadyTerminal {
                    id,
                    status: current,
                });
            }
            if current != JobStatus::Pending {
                return Err(JobError::InvalidTransition {
                    from: current,
                    to: JobStatus::Cancelled,
                });
            }
            entry.record.status = JobStatus::Cancelled;
            entry.record.completed_at = Some(Utc::now());
            (entry.record.clone(), entry.notify_tx.clone())
        };
        let _ = notify_tx.send(snapshot.clone());
        Ok(snapshot)
    }

    /// Update progress, clamped to [0, 100] and monotone: a value below the
    /// current progress is ignored. A no-op (not an error) on terminal jobs.
    pub fn update_progress(&self, id: JobId, value: f64) -> JobResult<()> {
        let snapshot = {
            let mut jobs = self.write_jobs();
            let entry = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
            if entry.record.status.is_terminal() {
                return Ok(());
            }
            let clamped = value.clamp(0.0, 100.0);
            if clamped <= entry.record.progress {
                return Ok(());
            }
            entry.record.progress = clamped;
            (entry.record.clone(), entry.notify_tx.clone())
        };
        let _ = snapshot.1.send(snapshot.0);
        Ok(())
    }

    /// All records owned by `owner_id`, newest first.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<JobRecord> {
        let jobs = self.read_jobs();
        let mut records: Vec<JobRecord> = jobs
            .values()
            .filter(|entry| entry.record.owner_id == owner_id)
            .map(|entry| entry.record.clone())
            .collect();
        // created_at descending; ulid as tiebreak for records created within
        // the same timestamp tick.
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        records
    }

    /// Subscribe to change notifications for one job. Each message is a full
    /// post-mutation snapshot.
    pub fn subscribe(&self, id: JobId) -> JobResult<broadcast::Receiver<JobRecord>> {
        let jobs = self.read_jobs();
        jobs.get(&id)
            .map(|entry| entry.notify_tx.subscribe())
            .ok_or(JobError::NotFound(id))
    }

    /// Apply a validated status transition plus extra field edits, then
    /// broadcast the new snapshot. Terminal records are frozen: any attempt
    /// to move out of one fails `AlreadyTerminal`.
    fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        apply: impl FnOnce(&mut JobRecord),
    ) -> JobResult<JobRecord> {
        let (snapshot, notify_tx) = {
            let mut jobs = self.write_jobs();
            let entry = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
            let current = entry.record.status;
            if current.is_terminal() {
                return Err(JobError::AlreadyTerminal {
                    id,
                    status: current,
                });
            }
            if !current.can_transition_to(next) {
                return Err(JobError::InvalidTransition {
                    from: current,
                    to: next,
                });
            }
            entry.record.status = next;
            if next.is_terminal() {
                entry.record.completed_at = Some(Utc::now());
            }
            apply(&mut entry.record);
            (entry.record.clone(), entry.notify_tx.clone())
        };
        // Send outside the lock; no subscribers is fine.
        let _ = notify_tx.send(snapshot.clone());
        Ok(snapshot)
    }

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.read().unwrap_or_else(|poisoned| {
            tracing::error!("jobs map read lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, JobEntry>> {
        self.jobs.write().unwrap_or_else(|poisoned| {
            tracing::error!("jobs map write lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
