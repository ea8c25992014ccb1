// crates/core/src/dispatcher.rs
//! Public submission, query, and cancellation surface.
//!
//! Everything a transport layer (HTTP, CLI) needs: it resolves identity to an
//! `owner_id` and calls in here. Submission validates synchronously and never
//! blocks on execution; every failure after a successful submit lands on the
//! record, observed via `get_status` or the status stream.

use std::future::Future;
use std::sync::Arc;

use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use conveyor_types::{JobError, JobId, JobRecord, JobResult, JobStatus, StreamEvent};

use crate::config::OrchestratorConfig;
use crate::executor::{JobExecutor, ProgressReporter, WorkResult};
use crate::store::JobStore;
use crate::stream::status_stream;

/// The orchestration facade: owns the store and the executor.
pub struct Dispatcher {
    store: Arc<JobStore>,
    executor: JobExecutor,
    config: OrchestratorConfig,
}

impl Dispatcher {
    /// Build the store and executor. Must be called within a tokio runtime.
    pub fn new(config: OrchestratorConfig) -> Self {
        let store = Arc::new(JobStore::new());
        let executor = JobExecutor::new(Arc::clone(&store), &config);
        Self {
            store,
            executor,
            config,
        }
    }

    /// The underlying store, for wiring status streams or read-only views.
    pub fn store(&self) -> Arc<JobStore> {
        Arc::clone(&self.store)
    }

    /// Validate the payload, create a Pending record, and hand the work
    /// function to the executor. Returns the job id immediately; execution
    /// outcome is observed via `get_status` / `stream`.
    pub fn submit_job<F, Fut>(
        &self,
        owner_id: &str,
        job_type: &str,
        payload: &serde_json::Value,
        work: F,
    ) -> JobResult<JobId>
    where
        F: FnOnce(ProgressReporter, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult> + Send + 'static,
    {
        validate_payload(payload, self.config.max_payload_items)?;
        let id = self.store.create(job_type, owner_id);
        tracing::info!(job_id = %id, job_type, owner_id, "job submitted");
        self.executor.schedule(id, work);
        Ok(id)
    }

    /// Owner-checked read-only snapshot of a job.
    pub fn get_status(&self, id: JobId, requester_id: &str) -> JobResult<JobRecord> {
        let record = self.store.get(id)?;
        if record.owner_id != requester_id {
            return Err(JobError::Forbidden(id));
        }
        Ok(record)
    }

    /// All jobs owned by `owner_id`, newest first.
    pub fn list_jobs(&self, owner_id: &str) -> Vec<JobRecord> {
        self.store.list_by_owner(owner_id)
    }

    /// Cancel a job. A Pending job goes straight to Cancelled; a Running job
    /// only has its token signalled and transitions asynchronously once the
    /// work function observes it (or the grace period forces it). Returns the
    /// record as of this call.
    pub fn cancel_job(&self, id: JobId, requester_id: &str) -> JobResult<JobRecord> {
        let record = self.store.get(id)?;
        if record.owner_id != requester_id {
            return Err(JobError::Forbidden(id));
        }
        if record.status.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                id,
                status: record.status,
            });
        }

        if record.status == JobStatus::Pending {
            match self.store.cancel_pending(id) {
                Ok(cancelled) => {
                    // Unblock the intake queue promptly.
                    self.executor.signal_cancel(id);
                    tracing::info!(job_id = %id, "pending job cancelled");
                    return Ok(cancelled);
                }
                // Raced the executor: the job started between the snapshot
                // above and now. Fall through to the running path.
                Err(JobError::InvalidTransition { .. }) => {}
                Err(err) => return Err(err),
            }
        }

        self.executor.signal_cancel(id);
        tracing::info!(job_id = %id, "cancellation signalled");
        self.store.get(id)
    }

    /// Near-real-time status stream for a job, at the configured interval.
    pub fn stream(&self, id: JobId) -> impl Stream<Item = StreamEvent> {
        status_stream(Arc::clone(&self.store), id, self.config.stream_interval)
    }
}

/// Synchronous submission validation: the payload must be non-empty and its
/// item count must not exceed `max_items`.
fn validate_payload(payload: &serde_json::Value, max_items: usize) -> JobResult<()> {
    let items = payload_items(payload);
    if items == 0 {
        return Err(JobError::validation("payload must not be empty"));
    }
    if items > max_items {
        return Err(JobError::validation(format!(
            "payload has {items} items, maximum is {max_items}"
        )));
    }
    Ok(())
}

/// Item count of a payload: the length of the largest array it contains
/// (arrays of work items may sit at the top level or under a key, e.g.
/// `{"texts": [...]}`), or 1 for a bare non-empty scalar.
fn payload_items(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null => 0,
        serde_json::Value::String(s) => usize::from(!s.is_empty()),
        serde_json::Value::Array(items) => items.len(),
        serde_json::Value::Object(fields) => fields
            .values()
            .map(payload_items)
            .max()
            .unwrap_or(0),
        _ => 1,
    }
}
