// crates/core/src/executor.rs
//! Bounded-concurrency job runner.
//!
//! Jobs enter through an mpsc intake queue consumed by a single loop that
//! acquires a semaphore permit before starting each one, so at most
//! `max_concurrency` jobs run simultaneously and queued jobs start in FIFO
//! order as slots free. The work future runs inside its own spawned task so a
//! panic is caught at the join boundary and recorded on the job instead of
//! taking down the process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use conveyor_types::{JobId, JobStatus};

use crate::config::OrchestratorConfig;
use crate::store::JobStore;

/// What a work function produces: an opaque result payload, or an error
/// message that ends up on the record.
pub type WorkResult = Result<serde_json::Value, String>;

type BoxedWorkFn =
    Box<dyn FnOnce(ProgressReporter, CancellationToken) -> BoxFuture<'static, WorkResult> + Send>;

struct QueuedJob {
    id: JobId,
    work: BoxedWorkFn,
}

/// Handed to each work function for reporting completion progress.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<JobStore>,
    id: JobId,
}

impl ProgressReporter {
    /// Report progress in [0, 100]. Out-of-range and non-monotone values are
    /// clamped or ignored by the store; reports against a job that already
    /// went terminal are silently dropped.
    pub fn report(&self, value: f64) {
        if let Err(err) = self.store.update_progress(self.id, value) {
            tracing::warn!(job_id = %self.id, error = %err, "progress report dropped");
        }
    }
}

type TokenMap = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

/// Runs scheduled work functions asynchronously, driving each job's record
/// through its lifecycle in the store.
pub struct JobExecutor {
    store: Arc<JobStore>,
    queue_tx: mpsc::UnboundedSender<QueuedJob>,
    tokens: TokenMap,
}

impl JobExecutor {
    /// Create the executor and spawn its intake loop. Must be called within
    /// a tokio runtime.
    pub fn new(store: Arc<JobStore>, config: &OrchestratorConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let tokens: TokenMap = Arc::new(Mutex::new(HashMap::new()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        tokio::spawn(intake_loop(
            Arc::clone(&store),
            queue_rx,
            semaphore,
            Arc::clone(&tokens),
            config.cancel_grace,
            config.job_deadline,
        ));
        Self {
            store,
            queue_tx,
            tokens,
        }
    }

    /// Enqueue a job for execution. The record must already exist in the
    /// store. A second schedule for the same id is dropped: each job is
    /// handed to its work function at most once.
    pub fn schedule<F, Fut>(&self, id: JobId, work: F)
    where
        F: FnOnce(ProgressReporter, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult> + Send + 'static,
    {
        {
            let mut tokens = lock_tokens(&self.tokens);
            if tokens.contains_key(&id) {
                tracing::warn!(job_id = %id, "job already scheduled; ignoring duplicate");
                return;
            }
            tokens.insert(id, CancellationToken::new());
        }
        let work: BoxedWorkFn = Box::new(move |reporter, token| Box::pin(work(reporter, token)));
        if self.queue_tx.send(QueuedJob { id, work }).is_err() {
            tracing::error!(job_id = %id, "executor intake loop is gone; job stays pending");
        }
    }

    /// Signal a job's cancellation token. Returns false if the executor no
    /// longer tracks the id (never scheduled, or already finished).
    pub fn signal_cancel(&self, id: JobId) -> bool {
        let tokens = lock_tokens(&self.tokens);
        match tokens.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

fn lock_tokens(tokens: &TokenMap) -> std::sync::MutexGuard<'_, HashMap<JobId, CancellationToken>> {
    tokens.lock().unwrap_or_else(PoisonError::into_inner)
}

fn remove_token(tokens: &TokenMap, id: JobId) {
    lock_tokens(tokens).remove(&id);
}

/// Receive queued jobs in FIFO order, waiting on the semaphore while all
/// slots are busy. Backpressure: saturation queues, never rejects.
async fn intake_loop(
    store: Arc<JobStore>,
    mut queue_rx: mpsc::UnboundedReceiver<QueuedJob>,
    semaphore: Arc<Semaphore>,
    tokens: TokenMap,
    cancel_grace: Duration,
    job_deadline: Option<Duration>,
) {
    while let Some(job) = queue_rx.recv().await {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed while the loop holds it.
            Err(_) => break,
        };

        // A job cancelled while still queued never reaches its work function.
        let still_pending =
            matches!(store.get(job.id), Ok(record) if record.status == JobStatus::Pending);
        if !still_pending {
            remove_token(&tokens, job.id);
            continue;
        }
        let token = lock_tokens(&tokens)
            .get(&job.id)
            .cloned()
            .unwrap_or_default();
        if let Err(err) = store.set_running(job.id) {
            // Lost a race with a cancel that landed after the check above.
            tracing::debug!(job_id = %job.id, error = %err, "job not started");
            remove_token(&tokens, job.id);
            continue;
        }
        tokio::spawn(run_job(
            Arc::clone(&store),
            job,
            token,
            permit,
            cancel_grace,
            job_deadline,
            Arc::clone(&tokens),
        ));
    }
}

enum Outcome {
    Finished(WorkResult),
    Panicked(String),
    Cancelled,
    DeadlineExceeded,
}

async fn run_job(
    store: Arc<JobStore>,
    job: QueuedJob,
    token: CancellationToken,
    permit: OwnedSemaphorePermit,
    cancel_grace: Duration,
    job_deadline: Option<Duration>,
    tokens: TokenMap,
) {
    let id = job.id;
    let reporter = ProgressReporter {
        store: Arc::clone(&store),
        id,
    };
    let mut handle = tokio::spawn((job.work)(reporter, token.clone()));
    let outcome = drive(&mut handle, &token, cancel_grace, job_deadline).await;

    let applied = match outcome {
        Outcome::Finished(Ok(result)) => store.set_result(id, result).map(|_| ()),
        Outcome::Finished(Err(message)) => store.set_error(id, message).map(|_| ()),
        Outcome::Panicked(message) => store.set_error(id, message).map(|_| ()),
        Outcome::Cancelled => store.cancel(id).map(|_| ()),
        Outcome::DeadlineExceeded => store.set_error(id, "deadline exceeded").map(|_| ()),
    };
    if let Err(err) = applied {
        tracing::error!(job_id = %id, error = %err, "failed to record job outcome");
    }
    remove_token(&tokens, id);
    drop(permit);
}

/// Race the work future against cancellation and the optional deadline.
///
/// After a cancel signal the work gets `cancel_grace` to observe the token
/// and return; past that it is aborted. Either way the job ends Cancelled,
/// never Completed. A deadline expiry follows the same path but is recorded
/// as a distinguishable failure.
async fn drive(
    handle: &mut JoinHandle<WorkResult>,
    token: &CancellationToken,
    cancel_grace: Duration,
    job_deadline: Option<Duration>,
) -> Outcome {
    let deadline = async {
        match job_deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    tokio::select! {
        res = &mut *handle => join_outcome(res),
        _ = token.cancelled() => {
            await_grace(handle, cancel_grace).await;
            Outcome::Cancelled
        }
        _ = &mut deadline => {
            token.cancel();
            await_grace(handle, cancel_grace).await;
            Outcome::DeadlineExceeded
        }
    }
}

/// Give the work future `grace` to return after cancellation; abort it if it
/// keeps running past that.
async fn await_grace(handle: &mut JoinHandle<WorkResult>, grace: Duration) {
    if tokio::time::timeout(grace, &mut *handle).await.is_err() {
        handle.abort();
    }
}

fn join_outcome(res: Result<WorkResult, JoinError>) -> Outcome {
    match res {
        Ok(result) => Outcome::Finished(result),
        Err(err) if err.is_panic() => Outcome::Panicked(panic_message(err)),
        Err(err) => Outcome::Panicked(format!("worker task aborted: {err}")),
    }
}

/// Extract the payload of a caught panic; `panic!("boom")` yields "boom".
fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
