// crates/core/src/lib.rs
//! In-process asynchronous job orchestration: a concurrency-safe job store,
//! a bounded executor for caller-supplied work functions, a submission and
//! cancellation surface, and per-job status streaming.

pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod store;
pub mod stream;

pub use config::OrchestratorConfig;
pub use dispatcher::Dispatcher;
pub use executor::{JobExecutor, ProgressReporter, WorkResult};
pub use store::JobStore;
pub use stream::status_stream;

pub use conveyor_types::{JobError, JobId, JobRecord, JobResult, JobStatus, StreamEvent};
