// crates/core/src/config.rs
//! Orchestrator tuning knobs.

use std::time::Duration;

/// Configuration for the orchestration core.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of jobs Running simultaneously (`K`). Excess
    /// submissions stay Pending and start FIFO as slots free.
    pub max_concurrency: usize,
    /// How long a cancelled job gets to observe its token and return before
    /// the executor aborts it and marks it Cancelled anyway.
    pub cancel_grace: Duration,
    /// Minimum interval between `update` emissions on a status stream.
    pub stream_interval: Duration,
    /// Maximum item count accepted in a submission payload.
    pub max_payload_items: usize,
    /// Optional wall-clock deadline per job. Expiry is treated as an
    /// externally-triggered cancellation and recorded as a Failed job with a
    /// "deadline exceeded" error.
    pub job_deadline: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            cancel_grace: Duration::from_secs(5),
            stream_interval: Duration::from_millis(250),
            max_payload_items: 32,
            job_deadline: None,
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from `CONVEYOR_*` environment variables, falling back
    /// to defaults for anything absent. Unparseable values are logged and
    /// ignored rather than failing startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = read_env_parsed::<usize>("CONVEYOR_MAX_CONCURRENCY") {
            config.max_concurrency = v.max(1);
        }
        if let Some(v) = read_env_parsed::<u64>("CONVEYOR_CANCEL_GRACE_MS") {
            config.cancel_grace = Duration::from_millis(v);
        }
        if let Some(v) = read_env_parsed::<u64>("CONVEYOR_STREAM_INTERVAL_MS") {
            config.stream_interval = Duration::from_millis(v);
        }
        if let Some(v) = read_env_parsed::<usize>("CONVEYOR_MAX_PAYLOAD_ITEMS") {
            config.max_payload_items = v;
        }
        if let Some(v) = read_env_parsed::<u64>("CONVEYOR_JOB_DEADLINE_MS") {
            config.job_deadline = Some(Duration::from_millis(v));
        }
        config
    }
}

fn read_env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable env var");
            None
        }
    }
}
