use thiserror::Error;

/// Errors surfaced at the scheduler's registration boundary.
///
/// Runtime coordination failures never appear here — once a task is
/// scheduled, lock and store errors are logged and converted into skipped
/// firings so a store outage cannot terminate the owning process.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("coordination store error: {0}")]
    Coordination(String),

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCronExpression { expr: String, reason: String },

    #[error("scheduler is shut down, task not accepted")]
    ShutDown,
}
