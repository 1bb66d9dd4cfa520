/// Error returned by an agent executor for a single prompt.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor failed: {0}")]
    Failed(String),

    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

/// Why a task reached the Failed state. Stored as the task's outcome and
/// returned inside a join's result map; a failed task never turns a join
/// into an error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    #[error("executor error: {0}")]
    Executor(String),

    #[error("task cancelled")]
    Cancelled,
}

impl From<ExecutorError> for TaskFailure {
    fn from(err: ExecutorError) -> Self {
        Self::Executor(err.to_string())
    }
}

/// Errors from scheduler bookkeeping itself (not from task execution).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("a task labeled '{0}' is already active")]
    DuplicateLabel(String),

    #[error("unknown or already consumed task: {0}")]
    UnknownTask(String),

    #[error("task '{0}' was already scheduled")]
    AlreadyScheduled(String),
}
