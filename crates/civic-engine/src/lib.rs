pub mod error;
pub mod executor;
pub mod mock;
pub mod scheduler;

pub use error::{ExecutorError, SchedulerError, TaskFailure};
pub use executor::{from_fn, AgentExecutor};
pub use scheduler::{JoinMode, Scheduler, TaskHandle, TaskOutcome, TaskScope, TaskState};
