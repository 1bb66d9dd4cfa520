//! Task scheduler and join coordinator.
//!
//! `submit` registers a task, `schedule` hands it to the runtime and returns
//! immediately, `join` suspends the caller until the requested subset of
//! tasks is terminal. Waiting is cooperative (watch channels), so a joining
//! workflow never stalls its siblings.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use civic_core::ids::TaskId;

use crate::error::{SchedulerError, TaskFailure};
use crate::executor::AgentExecutor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Terminal result of one task: the executor's value, or why it failed.
pub type TaskOutcome = Result<Value, TaskFailure>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinMode {
    /// Wait until every listed task is terminal.
    #[default]
    All,
    /// Wait until at least one listed task is terminal; the rest stay live.
    Any,
}

/// Cheap reference to a submitted task.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    pub id: TaskId,
    pub label: String,
}

struct TaskEntry {
    id: TaskId,
    label: String,
    prompt: String,
    executor: Arc<dyn AgentExecutor>,
    state_tx: watch::Sender<TaskState>,
    outcome: RwLock<Option<TaskOutcome>>,
    cancel: CancellationToken,
}

/// Process-wide task registry. Tasks stay registered until a join consumes
/// them, which keeps orphaned work observable and drainable at shutdown.
/// Cloning is cheap; clones share the registry.
#[derive(Clone)]
pub struct Scheduler {
    tasks: Arc<DashMap<TaskId, Arc<TaskEntry>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Open a run-scoped view with its own label namespace.
    pub fn scope(&self) -> TaskScope {
        TaskScope {
            scheduler: self.clone(),
            labels: Mutex::new(HashSet::new()),
        }
    }

    fn register(
        &self,
        label: String,
        prompt: String,
        executor: Arc<dyn AgentExecutor>,
    ) -> TaskHandle {
        let id = TaskId::new();
        let (state_tx, _) = watch::channel(TaskState::Created);
        let entry = Arc::new(TaskEntry {
            id: id.clone(),
            label: label.clone(),
            prompt,
            executor,
            state_tx,
            outcome: RwLock::new(None),
            cancel: CancellationToken::new(),
        });
        self.tasks.insert(id.clone(), entry);
        TaskHandle { id, label }
    }

    /// Move a task from Created to Scheduled and spawn its execution onto
    /// the runtime. Returns immediately.
    pub fn schedule(&self, handle: &TaskHandle) -> Result<(), SchedulerError> {
        let entry = self
            .tasks
            .get(&handle.id)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| SchedulerError::UnknownTask(handle.label.clone()))?;

        let advanced = entry.state_tx.send_if_modified(|state| {
            if *state == TaskState::Created {
                *state = TaskState::Scheduled;
                true
            } else {
                false
            }
        });
        if !advanced {
            return Err(SchedulerError::AlreadyScheduled(handle.label.clone()));
        }

        tokio::spawn(run_task(entry));
        Ok(())
    }

    /// Suspend until `mode` holds for `handles`, then return a map of
    /// label to terminal outcome. Task failure is data here, never an `Err`:
    /// the caller branches on the failed entries it finds in the map.
    pub async fn join(
        &self,
        handles: &[TaskHandle],
        mode: JoinMode,
    ) -> Result<HashMap<String, TaskOutcome>, SchedulerError> {
        let entries = self.resolve(handles)?;
        if entries.is_empty() {
            return Ok(HashMap::new());
        }

        match mode {
            JoinMode::All => {
                for entry in &entries {
                    wait_terminal(entry).await;
                }
            }
            JoinMode::Any => {
                let waits: Vec<_> = entries
                    .iter()
                    .map(|entry| {
                        let entry = Arc::clone(entry);
                        Box::pin(async move { wait_terminal(&entry).await })
                    })
                    .collect();
                futures::future::select_all(waits).await;
            }
        }

        let mut results = HashMap::new();
        for entry in entries {
            if !entry.state_tx.borrow().is_terminal() {
                // Any-mode: still-running tasks stay live for a later join.
                continue;
            }
            let outcome = entry
                .outcome
                .read()
                .clone()
                .unwrap_or(Err(TaskFailure::Cancelled));
            results.insert(entry.label.clone(), outcome);
            self.tasks.remove(&entry.id);
        }
        Ok(results)
    }

    pub fn state(&self, handle: &TaskHandle) -> Option<TaskState> {
        self.tasks.get(&handle.id).map(|e| *e.state_tx.borrow())
    }

    /// Cancel one task. Returns false when it is unknown or already terminal.
    pub fn abort(&self, handle: &TaskHandle) -> bool {
        match self.tasks.get(&handle.id) {
            Some(entry) if !entry.state_tx.borrow().is_terminal() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel every non-terminal task. Returns how many were signalled.
    pub fn abort_all(&self) -> usize {
        let mut count = 0;
        for entry in self.tasks.iter() {
            if !entry.state_tx.borrow().is_terminal() {
                entry.cancel.cancel();
                count += 1;
            }
        }
        count
    }

    /// Tasks currently registered (not yet consumed by a join).
    pub fn registered_count(&self) -> usize {
        self.tasks.len()
    }

    fn resolve(&self, handles: &[TaskHandle]) -> Result<Vec<Arc<TaskEntry>>, SchedulerError> {
        handles
            .iter()
            .map(|h| {
                self.tasks
                    .get(&h.id)
                    .map(|e| Arc::clone(&e))
                    .ok_or_else(|| SchedulerError::UnknownTask(h.label.clone()))
            })
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_task(entry: Arc<TaskEntry>) {
    entry.state_tx.send_replace(TaskState::Running);

    let outcome: TaskOutcome = tokio::select! {
        biased;
        _ = entry.cancel.cancelled() => Err(TaskFailure::Cancelled),
        result = entry.executor.execute(&entry.label, &entry.prompt) => {
            result.map_err(Into::into)
        }
    };

    let terminal = if outcome.is_ok() {
        TaskState::Completed
    } else {
        TaskState::Failed
    };
    if let Err(failure) = &outcome {
        tracing::warn!(task = %entry.id, label = %entry.label, error = %failure, "task failed");
    }

    // Outcome must be visible before the terminal state is announced.
    *entry.outcome.write() = Some(outcome);
    entry.state_tx.send_replace(terminal);
}

async fn wait_terminal(entry: &TaskEntry) {
    let mut rx = entry.state_tx.subscribe();
    let _ = rx.wait_for(|state| state.is_terminal()).await;
}

/// A run-scoped view of the scheduler: label uniqueness is enforced per
/// scope, so concurrent workflow runs may reuse the same task names.
pub struct TaskScope {
    scheduler: Scheduler,
    labels: Mutex<HashSet<String>>,
}

impl TaskScope {
    /// Register a task in Created state. A label still active in this scope
    /// is rejected; once a join consumes the task the label is free again.
    pub fn submit(
        &self,
        label: &str,
        prompt: impl Into<String>,
        executor: Arc<dyn AgentExecutor>,
    ) -> Result<TaskHandle, SchedulerError> {
        let mut labels = self.labels.lock();
        if !labels.insert(label.to_string()) {
            return Err(SchedulerError::DuplicateLabel(label.to_string()));
        }
        drop(labels);
        Ok(self
            .scheduler
            .register(label.to_string(), prompt.into(), executor))
    }

    pub fn schedule(&self, handle: &TaskHandle) -> Result<(), SchedulerError> {
        self.scheduler.schedule(handle)
    }

    /// Submit and immediately schedule.
    pub fn spawn(
        &self,
        label: &str,
        prompt: impl Into<String>,
        executor: Arc<dyn AgentExecutor>,
    ) -> Result<TaskHandle, SchedulerError> {
        let handle = self.submit(label, prompt, executor)?;
        self.schedule(&handle)?;
        Ok(handle)
    }

    pub async fn join(
        &self,
        handles: &[TaskHandle],
        mode: JoinMode,
    ) -> Result<HashMap<String, TaskOutcome>, SchedulerError> {
        let results = self.scheduler.join(handles, mode).await?;
        let mut labels = self.labels.lock();
        for label in results.keys() {
            labels.remove(label);
        }
        Ok(results)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
