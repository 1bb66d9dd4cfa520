//! Event-triggered workflows composed from the coordination core.
//!
//! A workflow is a plain async function over a [`WorkflowContext`]:
//! broadcast an acknowledgement, schedule tasks, join on them, broadcast
//! the results, record history. Instances run concurrently and are tracked
//! in a [`WorkflowRegistry`] so nothing outlives shutdown unobserved.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use civic_core::ids::WorkflowId;
use civic_core::{BroadcastBus, HistoryLog, DEFAULT_ROOM};
use civic_engine::{AgentExecutor, Scheduler, SchedulerError, TaskOutcome, TaskScope};

pub mod alerts;
pub mod analysis;
pub mod report;
pub mod simulation;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// The fixed agent roles workflows schedule against. A roster is complete
/// by construction: there is no way to wire up a partial one.
#[derive(Clone)]
pub struct AgentRoster {
    pub safety: Arc<dyn AgentExecutor>,
    pub reporting: Arc<dyn AgentExecutor>,
    pub traffic: Arc<dyn AgentExecutor>,
    pub weather: Arc<dyn AgentExecutor>,
    pub parking: Arc<dyn AgentExecutor>,
    pub planning: Arc<dyn AgentExecutor>,
    pub data_collection: Arc<dyn AgentExecutor>,
}

impl AgentRoster {
    /// Bind every role to the same executor. Useful for tests and for
    /// deployments with a single general-purpose agent.
    pub fn uniform(executor: Arc<dyn AgentExecutor>) -> Self {
        Self {
            safety: Arc::clone(&executor),
            reporting: Arc::clone(&executor),
            traffic: Arc::clone(&executor),
            weather: Arc::clone(&executor),
            parking: Arc::clone(&executor),
            planning: Arc::clone(&executor),
            data_collection: executor,
        }
    }
}

/// Everything a workflow needs, passed explicitly rather than held in
/// ambient globals.
#[derive(Clone)]
pub struct WorkflowContext {
    pub scheduler: Scheduler,
    pub bus: BroadcastBus,
    pub history: Arc<HistoryLog>,
    pub roster: AgentRoster,
}

impl WorkflowContext {
    pub fn new(
        scheduler: Scheduler,
        bus: BroadcastBus,
        history: Arc<HistoryLog>,
        roster: AgentRoster,
    ) -> Self {
        Self {
            scheduler,
            bus,
            history,
            roster,
        }
    }

    /// A fresh task scope for one workflow run.
    pub fn tasks(&self) -> TaskScope {
        self.scheduler.scope()
    }

    /// Broadcast to the default room.
    pub fn broadcast(&self, message: Value) {
        self.bus.publish(DEFAULT_ROOM, message);
    }
}

struct RunInfo {
    name: String,
    cancel: CancellationToken,
}

/// Tracks every spawned workflow run with a cancellation token, so active
/// work is observable and drainable at shutdown.
pub struct WorkflowRegistry {
    runs: Arc<DashMap<WorkflowId, RunInfo>>,
    tracker: TaskTracker,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn a workflow future onto the runtime. Errors are logged, never
    /// propagated, so one instance's failure cannot affect its siblings.
    pub fn spawn<F>(&self, name: &str, fut: F) -> WorkflowId
    where
        F: Future<Output = Result<(), WorkflowError>> + Send + 'static,
    {
        let id = WorkflowId::new();
        let cancel = CancellationToken::new();
        self.runs.insert(
            id.clone(),
            RunInfo {
                name: name.to_string(),
                cancel: cancel.clone(),
            },
        );

        let runs = Arc::clone(&self.runs);
        let run_id = id.clone();
        let run_name = name.to_string();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(workflow = %run_id, name = %run_name, "workflow cancelled");
                }
                result = fut => {
                    if let Err(error) = result {
                        tracing::warn!(workflow = %run_id, name = %run_name, %error, "workflow failed");
                    }
                }
            }
            runs.remove(&run_id);
        });
        id
    }

    pub fn cancel(&self, id: &WorkflowId) -> bool {
        match self.runs.get(id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.runs.len()
    }

    pub fn active_names(&self) -> Vec<String> {
        self.runs.iter().map(|r| r.name.clone()).collect()
    }

    /// Wait for in-flight workflows to finish without cancelling them.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Cancel everything still running and wait for the set to drain.
    pub async fn drain(&self) {
        for run in self.runs.iter() {
            run.cancel.cancel();
        }
        self.wait().await;
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull the human-readable text out of a task result: the named key when
/// the value is an object carrying it, otherwise the value itself.
pub fn value_text(value: &Value, key: &str) -> String {
    match value {
        Value::Object(map) => match map.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => Value::Object(map.clone()).to_string(),
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Like [`value_text`], with a task failure rendered as its message.
pub fn outcome_text(outcome: &TaskOutcome, key: &str) -> String {
    match outcome {
        Ok(value) => value_text(value, key),
        Err(failure) => failure.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use civic_core::RoomEvent;
    use civic_engine::mock::MockExecutor;
    use tokio::sync::broadcast;

    /// A context with a uniform echoing roster plus a subscribed receiver
    /// capturing every broadcast the workflow makes.
    pub fn context() -> (WorkflowContext, broadcast::Receiver<RoomEvent>) {
        context_with(Arc::new(MockExecutor::echoing()))
    }

    pub fn context_with(
        executor: Arc<dyn AgentExecutor>,
    ) -> (WorkflowContext, broadcast::Receiver<RoomEvent>) {
        let bus = BroadcastBus::new(256);
        let rx = bus.subscribe();
        let ctx = WorkflowContext::new(
            Scheduler::new(),
            bus,
            Arc::new(HistoryLog::default()),
            AgentRoster::uniform(executor),
        );
        (ctx, rx)
    }

    pub fn drain_events(rx: &mut broadcast::Receiver<RoomEvent>) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_engine::mock::MockExecutor;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn value_text_prefers_named_key() {
        assert_eq!(value_text(&json!({ "result": "ok" }), "result"), "ok");
        assert_eq!(value_text(&json!({ "result": 7 }), "result"), "7");
        assert_eq!(value_text(&json!("bare"), "result"), "bare");
        assert_eq!(
            value_text(&json!({ "other": true }), "result"),
            r#"{"other":true}"#
        );
    }

    #[tokio::test]
    async fn registry_tracks_and_drains() {
        let registry = Arc::new(WorkflowRegistry::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        registry.spawn("hang", async move {
            let _ = rx.await;
            Ok(())
        });
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.active_names(), vec!["hang".to_string()]);

        drop(tx);
        registry.drain().await;
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn registry_cancel_stops_a_run() {
        tokio::time::pause();
        let registry = Arc::new(WorkflowRegistry::new());

        let id = registry.spawn("sleepy", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        assert!(registry.cancel(&id));

        registry.drain().await;
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.cancel(&id));
    }

    #[tokio::test]
    async fn failed_workflow_is_removed_quietly() {
        let registry = Arc::new(WorkflowRegistry::new());
        let (ctx, _rx) = testutil::context();
        let tasks = ctx.tasks();

        registry.spawn("broken", async move {
            // Join on a handle that was never registered.
            let bogus = civic_engine::TaskHandle {
                id: civic_core::ids::TaskId::new(),
                label: "missing".into(),
            };
            tasks.join(&[bogus], civic_engine::JoinMode::All).await?;
            Ok(())
        });

        registry.drain().await;
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn uniform_roster_shares_one_executor() {
        let exec = Arc::new(MockExecutor::echoing());
        let roster = AgentRoster::uniform(Arc::clone(&exec) as _);

        roster.safety.execute("a", "p").await.unwrap();
        roster.weather.execute("b", "p").await.unwrap();
        assert_eq!(exec.call_count(), 2);
    }
}
