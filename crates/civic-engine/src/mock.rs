//! Pre-programmed executor for deterministic tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::ExecutorError;
use crate::executor::AgentExecutor;

pub enum MockReply {
    /// Resolve to `{"result": text}`.
    Text(String),
    /// Resolve to an arbitrary value.
    Json(Value),
    /// Fail with an executor error.
    Fail(String),
    /// Wait, then yield the inner reply.
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }

    pub fn delayed_text(delay: Duration, s: &str) -> Self {
        Self::Delayed(delay, Box::new(Self::text(s)))
    }
}

/// Executor that replays scripted replies in order. Once the script is
/// exhausted it echoes the prompt, so open-ended tests keep working.
pub struct MockExecutor {
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicUsize,
}

impl MockExecutor {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// An executor that always echoes.
    pub fn echoing() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing(message: &str) -> Self {
        Self::new(vec![MockReply::Fail(message.to_string())])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    async fn resolve(reply: MockReply, prompt: &str) -> Result<Value, ExecutorError> {
        match reply {
            MockReply::Text(s) => Ok(json!({ "result": s })),
            MockReply::Json(v) => Ok(v),
            MockReply::Fail(msg) => Err(ExecutorError::Failed(msg)),
            MockReply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                Box::pin(Self::resolve(*inner, prompt)).await
            }
        }
    }
}

#[async_trait]
impl AgentExecutor for MockExecutor {
    async fn execute(&self, _label: &str, prompt: &str) -> Result<Value, ExecutorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let next = self.replies.lock().pop_front();
        match next {
            Some(reply) => Self::resolve(reply, prompt).await,
            None => Ok(json!({ "result": format!("echo: {prompt}") })),
        }
    }
}
