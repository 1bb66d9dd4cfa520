//! The executor boundary.
//!
//! An `AgentExecutor` is the opaque capability that turns a prompt into a
//! result. The coordination core never looks inside: it schedules, waits,
//! and forwards whatever value or error comes back.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ExecutorError;

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Execute one prompt. The result is either a plain string value or a
    /// structured object with at least a textual field.
    async fn execute(&self, label: &str, prompt: &str) -> Result<Value, ExecutorError>;
}

/// Adapt an async closure into an executor.
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn AgentExecutor>
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> AgentExecutor for FnExecutor<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutorError>> + Send,
{
    async fn execute(&self, label: &str, prompt: &str) -> Result<Value, ExecutorError> {
        (self.0)(label.to_string(), prompt.to_string()).await
    }
}
