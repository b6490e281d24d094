use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use super::content::ToolResult;
use crate::domain::BackendError;

/// Minimal metadata every tool must expose.
pub trait ToolSpec {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-Schema-shaped object describing the `arguments` of `tools/call`.
    fn input_schema(&self) -> serde_json::Value;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Tool = Spec + execution.
///
/// `Ok(ToolResult)` is always delivered verbatim, including `is_error: true`.
/// `Err` is reserved for faults (bugs, cancellation, broken backends) and
/// reaches the client only as a sanitized internal error.
#[async_trait]
pub trait Tool: ToolSpec + Send + Sync {
    async fn execute(
        &self,
        ctx: CallContext,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("call cancelled")]
    Cancelled,
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Cancellation scope handed to every `execute`: the dispatcher's shutdown
/// signal plus the per-call deadline.
#[derive(Debug, Clone)]
pub struct CallContext {
    shutdown: watch::Receiver<bool>,
    deadline: Instant,
}

impl CallContext {
    pub fn new(shutdown: watch::Receiver<bool>, timeout: Duration) -> Self {
        Self { shutdown, deadline: Instant::now() + timeout }
    }

    /// A context bound only by `timeout`, for calls made outside a dispatcher.
    pub fn detached(timeout: Duration) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(rx, timeout)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow() || Instant::now() >= self.deadline
    }

    /// Resolves once shutdown is requested or the deadline passes.
    pub async fn cancelled(&self) {
        let mut shutdown = self.shutdown.clone();
        let stop_requested = async move {
            let sender_gone = shutdown.wait_for(|stop| *stop).await.is_err();
            if sender_gone {
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            _ = tokio::time::sleep_until(self.deadline) => {}
            _ = stop_requested => {}
        }
    }

    /// Run `fut` unless the context is cancelled first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ToolError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(ToolError::Cancelled),
        }
    }
}
