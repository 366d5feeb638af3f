//! Tools used by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::ToolError;
use crate::tools::{Tool, ToolArgs};

/// Returns its `text` argument.
pub struct EchoTool {
    name: String,
    status: Option<String>,
    pub calls: Arc<AtomicUsize>,
}

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    fn status_message(&self) -> Option<String> {
        self.status.clone()
    }

    async fn execute(&self, _ctx: &RunContext, args: ToolArgs) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(args
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

enum Failure {
    Retryable,
    Ignorable,
    Other,
}

/// Always fails with a fixed classification.
pub struct FailingTool {
    name: String,
    failure: Failure,
}

impl FailingTool {
    pub fn retryable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failure: Failure::Retryable,
        }
    }

    pub fn ignorable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failure: Failure::Ignorable,
        }
    }

    pub fn other(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failure: Failure::Other,
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _ctx: &RunContext, _args: ToolArgs) -> Result<String, ToolError> {
        Err(match self.failure {
            Failure::Retryable => ToolError::retryable("service busy"),
            Failure::Ignorable => ToolError::ignorable("record not found"),
            Failure::Other => anyhow::anyhow!("unexpected").into(),
        })
    }
}

/// Panics when executed.
pub struct PanicTool;

#[async_trait]
impl Tool for PanicTool {
    fn name(&self) -> &str {
        "panic"
    }

    fn description(&self) -> &str {
        "Panics"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _ctx: &RunContext, _args: ToolArgs) -> Result<String, ToolError> {
        panic!("tool exploded");
    }
}

/// Sleeps, then answers `"{name} done"`.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Takes a while"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _ctx: &RunContext, _args: ToolArgs) -> Result<String, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("{} done", self.name))
    }
}
