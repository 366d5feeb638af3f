use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::{ToolError, ToolErrorKind};
use crate::history::{ChatMessage, ToolCallRequest};
use crate::response::EventSink;
use crate::tools::{validate_params, Tool, ToolRegistry};

/// Result text for failures the model should not retry.
pub const DO_NOT_RETRY: &str = "Error occurred while running. Do not retry";

/// Result text for failures the model should retry.
pub fn retry_message(error: &str) -> String {
    format!("Error: {error}.\nRetry")
}

/// Find the largest byte index <= `max` that is a UTF-8 char boundary.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut i = max;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

pub(crate) fn preview(s: &str, max: usize) -> String {
    if s.len() > max {
        let end = floor_char_boundary(s, max);
        format!("{}... ({} chars)", &s[..end], s.len())
    } else {
        s.to_string()
    }
}

/// Runs one round of tool calls concurrently.
///
/// Every call yields exactly one tool-result message; failures are turned
/// into result text and never abort the round.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    timeout: Option<Duration>,
}

impl ToolExecutor {
    /// `None` lets tools run without a time limit.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Execute `calls` and return their results in request order.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        sink: &EventSink,
        tools: &ToolRegistry,
        calls: &[ToolCallRequest],
    ) -> Vec<ChatMessage> {
        let mut handles = Vec::with_capacity(calls.len());
        for (i, call) in calls.iter().enumerate() {
            let tool = tools.get(&call.name);
            if let Some(status) = tool.as_ref().and_then(|t| t.status_message()) {
                sink.status(status).await;
            }
            info!(
                "Tool call [{}/{}]: {}({})",
                i + 1,
                calls.len(),
                call.name,
                preview(&call.arguments, 200)
            );
            let ctx = ctx.clone();
            let call = call.clone();
            let timeout = self.timeout;
            handles.push(tokio::spawn(async move {
                run_call(&ctx, tool, &call, timeout).await
            }));
        }

        let joined = futures::future::join_all(handles).await;
        calls
            .iter()
            .zip(joined)
            .map(|(call, outcome)| {
                let text = match outcome {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Tool task for {} failed: {e}", call.name);
                        DO_NOT_RETRY.to_string()
                    }
                };
                debug!("Tool result [{}]: {}", call.name, preview(&text, 200));
                ChatMessage::tool_result(call.id.clone(), text)
            })
            .collect()
    }
}

async fn run_call(
    ctx: &RunContext,
    tool: Option<Arc<dyn Tool>>,
    call: &ToolCallRequest,
    timeout: Option<Duration>,
) -> String {
    let Some(tool) = tool else {
        warn!("Unknown tool requested: {}", call.name);
        return result_text(&ToolError::ignorable(format!("unknown tool '{}'", call.name)));
    };

    let args = match call.parse_arguments() {
        Ok(args) => args,
        Err(e) => {
            warn!("Bad arguments for {}: {e}", call.name);
            return retry_message(&e);
        }
    };

    let errors = validate_params(&serde_json::Value::Object(args.clone()), &tool.parameters());
    if !errors.is_empty() {
        warn!("Invalid parameters for {}: {}", call.name, errors.join("; "));
        return retry_message(&format!(
            "Invalid parameters for tool '{}': {}",
            call.name,
            errors.join("; ")
        ));
    }

    let execution = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, tool.execute(ctx, args)).await.ok(),
            None => Some(tool.execute(ctx, args).await),
        }
    };
    match ctx.guard(execution).await {
        None => {
            debug!("Tool {} cancelled", call.name);
            DO_NOT_RETRY.to_string()
        }
        Some(None) => {
            warn!("Tool {} timed out after {:?}", call.name, timeout.unwrap_or_default());
            DO_NOT_RETRY.to_string()
        }
        Some(Some(Ok(output))) => output,
        Some(Some(Err(e))) => {
            warn!("Tool {} failed ({:?}): {e}", call.name, e.kind());
            result_text(&e)
        }
    }
}

fn result_text(error: &ToolError) -> String {
    match error.kind() {
        ToolErrorKind::Retryable => retry_message(&error.to_string()),
        ToolErrorKind::Ignorable | ToolErrorKind::Other => DO_NOT_RETRY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{Response, ResponseKind};
    use crate::testutil::{EchoTool, FailingTool, PanicTool, SlowTool};
    use tokio::sync::mpsc;

    fn registry(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
        ToolRegistry::from_tools(tools).unwrap()
    }

    fn sink() -> (EventSink, mpsc::Receiver<Response>) {
        let (tx, rx) = mpsc::channel(16);
        (EventSink::new(tx), rx)
    }

    fn executor() -> ToolExecutor {
        ToolExecutor::new(Some(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn results_follow_request_order() {
        let tools = registry(vec![
            Arc::new(SlowTool::new("slow", Duration::from_millis(50))),
            Arc::new(EchoTool::new("echo")),
        ]);
        let calls = vec![
            ToolCallRequest::new("a", "slow", "{}"),
            ToolCallRequest::new("b", "echo", r#"{"text":"hi"}"#),
        ];
        let (sink, _rx) = sink();
        let results = executor()
            .execute(&RunContext::detached("c"), &sink, &tools, &calls)
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id.as_deref(), Some("a"));
        assert_eq!(results[0].content, "slow done");
        assert_eq!(results[1].tool_call_id.as_deref(), Some("b"));
        assert_eq!(results[1].content, "hi");
    }

    #[tokio::test]
    async fn failures_are_isolated_and_classified() {
        let tools = registry(vec![
            Arc::new(EchoTool::new("echo")),
            Arc::new(FailingTool::ignorable("broken")),
            Arc::new(FailingTool::retryable("flaky")),
            Arc::new(FailingTool::other("weird")),
        ]);
        let calls = vec![
            ToolCallRequest::new("1", "broken", "{}"),
            ToolCallRequest::new("2", "echo", r#"{"text":"fine"}"#),
            ToolCallRequest::new("3", "flaky", "{}"),
            ToolCallRequest::new("4", "weird", "{}"),
            ToolCallRequest::new("5", "missing", "{}"),
        ];
        let (sink, _rx) = sink();
        let results = executor()
            .execute(&RunContext::detached("c"), &sink, &tools, &calls)
            .await;
        let texts: Vec<&str> = results.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts[0], DO_NOT_RETRY);
        assert_eq!(texts[1], "fine");
        assert_eq!(texts[2], "Error: service busy.\nRetry");
        assert_eq!(texts[3], DO_NOT_RETRY);
        assert_eq!(texts[4], DO_NOT_RETRY);
    }

    #[tokio::test]
    async fn malformed_arguments_are_retryable() {
        let tools = registry(vec![Arc::new(EchoTool::new("echo"))]);
        let calls = vec![
            ToolCallRequest::new("1", "echo", "{\"text\": "),
            ToolCallRequest::new("2", "echo", r#"{"text": 5}"#),
        ];
        let (sink, _rx) = sink();
        let results = executor()
            .execute(&RunContext::detached("c"), &sink, &tools, &calls)
            .await;
        assert!(results[0].content.starts_with("Error: invalid JSON arguments"));
        assert!(results[0].content.ends_with("\nRetry"));
        assert!(results[1].content.contains("expected type 'string'"));
        assert!(results[1].content.ends_with("\nRetry"));
    }

    #[tokio::test]
    async fn panic_and_timeout_do_not_escape() {
        let tools = registry(vec![
            Arc::new(PanicTool),
            Arc::new(SlowTool::new("slow", Duration::from_secs(60))),
            Arc::new(EchoTool::new("echo")),
        ]);
        let calls = vec![
            ToolCallRequest::new("1", "panic", "{}"),
            ToolCallRequest::new("2", "slow", "{}"),
            ToolCallRequest::new("3", "echo", r#"{"text":"ok"}"#),
        ];
        let (sink, _rx) = sink();
        let results = ToolExecutor::new(Some(Duration::from_millis(50)))
            .execute(&RunContext::detached("c"), &sink, &tools, &calls)
            .await;
        assert_eq!(results[0].content, DO_NOT_RETRY);
        assert_eq!(results[1].content, DO_NOT_RETRY);
        assert_eq!(results[2].content, "ok");
    }

    #[tokio::test]
    async fn status_messages_are_emitted() {
        let tools = registry(vec![Arc::new(
            EchoTool::new("echo").with_status("Echoing..."),
        )]);
        let calls = vec![ToolCallRequest::new("1", "echo", r#"{"text":"x"}"#)];
        let (sink, mut rx) = sink();
        executor()
            .execute(&RunContext::detached("c"), &sink, &tools, &calls)
            .await;
        let status = rx.recv().await.unwrap();
        assert_eq!(status.kind, ResponseKind::Status);
        assert_eq!(status.content, "Echoing...");
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let s = "héllo wörld";
        let p = preview(s, 2);
        assert!(p.starts_with('h'));
        assert!(p.ends_with(&format!("({} chars)", s.len())));
    }
}
