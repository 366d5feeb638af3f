use tracing::debug;

use crate::history::ToolCallRequest;
use crate::llm::ToolDefinition;

/// Name of the synthetic function that ends a loop.
pub const STOP_TOOL: &str = "stop";

/// Stop function for the decision loop. `response` is optional.
pub fn agent_stop_definition() -> ToolDefinition {
    ToolDefinition {
        name: STOP_TOOL.to_string(),
        description: "Call when the user's request is fully handled and no more skills are needed. \
                      Optionally pass the final answer as `response`."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "response": {
                    "type": "string",
                    "description": "Final answer for the user, if one is ready."
                }
            }
        }),
    }
}

/// Stop function for a skill loop. `response` is required and becomes the
/// skill's result.
pub fn skill_stop_definition() -> ToolDefinition {
    ToolDefinition {
        name: STOP_TOOL.to_string(),
        description: "Call when the task is complete. Pass everything the caller needs as `response`."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "response": {
                    "type": "string",
                    "description": "Complete result of the task."
                }
            },
            "required": ["response"]
        }),
    }
}

/// Tool calls of one model turn with the stop call taken out.
#[derive(Debug, Default)]
pub struct StopSplit {
    pub stopped: bool,
    pub response: String,
    pub calls: Vec<ToolCallRequest>,
}

/// Separate `stop` from the genuine calls. The last stop with a readable
/// `response` wins.
pub fn split_stop(calls: Vec<ToolCallRequest>) -> StopSplit {
    let mut split = StopSplit::default();
    for call in calls {
        if call.name == STOP_TOOL {
            split.stopped = true;
            match call.string_argument("response") {
                Some(response) => split.response = response,
                None if !call.arguments.trim().is_empty() => {
                    debug!("Ignoring unreadable stop arguments: {}", call.arguments)
                }
                None => {}
            }
        } else {
            split.calls.push(call);
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_separated_from_calls() {
        let split = split_stop(vec![
            ToolCallRequest::new("1", "search", r#"{"q":"pasta"}"#),
            ToolCallRequest::new("2", STOP_TOOL, r#"{"response":"done"}"#),
        ]);
        assert!(split.stopped);
        assert_eq!(split.response, "done");
        assert_eq!(split.calls.len(), 1);
        assert_eq!(split.calls[0].name, "search");
    }

    #[test]
    fn stop_without_response() {
        let split = split_stop(vec![ToolCallRequest::new("1", STOP_TOOL, "")]);
        assert!(split.stopped);
        assert!(split.response.is_empty());

        let broken = split_stop(vec![ToolCallRequest::new("1", STOP_TOOL, "{oops")]);
        assert!(broken.stopped);
        assert!(broken.response.is_empty());
    }

    #[test]
    fn no_stop() {
        let split = split_stop(vec![ToolCallRequest::new("1", "search", "{}")]);
        assert!(!split.stopped);
        assert_eq!(split.calls.len(), 1);
    }
}
