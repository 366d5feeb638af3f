use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::{AgentError, LoopScope};
use crate::history::{ChatMessage, MessageHistory, ToolCallRequest};
use crate::llm::{Completion, CompletionRequest, LanguageModel, ToolChoice};
use crate::memory::MemoryBlock;
use crate::response::EventSink;

use super::executor::ToolExecutor;
use super::skill::PreparedSkill;
use super::{prompts, stop, AgentOptions};

/// Returned when a skill finishes without a stop response.
pub const NO_VALID_RESPONSE: &str = "Error: The skill execution did not produce a valid response";

/// Runs one skill invocation to completion on its own history branch.
pub(crate) struct SkillRunner<'a> {
    pub model: &'a dyn LanguageModel,
    pub options: &'a AgentOptions,
    pub agent_prompt: &'a str,
    pub executor: &'a ToolExecutor,
}

impl SkillRunner<'_> {
    pub(crate) async fn run(
        &self,
        ctx: &RunContext,
        mut history: MessageHistory,
        memory: &MemoryBlock,
        prepared: &PreparedSkill,
        invocation: &ToolCallRequest,
        sink: &EventSink,
    ) -> Result<String, AgentError> {
        let skill = &prepared.skill;
        info!("Running skill {}", skill.name);

        history.prepend(ChatMessage::developer(prompts::skill_prompt(
            self.agent_prompt,
            &skill.system_prompt,
            &memory.parse(),
        )));
        if let Some(instruction) = invocation
            .string_argument("instruction")
            .filter(|s| !s.trim().is_empty())
        {
            history.push(ChatMessage::user(instruction));
        }

        let mut tools = vec![stop::skill_stop_definition()];
        tools.extend(prepared.tools.definitions());
        let limit = self.options.max_skill_iterations;
        let mut stop_response = String::new();

        for iteration in 0..limit {
            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let request = CompletionRequest::new(&self.options.tiers.skill, history.as_slice().to_vec())
                .with_tools(tools.clone(), ToolChoice::Required);
            let completion = self.model.complete(ctx, request).await?;

            let content = completion.content;
            let split = stop::split_stop(completion.tool_calls);
            debug!(
                "Skill {} [{}/{limit}]: {} tool call(s), stop={}",
                skill.name,
                iteration + 1,
                split.calls.len(),
                split.stopped
            );
            if !content.is_empty() && !split.calls.is_empty() {
                debug!("Skill {} returned text alongside tool calls; text not emitted", skill.name);
            }

            // The recorded turn never contains the stop call.
            let turn = Completion {
                content,
                tool_calls: split.calls,
            }
            .into_message();
            let had_calls = turn.has_tool_calls();
            if had_calls {
                let calls = turn.tool_calls.clone();
                history.push(turn);
                let results = self
                    .executor
                    .execute(ctx, sink, &prepared.tools, &calls)
                    .await;
                history.extend(results);
                if ctx.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
            } else if !split.stopped {
                history.push(turn);
            }

            if split.stopped {
                stop_response = split.response;
            }
            if split.stopped || !had_calls {
                return Ok(finish(&skill.name, stop_response));
            }
        }

        warn!("Skill {} reached max iterations ({limit})", skill.name);
        Err(AgentError::MaxIterations {
            scope: LoopScope::Skill(skill.name.clone()),
            limit,
        })
    }
}

fn finish(skill: &str, stop_response: String) -> String {
    if stop_response.is_empty() {
        warn!("Skill {skill} finished without a stop response");
        NO_VALID_RESPONSE.to_string()
    } else {
        stop_response
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::agent::skill::Skill;
    use crate::history::Role;
    use crate::llm::{Completion, ScriptedModel};
    use crate::testutil::EchoTool;

    fn call(id: &str, name: &str, args: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, args)
    }

    struct Fixture {
        options: AgentOptions,
        executor: ToolExecutor,
        prepared: PreparedSkill,
        echo_calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    fn fixture(max_skill_iterations: usize) -> Fixture {
        let echo = EchoTool::new("echo");
        let echo_calls = echo.counter();
        let prepared = Skill::new("Echo", "Echoes things", "You echo.")
            .with_tool(Arc::new(echo))
            .prepare()
            .unwrap();
        Fixture {
            options: AgentOptions {
                max_skill_iterations,
                ..AgentOptions::default()
            },
            executor: ToolExecutor::new(Some(Duration::from_secs(5))),
            prepared,
            echo_calls,
        }
    }

    async fn run(fx: &Fixture, model: &ScriptedModel, instruction: &str) -> Result<String, AgentError> {
        let (tx, _rx) = mpsc::channel(16);
        let runner = SkillRunner {
            model,
            options: &fx.options,
            agent_prompt: "You are an assistant.",
            executor: &fx.executor,
        };
        let mut history = MessageHistory::new();
        history.push(ChatMessage::user("original question"));
        runner
            .run(
                &RunContext::detached("c"),
                history,
                &MemoryBlock::new(),
                &fx.prepared,
                &call("skill-1", "Echo", &serde_json::json!({"instruction": instruction}).to_string()),
                &EventSink::new(tx),
            )
            .await
    }

    #[tokio::test]
    async fn tool_then_stop_returns_stop_response() {
        let fx = fixture(5);
        let model = ScriptedModel::new([
            Completion::calls(vec![call("t1", "echo", r#"{"text":"42"}"#)]),
            Completion::calls(vec![call("t2", "stop", r#"{"response":"The answer is 42"}"#)]),
        ]);
        let out = run(&fx, &model, "find the answer").await.unwrap();
        assert_eq!(out, "The answer is 42");
        assert_eq!(fx.echo_calls.load(Ordering::SeqCst), 1);

        let requests = model.requests();
        let first = &requests[0];
        assert_eq!(first.messages[0].role, Role::Developer);
        assert!(first.messages[0].content.contains("You echo."));
        assert_eq!(first.messages.last().unwrap().content, "find the answer");
        assert_eq!(first.tool_choice, ToolChoice::Required);
        assert!(first.has_tool("stop") && first.has_tool("echo"));

        let second = &requests[1];
        let tool_result = second.messages.last().unwrap();
        assert_eq!(tool_result.role, Role::Tool);
        assert_eq!(tool_result.content, "42");
        assert!(second
            .messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .all(|c| c.name != "stop"));
    }

    #[tokio::test]
    async fn stop_in_same_turn_still_runs_tools() {
        let fx = fixture(5);
        let model = ScriptedModel::new([Completion::calls(vec![
            call("t1", "echo", r#"{"text":"x"}"#),
            call("t2", "stop", r#"{"response":"done"}"#),
        ])]);
        assert_eq!(run(&fx, &model, "go").await.unwrap(), "done");
        assert_eq!(fx.echo_calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn text_only_turn_yields_sentinel() {
        let fx = fixture(5);
        let model = ScriptedModel::new([Completion::text("I think it is 42")]);
        assert_eq!(run(&fx, &model, "go").await.unwrap(), NO_VALID_RESPONSE);
    }

    #[tokio::test]
    async fn malformed_arguments_are_retried() {
        let fx = fixture(5);
        let model = ScriptedModel::new([
            Completion::calls(vec![call("t1", "echo", "{\"text\": \"unterminated")]),
            Completion::calls(vec![call("t2", "echo", r#"{"text":"fixed"}"#)]),
            Completion::calls(vec![call("t3", "stop", r#"{"response":"fixed"}"#)]),
        ]);
        assert_eq!(run(&fx, &model, "go").await.unwrap(), "fixed");

        let requests = model.requests();
        let retry = requests[1].messages.last().unwrap();
        assert!(retry.content.starts_with("Error: invalid JSON arguments"));
        assert!(retry.content.ends_with("\nRetry"));
        assert_eq!(requests[2].messages.last().unwrap().content, "fixed");
        assert_eq!(fx.echo_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ceiling_is_a_hard_error() {
        let fx = fixture(3);
        let model = ScriptedModel::from_fn(|_| {
            Ok(Completion::calls(vec![ToolCallRequest::new(
                "t",
                "echo",
                r#"{"text":"again"}"#,
            )]))
        });
        let err = run(&fx, &model, "loop").await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::MaxIterations { scope: LoopScope::Skill(ref name), limit: 3 } if name == "Echo"
        ));
        assert_eq!(model.call_count(), 3);
        assert_eq!(fx.echo_calls.load(Ordering::SeqCst), 3);
    }
}
