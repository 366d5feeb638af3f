pub mod executor;
pub mod prompts;
pub mod skill;
pub mod skill_runner;
pub mod stop;

pub use executor::ToolExecutor;
pub use skill::Skill;
pub use skill_runner::NO_VALID_RESPONSE;

use skill_runner::SkillRunner;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use conductor_config::{AgentsConfig, TierConfig};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

use crate::context::RunContext;
use crate::error::{AgentError, LoopScope};
use crate::history::{ChatMessage, MessageHistory, ToolCallRequest};
use crate::llm::{Completion, CompletionRequest, LanguageModel, ToolChoice, ToolDefinition};
use crate::memory::MemoryBlock;
use crate::response::{EventSink, Response};

use skill::PreparedSkill;

/// Capacity of a run's response channel.
const RESPONSE_BUFFER: usize = 64;

/// Limits and model tiers of an agent run.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub max_iterations: usize,
    pub max_skill_iterations: usize,
    /// `None` disables the per-tool time limit.
    pub tool_timeout: Option<Duration>,
    pub tiers: TierConfig,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self::from_config(&AgentsConfig::default())
    }
}

impl AgentOptions {
    pub fn from_config(config: &AgentsConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_skill_iterations: config.max_skill_iterations,
            tool_timeout: (config.tool_timeout_secs > 0)
                .then(|| Duration::from_secs(config.tool_timeout_secs)),
            tiers: config.tiers.clone(),
        }
    }
}

/// Top-level orchestrator: picks skills for a message and assembles the answer.
pub struct Agent {
    prompt: String,
    skills: Vec<PreparedSkill>,
    options: AgentOptions,
    executor: ToolExecutor,
}

impl Agent {
    /// Build an agent, rejecting malformed skills and duplicate names.
    pub fn new(
        prompt: impl Into<String>,
        skills: Vec<Skill>,
        options: AgentOptions,
    ) -> Result<Self, AgentError> {
        let mut seen = HashSet::new();
        let mut prepared = Vec::with_capacity(skills.len());
        for skill in skills {
            if !seen.insert(skill.name.clone()) {
                return Err(AgentError::InvalidSkill {
                    name: skill.name,
                    reason: "duplicate skill name".into(),
                });
            }
            prepared.push(skill.prepare()?);
        }
        Ok(Self {
            prompt: prompt.into(),
            skills: prepared,
            executor: ToolExecutor::new(options.tool_timeout),
            options,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn skill_names(&self) -> Vec<&str> {
        self.skills.iter().map(|s| s.skill.name.as_str()).collect()
    }

    fn skill(&self, name: &str) -> Option<&PreparedSkill> {
        self.skills.iter().find(|s| s.skill.name == name)
    }

    fn decision_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .skills
            .iter()
            .map(|s| prompts::skill_definition(&s.skill))
            .collect();
        tools.push(stop::agent_stop_definition());
        tools
    }

    /// Start a run on its own task and return its response stream.
    ///
    /// The stream carries `Status`, `PartialText` and at most one `Error`, and
    /// closes when the run is over. It never carries `End`.
    ///
    /// Developer turns in `history` are dropped; every model call carries its
    /// own system prompt.
    pub fn run(
        self: &Arc<Self>,
        ctx: RunContext,
        model: Arc<dyn LanguageModel>,
        history: MessageHistory,
        memory: Arc<MemoryBlock>,
    ) -> mpsc::Receiver<Response> {
        let (tx, rx) = mpsc::channel(RESPONSE_BUFFER);
        let agent = Arc::clone(self);
        tokio::spawn(
            async move {
                let sink = EventSink::new(tx);
                if let Err(e) = agent.drive(&ctx, model.as_ref(), history, &memory, &sink).await {
                    match &e {
                        AgentError::Cancelled => info!("Agent run cancelled"),
                        _ => error!("Agent run failed: {e}"),
                    }
                    sink.error(e.user_message()).await;
                }
            }
            .in_current_span(),
        );
        rx
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        model: &dyn LanguageModel,
        history: MessageHistory,
        memory: &MemoryBlock,
        sink: &EventSink,
    ) -> Result<(), AgentError> {
        let mut history = history.without_developer();
        let memory_text = memory.parse();
        let system = prompts::decision_prompt(&self.prompt, &self.skill_names(), &memory_text);
        let tools = self.decision_tools();
        let runner = SkillRunner {
            model,
            options: &self.options,
            agent_prompt: &self.prompt,
            executor: &self.executor,
        };

        let limit = self.options.max_iterations;
        let mut stopped = false;
        let mut stop_text = String::new();
        let mut invocations = 0usize;
        let mut last_result = String::new();

        for iteration in 0..limit {
            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let mut messages = vec![ChatMessage::developer(system.clone())];
            messages.extend(history.iter().cloned());
            let request = CompletionRequest::new(&self.options.tiers.decision, messages)
                .with_tools(tools.clone(), ToolChoice::Required);
            let completion = model.complete(ctx, request).await?;

            let content = completion.content;
            let split = stop::split_stop(completion.tool_calls);
            let calls = dedup_calls(split.calls);
            debug!(
                "Decision [{}/{limit}]: {} skill call(s), stop={}",
                iteration + 1,
                calls.len(),
                split.stopped
            );

            if calls.is_empty() {
                stopped = true;
                stop_text = if split.stopped { split.response } else { content };
                break;
            }
            if !content.is_empty() {
                debug!("Decision turn returned text alongside skill calls; text not emitted");
            }

            // Branches start from the history as it was before this selection.
            let base = history.clone();
            let branches = calls.iter().map(|call| {
                let base = base.clone();
                let runner = &runner;
                async move {
                    let Some(prepared) = self.skill(&call.name) else {
                        warn!("Model selected unknown skill '{}'", call.name);
                        return Ok(None);
                    };
                    let skill_sink = sink.for_skill(&prepared.skill.name);
                    if let Some(status) = &prepared.skill.status_message {
                        skill_sink.status(status.clone()).await;
                    }
                    runner
                        .run(ctx, base, memory, prepared, call, &skill_sink)
                        .await
                        .map(Some)
                }
            });
            let outcomes = futures::future::join_all(branches).await;

            let selection = Completion {
                content,
                tool_calls: calls.clone(),
            };
            history.push(selection.into_message());
            for (call, outcome) in calls.iter().zip(outcomes) {
                let text = match outcome? {
                    Some(result) => {
                        invocations += 1;
                        last_result.clone_from(&result);
                        result
                    }
                    None => executor::DO_NOT_RETRY.to_string(),
                };
                history.push(ChatMessage::tool_result(call.id.clone(), text));
            }

            if split.stopped {
                stopped = true;
                stop_text = split.response;
                break;
            }
        }

        if !stopped {
            warn!("Agent reached max iterations ({limit}) without stopping");
            return Err(AgentError::MaxIterations {
                scope: LoopScope::Agent,
                limit,
            });
        }

        match invocations {
            1 => {
                info!("Answering with the single skill result");
                sink.partial(last_result).await;
            }
            0 if !stop_text.trim().is_empty() => sink.partial(stop_text).await,
            _ => self.synthesize(ctx, model, &history, &memory_text, sink).await?,
        }
        Ok(())
    }

    /// Stream a final answer built from the accumulated history.
    async fn synthesize(
        &self,
        ctx: &RunContext,
        model: &dyn LanguageModel,
        history: &MessageHistory,
        memory_text: &str,
        sink: &EventSink,
    ) -> Result<(), AgentError> {
        info!("Synthesizing answer from {} messages", history.len());
        let question = history.last_user_text().unwrap_or_default().to_string();

        let mut system = self.prompt.clone();
        if !memory_text.is_empty() {
            system.push_str("\n\n");
            system.push_str(memory_text);
        }
        let mut messages = vec![ChatMessage::developer(system)];
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::developer(prompts::synthesis_instruction(&question)));

        // Replayed tool turns need their tools declared, but none may be called.
        let request = CompletionRequest::new(&self.options.tiers.synthesis, messages)
            .with_tools(self.decision_tools(), ToolChoice::None);
        let mut stream = model.complete_streaming(ctx, request).await?;
        loop {
            let chunk = match ctx.guard(stream.next()).await {
                None => return Err(AgentError::Cancelled),
                Some(None) => break,
                Some(Some(chunk)) => chunk?,
            };
            if !chunk.is_empty() {
                sink.partial(chunk).await;
            }
        }
        Ok(())
    }
}

/// Keep the first call per skill name.
fn dedup_calls(calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|call| {
            let first = seen.insert(call.name.clone());
            if !first {
                warn!("Skill '{}' selected more than once; keeping the first call", call.name);
            }
            first
        })
        .collect()
}
