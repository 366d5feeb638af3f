use async_trait::async_trait;
use futures::StreamExt;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::completion::{CompletionModel, Message};
use rig::message::{AssistantContent, Text, ToolResult, ToolResultContent, UserContent};
use rig::streaming::StreamedAssistantContent;
use rig::OneOrMany;
use tracing::debug;

use super::{Completion, CompletionRequest, LanguageModel, ModelPool, TextStream, ToolChoice};
use crate::context::RunContext;
use crate::error::LlmError;
use crate::history::{ChatMessage, Role, ToolCallRequest};

/// `LanguageModel` backed by a pool of rig completion models.
pub struct RigModel {
    pool: ModelPool,
    temperature: f64,
    max_tokens: u64,
}

impl RigModel {
    pub fn new(pool: ModelPool, temperature: f64, max_tokens: u64) -> Self {
        Self {
            pool,
            temperature,
            max_tokens,
        }
    }

    pub fn pool(&self) -> &ModelPool {
        &self.pool
    }

    fn build_request(&self, request: &CompletionRequest) -> rig::completion::CompletionRequest {
        let (preamble, chat_history) = to_rig_messages(&request.messages);

        let tool_choice = if request.tools.is_empty() {
            None
        } else {
            Some(match request.tool_choice {
                ToolChoice::Auto => rig::message::ToolChoice::Auto,
                ToolChoice::Required => rig::message::ToolChoice::Required,
                ToolChoice::None => rig::message::ToolChoice::None,
            })
        };

        rig::completion::CompletionRequest {
            preamble,
            chat_history: OneOrMany::many(chat_history).unwrap_or_else(|_| {
                OneOrMany::one(Message::User {
                    content: OneOrMany::one(UserContent::Text(Text {
                        text: String::new(),
                    })),
                })
            }),
            documents: Vec::new(),
            tools: request
                .tools
                .iter()
                .map(|t| rig::completion::ToolDefinition {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                })
                .collect(),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            tool_choice,
            additional_params: None,
        }
    }
}

#[async_trait]
impl LanguageModel for RigModel {
    fn name(&self) -> &str {
        self.pool.default_model().1
    }

    async fn complete(
        &self,
        ctx: &RunContext,
        request: CompletionRequest,
    ) -> Result<Completion, LlmError> {
        #[allow(deprecated)]
        let (model, model_name): (&CompletionModelHandle<'static>, &str) =
            self.pool.get(&request.tier);
        let rig_request = self.build_request(&request);

        debug!(
            "LLM request [{}] via {model_name}: {} messages, {} tools, choice={:?}",
            request.tier,
            request.messages.len(),
            request.tools.len(),
            request.tool_choice
        );

        let started = std::time::Instant::now();
        let response = ctx
            .guard(model.completion(rig_request))
            .await
            .ok_or(LlmError::Cancelled)?
            .map_err(|e| classify_provider_error(e.to_string()))?;

        let mut completion = Completion::default();
        for content in response.choice.iter() {
            match content {
                AssistantContent::Text(t) => completion.content.push_str(&t.text),
                AssistantContent::ToolCall(tc) => {
                    let arguments = match &tc.function.arguments {
                        serde_json::Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    };
                    completion.tool_calls.push(ToolCallRequest::new(
                        tc.id.clone(),
                        tc.function.name.clone(),
                        arguments,
                    ));
                }
                _ => {}
            }
        }

        debug!(
            "LLM response [{}]: {} chars, {} tool call(s) in {:.1}s",
            request.tier,
            completion.content.len(),
            completion.tool_calls.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(completion)
    }

    async fn complete_streaming(
        &self,
        ctx: &RunContext,
        request: CompletionRequest,
    ) -> Result<TextStream, LlmError> {
        #[allow(deprecated)]
        let (model, model_name): (&CompletionModelHandle<'static>, &str) =
            self.pool.get(&request.tier);
        let rig_request = self.build_request(&request);

        debug!(
            "LLM stream [{}] via {model_name}: {} messages",
            request.tier,
            request.messages.len()
        );

        let stream = ctx
            .guard(model.stream(rig_request))
            .await
            .ok_or(LlmError::Cancelled)?
            .map_err(|e| classify_provider_error(e.to_string()))?;

        Ok(Box::pin(stream.filter_map(|item| async move { streamed_text(item) })))
    }
}

/// Text delta of one streamed item. Tool calls, reasoning and the final
/// summary carry no answer text.
fn streamed_text<R, E: std::fmt::Display>(
    item: Result<StreamedAssistantContent<R>, E>,
) -> Option<Result<String, LlmError>> {
    match item {
        Ok(StreamedAssistantContent::Text(text)) if !text.text.is_empty() => Some(Ok(text.text)),
        Ok(_) => None,
        Err(e) => Some(Err(classify_provider_error(e.to_string()))),
    }
}

fn classify_provider_error(message: String) -> LlmError {
    let lowered = message.to_lowercase();
    if lowered.contains("content_policy")
        || lowered.contains("contentpolicyviolation")
        || lowered.contains("content management policy")
    {
        LlmError::ContentPolicy(message)
    } else {
        LlmError::Provider(message)
    }
}

/// Split history into a preamble and rig chat messages.
///
/// Leading developer turns form the preamble; later ones are sent as user
/// text. Consecutive tool results are grouped into one user message.
fn to_rig_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Message>) {
    let leading = messages
        .iter()
        .take_while(|m| m.role == Role::Developer)
        .count();
    let preamble = if leading == 0 {
        None
    } else {
        Some(
            messages[..leading]
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    };

    let mut out: Vec<Message> = Vec::new();
    let mut pending_results: Vec<UserContent> = Vec::new();

    for message in &messages[leading..] {
        if message.role != Role::Tool {
            flush_results(&mut pending_results, &mut out);
        }
        match message.role {
            Role::Developer | Role::User => out.push(Message::User {
                content: OneOrMany::one(UserContent::Text(Text {
                    text: message.content.clone(),
                })),
            }),
            Role::Assistant => {
                let mut parts: Vec<AssistantContent> = Vec::new();
                if !message.content.is_empty() {
                    parts.push(AssistantContent::Text(Text {
                        text: message.content.clone(),
                    }));
                }
                for call in &message.tool_calls {
                    let arguments = serde_json::from_str(&call.arguments)
                        .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));
                    parts.push(AssistantContent::tool_call(
                        call.id.clone(),
                        call.name.clone(),
                        arguments,
                    ));
                }
                out.push(Message::Assistant {
                    id: None,
                    content: OneOrMany::many(parts).unwrap_or_else(|_| {
                        OneOrMany::one(AssistantContent::Text(Text {
                            text: String::new(),
                        }))
                    }),
                });
            }
            Role::Tool => pending_results.push(UserContent::ToolResult(ToolResult {
                id: message.tool_call_id.clone().unwrap_or_default(),
                call_id: None,
                content: OneOrMany::one(ToolResultContent::Text(Text {
                    text: message.content.clone(),
                })),
            })),
        }
    }
    flush_results(&mut pending_results, &mut out);

    (preamble, out)
}

fn flush_results(pending: &mut Vec<UserContent>, out: &mut Vec<Message>) {
    if pending.is_empty() {
        return;
    }
    if let Ok(content) = OneOrMany::many(std::mem::take(pending)) {
        out.push(Message::User { content });
    }
}
