pub mod model_pool;
pub mod rig_model;
pub mod scripted;

pub use model_pool::ModelPool;
pub use rig_model::RigModel;
pub use scripted::ScriptedModel;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::LlmError;
use crate::history::{ChatMessage, ToolCallRequest};

/// Function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    /// The model must call at least one tool.
    Required,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model tier, resolved by the backend (e.g. "decision", "skill").
    pub tier: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
}

impl CompletionRequest {
    pub fn new(tier: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            tier: tier.into(),
            messages,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>, choice: ToolChoice) -> Self {
        self.tools = tools;
        self.tool_choice = choice;
        self
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// One non-streaming model turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
        }
    }

    /// Assistant turn recording this completion.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage::assistant_with_calls(self.content, self.tool_calls)
    }
}

pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// Chat-completion backend used by the agent and skill loops.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        ctx: &RunContext,
        request: CompletionRequest,
    ) -> Result<Completion, LlmError>;

    /// Stream the answer text. Backends without streaming yield one chunk.
    async fn complete_streaming(
        &self,
        ctx: &RunContext,
        request: CompletionRequest,
    ) -> Result<TextStream, LlmError> {
        let completion = self.complete(ctx, request).await?;
        let chunk: Result<String, LlmError> = Ok(completion.content);
        Ok(Box::pin(futures::stream::once(async move { chunk })))
    }
}
