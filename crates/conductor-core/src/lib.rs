pub mod agent;
pub mod context;
pub mod error;
pub mod history;
pub mod llm;
pub mod memory;
pub mod response;
pub mod session;
pub mod storage;
pub mod tools;

#[cfg(test)]
mod testutil;

// Re-export key types
pub use agent::{Agent, AgentOptions, Skill};
pub use context::{RunContext, SessionMeta};
pub use error::{AgentError, LlmError, SessionError, ToolError};
pub use history::{ChatMessage, MessageHistory, Role, ToolCallRequest};
pub use llm::{Completion, CompletionRequest, LanguageModel, ModelPool, RigModel, ScriptedModel};
pub use memory::{JsonFileMemory, Memory, MemoryBlock, StaticMemory};
pub use response::{Response, ResponseKind};
pub use session::{Session, SessionParts, SessionState};
pub use storage::{InMemoryStorage, SqliteStorage, Storage};
pub use tools::{Tool, ToolRegistry, TypedTool};
