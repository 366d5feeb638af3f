use std::sync::Arc;

use crate::error::AgentError;
use crate::tools::{Tool, ToolRegistry};

use super::stop::STOP_TOOL;

/// Named bundle of tools with its own system prompt.
///
/// The description is what the decision loop sees when choosing a skill.
#[derive(Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub status_message: Option<String>,
    tools: Vec<Arc<dyn Tool>>,
}

impl Skill {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
            status_message: None,
            tools: Vec::new(),
        }
    }

    pub fn with_status(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Check the skill and build its tool registry.
    pub(crate) fn prepare(self) -> Result<PreparedSkill, AgentError> {
        let invalid = |reason: String| AgentError::InvalidSkill {
            name: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if self.name == STOP_TOOL {
            return Err(invalid(format!("'{STOP_TOOL}' is reserved")));
        }
        if self.description.trim().is_empty() {
            return Err(invalid("description must not be empty".into()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(invalid("system prompt must not be empty".into()));
        }
        let registry =
            ToolRegistry::from_tools(self.tools.iter().cloned()).map_err(|e| invalid(e.to_string()))?;
        if registry.contains(STOP_TOOL) {
            return Err(invalid(format!("tool name '{STOP_TOOL}' is reserved")));
        }
        Ok(PreparedSkill {
            skill: self,
            tools: registry,
        })
    }
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("name", &self.name)
            .field("tools", &self.tool_names())
            .finish()
    }
}

/// Validated skill with its tool registry.
pub(crate) struct PreparedSkill {
    pub skill: Skill,
    pub tools: ToolRegistry,
}
