use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System/developer instruction.
    Developer,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON text as produced by the model. Not guaranteed to parse.
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments as a JSON object. Empty arguments count as `{}`.
    pub fn parse_arguments(&self) -> Result<serde_json::Map<String, serde_json::Value>, String> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        match serde_json::from_str::<serde_json::Value>(&self.arguments) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err("arguments must be a JSON object".to_string()),
            Err(e) => Err(format!("invalid JSON arguments: {e}")),
        }
    }

    /// Look up a string argument, ignoring parse failures.
    pub fn string_argument(&self, key: &str) -> Option<String> {
        self.parse_arguments()
            .ok()?
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self::plain(Role::Developer, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Ordered log of conversation turns.
///
/// `Clone` is a deep copy, so a cloned branch can be mutated freely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHistory {
    messages: Vec<ChatMessage>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(messages);
    }

    /// Insert as the first entry.
    pub fn prepend(&mut self, message: ChatMessage) {
        self.messages.insert(0, message);
    }

    pub fn replace_at(&mut self, index: usize, message: ChatMessage) -> Result<(), String> {
        match self.messages.get_mut(index) {
            Some(slot) => {
                *slot = message;
                Ok(())
            }
            None => Err(format!(
                "index {index} out of range for history of {}",
                self.messages.len()
            )),
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Copy without developer/system turns, order preserved.
    pub fn without_developer(&self) -> Self {
        Self {
            messages: self
                .messages
                .iter()
                .filter(|m| m.role != Role::Developer)
                .cloned()
                .collect(),
        }
    }
}

impl From<Vec<ChatMessage>> for MessageHistory {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self::from_messages(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_prepend_keep_order() {
        let mut history = MessageHistory::new();
        history.push(ChatMessage::user("one"));
        history.extend([ChatMessage::assistant("two"), ChatMessage::user("three")]);
        history.prepend(ChatMessage::developer("system"));

        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["system", "one", "two", "three"]);
        assert_eq!(history.last_user_text(), Some("three"));
    }

    #[test]
    fn clone_does_not_alias() {
        let mut history = MessageHistory::new();
        history.push(ChatMessage::user("hi"));
        let mut branch = history.clone();
        branch.push(ChatMessage::assistant("branch only"));
        branch.replace_at(0, ChatMessage::user("edited")).unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history.as_slice()[0].content, "hi");
        assert_eq!(branch.len(), 2);
    }

    #[test]
    fn replace_out_of_range_fails() {
        let mut history = MessageHistory::new();
        assert!(history.replace_at(0, ChatMessage::user("x")).is_err());
    }

    #[test]
    fn without_developer_filters() {
        let history = MessageHistory::from_messages(vec![
            ChatMessage::developer("sys"),
            ChatMessage::user("q"),
            ChatMessage::developer("note"),
            ChatMessage::tool_result("c1", "out"),
        ]);
        let filtered = history.without_developer();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|m| m.role != Role::Developer));
    }

    #[test]
    fn clear_empties() {
        let mut history = MessageHistory::from_messages(vec![ChatMessage::user("q")]);
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn argument_parsing() {
        let ok = ToolCallRequest::new("1", "t", r#"{"instruction":"do it"}"#);
        assert_eq!(ok.string_argument("instruction").as_deref(), Some("do it"));

        let empty = ToolCallRequest::new("2", "t", "  ");
        assert!(empty.parse_arguments().unwrap().is_empty());

        let broken = ToolCallRequest::new("3", "t", "{not json");
        assert!(broken.parse_arguments().unwrap_err().contains("invalid JSON"));

        let array = ToolCallRequest::new("4", "t", "[1,2]");
        assert!(array.parse_arguments().is_err());
    }
}
