use thiserror::Error;

/// How the model should react to a failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    /// Transient; the model is told to retry.
    Retryable,
    /// Permanent for this call; the model is told not to retry.
    Ignorable,
    /// Unclassified. Handled like `Ignorable`.
    Other,
}

/// Error returned by a tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Ignorable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn ignorable(msg: impl Into<String>) -> Self {
        Self::Ignorable(msg.into())
    }

    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::Retryable(_) => ToolErrorKind::Retryable,
            Self::Ignorable(_) => ToolErrorKind::Ignorable,
            Self::Other(_) => ToolErrorKind::Other,
        }
    }
}

/// Failure of a language model call.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("content policy violation: {0}")]
    ContentPolicy(String),

    #[error("LLM returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("LLM call cancelled")]
    Cancelled,
}

/// Which loop hit its iteration ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopScope {
    Agent,
    Skill(String),
}

impl std::fmt::Display for LoopScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => write!(f, "agent"),
            Self::Skill(name) => write!(f, "skill {name}"),
        }
    }
}

/// Errors that abort an agent run or its construction.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] LlmError),

    #[error("{scope} exceeded max iterations ({limit})")]
    MaxIterations { scope: LoopScope, limit: usize },

    #[error("invalid skill '{name}': {reason}")]
    InvalidSkill { name: String, reason: String },

    #[error("run cancelled")]
    Cancelled,
}

/// Shown to the user in place of a content policy error.
pub const CONTENT_POLICY_MESSAGE: &str = "Content policy violation! If this was a mistake, please reach out to the support. Consecutive violations may result in a temporary/permanent ban.";

impl AgentError {
    /// Text placed in the `Error` response for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::Model(LlmError::ContentPolicy(_)) => CONTENT_POLICY_MESSAGE.to_string(),
            Self::Model(LlmError::Cancelled) | Self::Cancelled => "Run cancelled.".to_string(),
            other => format!("Error occurred: {other}"),
        }
    }
}

/// Misuse of the session surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session already received its message")]
    AlreadyStarted,

    #[error("session has been closed")]
    Closed,
}
