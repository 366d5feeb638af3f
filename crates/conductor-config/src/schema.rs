use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    pub storage: StorageConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    /// System prompt of the top-level agent.
    pub prompt: String,
    /// Ceiling on decision rounds per run.
    pub max_iterations: usize,
    /// Ceiling on model rounds inside one skill.
    pub max_skill_iterations: usize,
    /// Per tool call timeout. Zero disables it.
    pub tool_timeout_secs: u64,
    /// Number of stored conversations replayed before a new message.
    pub history_window: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tiers: TierConfig,
    /// Named model tiers. Must contain at least a "default" entry.
    pub models: HashMap<String, ModelRef>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            prompt: "You are a helpful assistant. Use the available skills to answer the user."
                .into(),
            max_iterations: 25,
            max_skill_iterations: 25,
            tool_timeout_secs: 60,
            history_window: 5,
            temperature: 0.7,
            max_tokens: 8192,
            tiers: TierConfig::default(),
            models: HashMap::new(),
        }
    }
}

/// Which model tier each stage of a run asks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TierConfig {
    pub decision: String,
    pub skill: String,
    pub synthesis: String,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            decision: "default".into(),
            skill: "default".into(),
            synthesis: "default".into(),
        }
    }
}

/// Reference to a provider + model combination for a named tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
    pub ollama: Option<ProviderConfig>,
    pub openrouter: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: "~/.conductor/conversations.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// JSON object file loaded as the memory block of every run.
    pub path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: "~/.conductor/memory.json".into(),
        }
    }
}
