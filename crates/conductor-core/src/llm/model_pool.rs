use std::collections::HashMap;

use anyhow::Result;
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;

/// Pool of named model tiers (e.g. "default", "decision", "synthesis").
///
/// Unknown tier names fall back to "default", which must be present when the
/// pool is built.
#[allow(deprecated)]
#[derive(Clone)]
pub struct ModelPool {
    /// (model_handle, model_name_for_logging)
    default: (CompletionModelHandle<'static>, String),
    tiers: HashMap<String, (CompletionModelHandle<'static>, String)>,
}

#[allow(deprecated)]
impl ModelPool {
    pub fn new(mut models: HashMap<String, (CompletionModelHandle<'static>, String)>) -> Result<Self> {
        let Some(default) = models.remove("default") else {
            anyhow::bail!("model pool must contain a \"default\" tier");
        };
        Ok(Self {
            default,
            tiers: models,
        })
    }

    /// Get a specific tier. Falls back to "default" if the tier is not found.
    pub fn get(&self, tier: &str) -> (&CompletionModelHandle<'static>, &str) {
        let (handle, name) = self.tiers.get(tier).unwrap_or(&self.default);
        (handle, name)
    }

    pub fn default_model(&self) -> (&CompletionModelHandle<'static>, &str) {
        (&self.default.0, &self.default.1)
    }

    /// All tier names, "default" first.
    pub fn tiers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tiers.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.insert(0, "default");
        names
    }
}
