use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::context::RunContext;
use crate::memory::{Memory, MemoryBlock, MemoryValue};

/// Memory persisted as a JSON object file.
///
/// Objects become nested blocks, every other value a string leaf. Key order
/// in the file is the key order of the block.
#[derive(Clone)]
pub struct JsonFileMemory {
    path: PathBuf,
}

impl JsonFileMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<MemoryBlock> {
        if !self.path.exists() {
            return Ok(MemoryBlock::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read memory '{}'", self.path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse memory '{}'", self.path.display()))?;
        match value {
            serde_json::Value::Object(map) => Ok(block_from_map(map)),
            _ => anyhow::bail!("memory '{}' must hold a JSON object", self.path.display()),
        }
    }

    pub fn save(&self, block: &MemoryBlock) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&block_to_value(block))?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write memory '{}'", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl Memory for JsonFileMemory {
    async fn retrieve(&self, _ctx: &RunContext) -> Result<MemoryBlock> {
        let memory = self.clone();
        tokio::task::spawn_blocking(move || memory.load()).await?
    }
}

fn block_from_map(map: serde_json::Map<String, serde_json::Value>) -> MemoryBlock {
    let block = MemoryBlock::new();
    for (key, value) in map {
        match value {
            serde_json::Value::Object(inner) => block.add_block(key, block_from_map(inner)),
            serde_json::Value::String(s) => block.add_string(key, s),
            other => block.add_string(key, other.to_string()),
        }
    }
    block
}

fn block_to_value(block: &MemoryBlock) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for key in block.keys() {
        match block.get(&key) {
            Some(MemoryValue::Text(s)) => {
                map.insert(key, serde_json::Value::String(s));
            }
            Some(MemoryValue::Block(inner)) => {
                map.insert(key, block_to_value(&inner));
            }
            None => {}
        }
    }
    serde_json::Value::Object(map)
}
