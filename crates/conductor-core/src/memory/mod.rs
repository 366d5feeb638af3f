pub mod block;
pub mod file;

pub use block::{MemoryBlock, MemoryValue};
pub use file::JsonFileMemory;

use anyhow::Result;
use async_trait::async_trait;

use crate::context::RunContext;

/// Source of the user/session context injected into prompts.
#[async_trait]
pub trait Memory: Send + Sync {
    async fn retrieve(&self, ctx: &RunContext) -> Result<MemoryBlock>;
}

/// Returns the same block on every run.
#[derive(Debug, Clone, Default)]
pub struct StaticMemory {
    block: MemoryBlock,
    include_identity: bool,
}

impl StaticMemory {
    pub fn new(block: MemoryBlock) -> Self {
        Self {
            block,
            include_identity: false,
        }
    }

    /// Also add `customer_id`, `session_id` and the session's extra metadata.
    pub fn with_identity(mut self) -> Self {
        self.include_identity = true;
        self
    }
}

#[async_trait]
impl Memory for StaticMemory {
    async fn retrieve(&self, ctx: &RunContext) -> Result<MemoryBlock> {
        let block = self.block.clone();
        if self.include_identity {
            let meta = ctx.meta();
            block.add_string("customer_id", meta.customer_id.clone());
            block.add_string("session_id", meta.session_id.clone());
            let mut extra: Vec<_> = meta.extra.iter().collect();
            extra.sort();
            for (key, value) in extra {
                block.add_string(key.clone(), value.clone());
            }
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionMeta;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn static_memory_returns_copy() {
        let block = MemoryBlock::new();
        block.add_string("country", "United Kingdom");
        let memory = StaticMemory::new(block);

        let ctx = RunContext::detached("c1");
        let first = memory.retrieve(&ctx).await.unwrap();
        first.add_string("scratch", "x");
        let second = memory.retrieve(&ctx).await.unwrap();
        assert!(!second.exists("scratch"));
        assert_eq!(second.parse(), "country: United Kingdom\n");
    }

    #[tokio::test]
    async fn identity_keys_added() {
        let memory = StaticMemory::default().with_identity();
        let meta = SessionMeta::new("cust-9").with_extra("user_id", "u1");
        let ctx = RunContext::new(meta, CancellationToken::new());
        let block = memory.retrieve(&ctx).await.unwrap();
        assert_eq!(block.get_string("customer_id").as_deref(), Some("cust-9"));
        assert_eq!(block.get_string("user_id").as_deref(), Some("u1"));
        assert_eq!(
            block.get_string("session_id").as_deref(),
            Some(ctx.session_id())
        );
    }
}
