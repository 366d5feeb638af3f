pub mod loader;
pub mod schema;

pub use loader::{find_config_path, load_config, resolve_path, save_config};
pub use schema::{
    AgentsConfig, Config, MemoryConfig, ModelRef, ProviderConfig, ProvidersConfig, StorageBackend,
    StorageConfig, TierConfig,
};
