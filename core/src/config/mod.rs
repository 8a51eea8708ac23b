//! Configuration management
//!
//! One TOML file (`~/.config/planwise/config.toml` on Linux) plus a handful
//! of environment overrides. All configuration types are exported from here.

pub mod bridge;
pub mod store;

pub use bridge::{config_to_llm_config, config_to_llm_rate_limit, config_to_rate_limit, BridgeError};
pub use store::{
    AgentSettings, Config, FinanceSettings, LlmSettings, ProviderType, SearchSettings,
};
