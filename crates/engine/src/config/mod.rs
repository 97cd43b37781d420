//! Engine Configuration
//!
//! Endpoint list, auth provider, initial token and the tunable
//! intervals, loaded from JSON.

pub mod loader;
pub mod types;

pub use loader::{ConfigError, load_config, load_config_from_str, load_default_config};
pub use types::EngineConfig;
