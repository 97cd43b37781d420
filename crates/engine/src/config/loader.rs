use std::path::Path;
use thiserror::Error;

use super::types::EngineConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("no endpoints in config")]
    NoEndpoints,
}

/// Load engine configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<EngineConfig, ConfigError> {
    let default_config = include_str!("feed_config.json");
    load_config_from_str(default_config)
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        Ok(())
    }
}
