//! Configuration Types

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_provider() -> String {
    "Bearer".to_string()
}

fn default_counter_interval_ms() -> u64 {
    1_000
}

fn default_response_timeout_ms() -> u64 {
    120_000
}

fn default_min_token_lifetime_ms() -> u64 {
    180_000
}

fn default_min_refresh_interval_ms() -> u64 {
    60_000
}

/// Engine configuration.
///
/// One endpoint is chosen per connection attempt, rotating through
/// the list across retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub endpoints: Vec<String>,

    /// Auth provider named in the identify request
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Initial bearer token; replaceable at runtime through the
    /// facade
    #[serde(default)]
    pub access_token: String,

    /// Interval between counter snapshots on the outbound queue
    #[serde(default = "default_counter_interval_ms")]
    pub counter_interval_ms: u64,

    /// How long a subscribe/unsubscribe request may wait for its
    /// response
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Floor applied to the token lifetime reported by the server
    #[serde(default = "default_min_token_lifetime_ms")]
    pub min_token_lifetime_ms: u64,

    /// Minimum interval before a proactive token refresh
    #[serde(default = "default_min_refresh_interval_ms")]
    pub min_refresh_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            endpoints: Vec::new(),
            provider: default_provider(),
            access_token: String::new(),
            counter_interval_ms: default_counter_interval_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            min_token_lifetime_ms: default_min_token_lifetime_ms(),
            min_refresh_interval_ms: default_min_refresh_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub fn counter_interval(&self) -> Duration {
        Duration::from_millis(self.counter_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn min_token_lifetime(&self) -> Duration {
        Duration::from_millis(self.min_token_lifetime_ms)
    }

    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.min_refresh_interval_ms)
    }
}
