//! Hub configuration
//!
//! Every field has a default, so an empty file or no file at all yields a working hub.
//! Environment overrides use the `IDH_` prefix with `__` between nested keys, e.g.
//! `IDH_RECONNECT__MAX_ATTEMPTS=0`.

use common::LogConfig;
use errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "IDH_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before a source gives up (0 = unlimited)
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Direct read/write and backend subscribe/unsubscribe/browse
    pub operation_ms: u64,
    pub discovery_ms: u64,
    /// One connect attempt
    pub connect_ms: u64,
    /// How long a call waits for a source that is still connecting
    pub ready_wait_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            operation_ms: 5_000,
            discovery_ms: 10_000,
            connect_ms: 5_000,
            ready_wait_ms: 3_000,
        }
    }
}

impl TimeoutConfig {
    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }

    pub fn discovery(&self) -> Duration {
        Duration::from_millis(self.discovery_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub reconnect: ReconnectConfig,
    pub timeouts: TimeoutConfig,
    /// Bound of each source's update feed
    pub feed_capacity: usize,
    pub logging: LogConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            timeouts: TimeoutConfig::default(),
            feed_capacity: 1024,
            logging: LogConfig::default(),
        }
    }
}

impl HubConfig {
    /// `config/<name>.{toml,yaml,json}` layered under `IDH_*` environment variables
    pub fn load(name: &str) -> Result<Self> {
        common::load_config(name, ENV_PREFIX)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        common::load_config_from_file(path)
    }
}
