//! Shared plumbing for the industrial data hub
//!
//! - logging: tracing subscriber setup with a runtime-adjustable level
//! - config: figment-based layered configuration loading

pub mod config;
pub mod logging;

pub use config::{load_config, load_config_from_file, load_config_in};
pub use logging::{get_log_level, set_log_level, LogConfig, LogLevel};
