//! Shared types and configuration for kvgate.
//!
//! Log levels and verbosity, the fsync policy, backend credentials and the
//! TOML gateway configuration with its validation rules.

pub mod config;
pub mod types;

pub use config::{BackendConfig, ConfigError, GatewayConfig, LogConfig, WorkersConfig};
pub use types::*;
