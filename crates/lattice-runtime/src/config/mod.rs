//! Configuration module for the Lattice runtime.
//!
//! Layered loading (defaults, files, environment, overrides) through figment,
//! the typed [`LatticeConfig`] schema, and validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BusConfig, CommandsConfig, LatticeConfig, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, OutboundConfig, PermissionsConfig, PluginsConfig, RetryConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
