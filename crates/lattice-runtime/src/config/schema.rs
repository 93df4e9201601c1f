//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use lattice_core::{PermissionLevel, StaticPermissionStore};
use lattice_framework::QueueConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatticeConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default)]
    pub outbound: OutboundConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub permissions: PermissionsConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` without it.
    Json,
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation policy for file output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Per-module levels, e.g. `lattice_core = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of the call site.
    #[serde(default)]
    pub file_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            filters: HashMap::new(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
        }
    }
}

// =============================================================================
// Bus and commands
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Deadline for a single handler invocation, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// Custom topics added to the built-in registry.
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: default_timeout_ms(),
            topics: Vec::new(),
        }
    }
}

impl BusConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,

    /// Deadline for a single command invocation, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Priority of the router's subscription to message topics.
    #[serde(default = "default_router_priority")]
    pub priority: i32,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefixes: default_prefixes(),
            timeout_ms: default_timeout_ms(),
            priority: default_router_priority(),
        }
    }
}

impl CommandsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_prefixes() -> Vec<String> {
    vec!["/".to_string(), "#".to_string()]
}

fn default_router_priority() -> i32 {
    100
}

fn default_timeout_ms() -> u64 {
    30000
}

// =============================================================================
// Outbound
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Maximum number of requests waiting to be sent.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Sends allowed per window.
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Rate window in milliseconds.
    #[serde(default = "default_per_ms")]
    pub per_ms: u64,

    #[serde(default = "default_burst")]
    pub burst: u32,

    /// How long shutdown waits for the queue to empty, in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            rate: default_rate(),
            per_ms: default_per_ms(),
            burst: default_burst(),
            drain_timeout_ms: default_drain_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

impl OutboundConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Converts to the queue's own settings.
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.capacity,
            rate: self.rate,
            per: Duration::from_millis(self.per_ms),
            burst: self.burst,
            retry: self.retry.to_queue_retry(),
        }
    }
}

fn default_capacity() -> usize {
    1000
}

fn default_rate() -> u32 {
    20
}

fn default_per_ms() -> u64 {
    1000
}

fn default_burst() -> u32 {
    1
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Converts to the queue's retry config.
    pub fn to_queue_retry(&self) -> lattice_framework::RetryConfig {
        lattice_framework::RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// =============================================================================
// Plugins and permissions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Plugin ids that are resolved but never enabled at startup.
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Per-plugin configuration sections, keyed by plugin id.
    #[serde(default)]
    pub settings: HashMap<String, Value>,

    /// Deadline for a plugin's enable or disable hook, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub hook_timeout_ms: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            settings: HashMap::new(),
            hook_timeout_ms: default_timeout_ms(),
        }
    }
}

impl PluginsConfig {
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Level of actors not listed in `levels`.
    #[serde(default)]
    pub default_level: PermissionLevel,

    /// Actor id to level.
    #[serde(default)]
    pub levels: HashMap<String, PermissionLevel>,
}

impl PermissionsConfig {
    pub fn to_store(&self) -> StaticPermissionStore {
        StaticPermissionStore::new(self.default_level).with_levels(
            self.levels
                .iter()
                .map(|(actor, level)| (actor.clone(), *level)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = LatticeConfig::default();
        assert_eq!(config.commands.prefixes, vec!["/", "#"]);
        assert_eq!(config.outbound.to_queue_config(), QueueConfig::default());
        assert_eq!(config.bus.handler_timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: LatticeConfig = serde_json::from_value(json!({
            "outbound": { "rate": 5, "retry": { "max_retries": 0 } },
            "permissions": { "levels": { "10001": "super_admin" } },
            "plugins": { "settings": { "echo": { "repeat": 2 } } },
        }))
        .unwrap();

        assert_eq!(config.outbound.rate, 5);
        assert_eq!(config.outbound.capacity, 1000);
        assert_eq!(config.outbound.retry.max_retries, 0);
        assert_eq!(config.outbound.retry.initial_delay_ms, 2000);
        assert_eq!(
            config.permissions.levels["10001"],
            PermissionLevel::SuperAdmin
        );
        assert_eq!(config.plugins.settings["echo"]["repeat"], 2);
        assert_eq!(config.commands, CommandsConfig::default());
    }
}
