//! Error types for the Lattice framework.

use lattice_core::{BusError, HandlerFault, PluginId};
use thiserror::Error;

use crate::plugin::PluginState;

// =============================================================================
// Command Errors
// =============================================================================

/// Errors returned by [`CommandRouter`](crate::command::CommandRouter) registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The name is already taken by another owner, or collides with an alias.
    #[error("command name '{name}' is already registered")]
    DuplicateName { name: String },

    /// An alias collides with an existing name or alias.
    #[error("alias '{alias}' of command '{command}' is already registered")]
    DuplicateAlias { command: String, alias: String },

    /// Names and aliases must be non-empty and free of whitespace.
    #[error("invalid command name '{0}'")]
    InvalidName(String),

    /// No command with this name exists.
    #[error("command '{0}' not found")]
    NotFound(String),
}

/// Result type for command registration.
pub type CommandResult<T> = Result<T, CommandError>;

// =============================================================================
// Plugin Errors
// =============================================================================

/// Errors raised by the [`PluginManager`](crate::plugin::PluginManager).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The dependency graph contains a cycle.
    #[error("plugin dependency cycle detected among: {}", join(.members))]
    DependencyCycle { members: Vec<PluginId> },

    /// A declared dependency is not among the known descriptors.
    #[error("plugin '{plugin}' depends on unknown plugin '{dependency}'")]
    MissingDependency {
        plugin: PluginId,
        dependency: PluginId,
    },

    /// A dependency exists but its version fails the declared constraint.
    #[error("plugin '{plugin}' requires '{dependency}' {required}, found {found}")]
    IncompatibleVersion {
        plugin: PluginId,
        dependency: PluginId,
        required: String,
        found: String,
    },

    /// Two descriptors share an id.
    #[error("plugin '{0}' is already known")]
    DuplicatePlugin(PluginId),

    #[error("plugin '{0}' not found")]
    NotFound(PluginId),

    /// The requested lifecycle step is not allowed from the current state.
    #[error("plugin '{plugin}' cannot go from {from} to {to}")]
    InvalidTransition {
        plugin: PluginId,
        from: PluginState,
        to: PluginState,
    },

    /// Other enabled plugins still depend on this one.
    #[error("plugin '{plugin}' is still required by enabled plugins: {}", join(.dependents))]
    DependentsStillEnabled {
        plugin: PluginId,
        dependents: Vec<PluginId>,
    },

    /// Known plugins still declare a dependency on this one.
    #[error("plugin '{plugin}' is a dependency of: {}", join(.dependents))]
    StillDependedOn {
        plugin: PluginId,
        dependents: Vec<PluginId>,
    },

    /// A dependency must be enabled first.
    #[error("plugin '{plugin}' requires '{dependency}' to be enabled first")]
    DependencyNotEnabled {
        plugin: PluginId,
        dependency: PluginId,
    },

    /// The plugin's enable or disable hook failed.
    #[error("plugin '{plugin}' hook failed: {fault}")]
    HookFailed { plugin: PluginId, fault: HandlerFault },

    /// Registering the plugin's subscriptions or commands failed; nothing was kept.
    #[error("plugin '{plugin}' registration failed: {reason}")]
    Registration {
        plugin: PluginId,
        reason: RegistrationError,
    },
}

/// Cause of a [`PluginError::Registration`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Result type for plugin lifecycle operations.
pub type PluginResult<T> = Result<T, PluginError>;

fn join(ids: &[PluginId]) -> String {
    ids.iter()
        .map(PluginId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Queue Errors
// =============================================================================

/// Synchronous rejection by the [`OutboundQueue`](crate::queue::OutboundQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue holds `capacity` waiting requests already.
    #[error("outbound queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The queue was shut down.
    #[error("outbound queue is closed")]
    Closed,

    /// A consumer is already attached to this queue.
    #[error("outbound queue already has a worker")]
    WorkerRunning,
}

/// Terminal delivery failure after the retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delivery failed after {attempts} attempts: {reason}")]
pub struct DeliveryFailed {
    /// Total send attempts, including the first.
    pub attempts: u32,
    /// The last transient error reported by the connection.
    pub reason: String,
}

/// How a [`Ticket`](crate::queue::Ticket) resolves when its request was not delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The ticket was cancelled before sending.
    #[error("request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] DeliveryFailed),

    /// The connection reported a non-retryable failure.
    #[error("fatal send failure: {0}")]
    Fatal(String),

    /// The queue was shut down or dropped before the request was sent.
    #[error("outbound queue closed")]
    Closed,
}

/// Result type for enqueue calls.
pub type QueueResult<T> = Result<T, QueueError>;
