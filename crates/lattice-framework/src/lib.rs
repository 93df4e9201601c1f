//! # Lattice Framework
//!
//! The components a bot is assembled from, built on `lattice-core`.
//!
//! This layer provides:
//! - Command routing: prefix parsing, name and alias lookup, permission gating
//!   and generated help text ([`CommandRouter`])
//! - Plugin management: dependency-ordered loading, lifecycle states and
//!   ownership of everything a plugin registers ([`PluginManager`])
//! - Outbound delivery: a bounded priority queue with rate limiting and retry
//!   backoff, drained into a connection by one worker ([`OutboundQueue`])

pub mod command;
pub mod error;
pub mod plugin;
pub mod queue;

pub use command::{
    BoxedCommandHandler, Command, CommandContext, CommandHandler, CommandParser, CommandRouter,
    DEFAULT_COMMAND_TIMEOUT, ParsedCommand, RouteOutcome,
};
pub use error::{
    CommandError, CommandResult, DeliveryError, DeliveryFailed, PluginError, PluginResult,
    QueueError, QueueResult, RegistrationError,
};
pub use plugin::{
    DEFAULT_HOOK_TIMEOUT, Dependency, LoadReport, Plugin, PluginContext, PluginDescriptor,
    PluginManager, PluginState, Version, VersionError, VersionReq,
};
pub use queue::{
    DeliveryResult, OutboundQueue, OutboundRequest, QueueConfig, QueueWorker, RequestId,
    RetryConfig, Ticket, TokenBucket,
};
