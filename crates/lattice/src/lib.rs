//! # Lattice
//!
//! An event-driven chat bot runtime: inbound events fan out over a prioritized
//! bus to plugin-owned handlers and commands, and replies leave through a
//! bounded, rate-limited outbound queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ Envelope ┌────────┐ Event ┌──────────┐ tier by tier ┌──────────────────────┐
//! │ Connection │─────────▶│ ingest │──────▶│ EventBus │─────────────▶│ CommandRouter        │
//! └────────────┘          └────────┘       └──────────┘              │ plugin subscriptions │
//!       ▲                                                            └──────────┬───────────┘
//!       │ send        ┌─────────────┐  token bucket  ┌───────────────┐          │ enqueue
//!       └─────────────│ QueueWorker │◀───────────────│ OutboundQueue │◀─────────┘
//!                     └─────────────┘                └───────────────┘
//! ```
//!
//! - **Event Bus**: topic and wildcard subscriptions, priority tiers, per-handler
//!   isolation with deadlines, a dispatch report per event
//! - **Command Router**: prefixes, names and aliases, permission levels, help text
//! - **Plugin Manager**: dependency-ordered loading, lifecycle states, atomic
//!   registration and clean removal of everything a plugin declared
//! - **Outbound Queue**: bounded priority queue, token-bucket rate limit,
//!   retries with exponential backoff
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lattice::prelude::*;
//!
//! struct Ping;
//!
//! #[async_trait]
//! impl Plugin for Ping {
//!     async fn on_enable(&self, ctx: &PluginContext) -> Result<(), BoxError> {
//!         ctx.command(Command::new("ping", |cmd: CommandContext| async move {
//!             info!(actor = ?cmd.actor_id(), "pong");
//!             Ok(())
//!         }));
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = LatticeRuntime::builder()
//!         .plugin(PluginDescriptor::new("ping", Version::new(1, 0, 0), Ping))
//!         .build()?;
//!     runtime.run(connect().await?).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: `lattice.toml` configuration files
//! - `yaml-config`: `lattice.yaml` configuration files
//! - `json-log`: JSON log output

pub use lattice_core as core;
pub use lattice_framework as framework;
pub use lattice_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use lattice::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use lattice_runtime::{LatticeConfig, LatticeRuntime};

    // Plugins
    pub use lattice_framework::{
        Dependency, Plugin, PluginContext, PluginDescriptor, PluginManager, PluginState, Version,
        VersionReq,
    };

    // Events and the bus
    pub use lattice_core::{
        BoxError, DispatchReport, Event, EventBus, HandlerFault, HandlerOutcome, Subscriber, Topic,
        TopicPattern, topics,
    };

    // Commands and permissions
    pub use lattice_core::{PermissionLevel, PermissionStore, StaticPermissionStore};
    pub use lattice_framework::{Command, CommandContext, CommandRouter, RouteOutcome};

    // Outbound delivery
    pub use lattice_core::{Ack, Connection, Envelope, SendError, SendResult};
    pub use lattice_framework::{DeliveryError, OutboundQueue, QueueError, Ticket};

    pub use lattice_core::async_trait;
    pub use lattice_runtime::prelude::*;
}
