//! Plugin descriptors, dependency resolution and lifecycle management.
//!
//! A plugin is an implementation of [`Plugin`] wrapped in a
//! [`PluginDescriptor`] that names it, versions it and lists its
//! dependencies. The [`PluginManager`] validates the dependency graph, then
//! drives each plugin through the [`PluginState`] machine, registering and
//! removing everything the plugin declared as one unit.
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice_framework::plugin::{Plugin, PluginContext, PluginDescriptor, Version};
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Plugin for Greeter {
//!     async fn on_enable(&self, ctx: &PluginContext) -> Result<(), BoxError> {
//!         ctx.subscribe(Subscriber::new("notice.member_increase", |event: Arc<Event>| async move {
//!             tracing::info!(source = ?event.source_id(), "welcome!");
//!             Ok(())
//!         }));
//!         Ok(())
//!     }
//! }
//!
//! manager.load_all(vec![PluginDescriptor::new("greeter", Version::new(1, 0, 0), Greeter)]).await?;
//! ```

mod context;
mod descriptor;
mod graph;
mod manager;
mod state;
mod version;

use async_trait::async_trait;
use lattice_core::BoxError;

pub use context::PluginContext;
pub use descriptor::{Dependency, PluginDescriptor};
pub use manager::{DEFAULT_HOOK_TIMEOUT, LoadReport, PluginManager};
pub use state::PluginState;
pub use version::{Version, VersionError, VersionReq};

/// Entry point of a plugin.
///
/// Both hooks run isolated on their own task with the manager's hook deadline;
/// a panic or timeout counts as a failed hook.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Declares subscriptions and commands on `ctx` and sets up plugin state.
    async fn on_enable(&self, ctx: &PluginContext) -> Result<(), BoxError>;

    /// Releases plugin state. Runs after the plugin's registrations are gone.
    async fn on_disable(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let _ = ctx;
        Ok(())
    }
}
