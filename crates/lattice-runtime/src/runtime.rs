//! Runtime orchestration.
//!
//! [`LatticeRuntime`] owns one of each component, wired together from a
//! [`LatticeConfig`]:
//!
//! ```text
//! connection.receive() ─► ingest ─► EventBus ─► CommandRouter ─► command handlers
//!                                       └──────► plugin subscriptions
//! plugins / commands ─► OutboundQueue ─► QueueWorker ─► connection.send()
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lattice_runtime::LatticeRuntime;
//!
//! let runtime = LatticeRuntime::builder()
//!     .config_file("config/lattice.toml")
//!     .plugin(PluginDescriptor::new("ping", Version::new(1, 0, 0), Ping))
//!     .build()?;
//!
//! // Until Ctrl+C / SIGTERM or the connection's inbound stream ends.
//! runtime.run(connection).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use lattice_core::{
    BoxedConnection, BoxedPermissionStore, EventBus, PermissionStore, TopicRegistry,
};
use lattice_framework::{
    CommandParser, CommandRouter, OutboundQueue, PluginDescriptor, PluginManager, QueueWorker,
};
use parking_lot::Mutex;
use tokio::signal;
use tracing::{Instrument, Level, debug, error, info, span, warn};

use crate::config::{ConfigLoader, LatticeConfig, validate_config};
use crate::error::RuntimeResult;
use crate::ingest::envelope_to_event;
use crate::logging;

/// The assembled bot: event bus, command router, plugin manager and outbound
/// queue, driven by one connection.
///
/// A runtime runs once; after [`run`](Self::run) returns its outbound queue
/// is closed and its plugins are disabled.
pub struct LatticeRuntime {
    config: LatticeConfig,
    bus: Arc<EventBus>,
    router: Arc<CommandRouter>,
    outbound: OutboundQueue,
    plugins: Arc<PluginManager>,
    /// Descriptors loaded when the runtime starts.
    pending: Mutex<Vec<PluginDescriptor>>,
}

impl LatticeRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration, initializing logging from it.
    ///
    /// Permissions come from the `permissions` section.
    pub fn from_config(config: LatticeConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);
        Self::assemble(config, None)
    }

    fn assemble(config: LatticeConfig, permissions: Option<BoxedPermissionStore>) -> RuntimeResult<Self> {
        validate_config(&config)?;

        let registry = config
            .bus
            .topics
            .iter()
            .fold(TopicRegistry::builtin(), |registry, topic| {
                registry.with_topic(topic.clone())
            });
        let bus = Arc::new(EventBus::new(registry).with_handler_timeout(config.bus.handler_timeout()));

        let permissions: BoxedPermissionStore = match permissions {
            Some(store) => store,
            None => Arc::new(config.permissions.to_store()),
        };
        let router = Arc::new(
            CommandRouter::new(CommandParser::new(config.commands.prefixes.clone()), permissions)
                .with_timeout(config.commands.timeout()),
        );
        router.attach(&bus, config.commands.priority)?;

        let outbound = OutboundQueue::new(config.outbound.to_queue_config());
        let plugins = Arc::new(
            PluginManager::new(Arc::clone(&bus), Arc::clone(&router))
                .with_outbound(outbound.clone())
                .with_settings(config.plugins.settings.clone())
                .with_disabled(config.plugins.disabled.iter().cloned())
                .with_hook_timeout(config.plugins.hook_timeout()),
        );

        info!(
            topics = bus.registry().len(),
            prefixes = ?config.commands.prefixes,
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config,
            bus,
            router,
            outbound,
            plugins,
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &LatticeConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Adds a plugin to load at startup.
    ///
    /// Once running, use [`PluginManager::discover`] instead.
    pub fn register_plugin(&self, descriptor: PluginDescriptor) {
        self.pending.lock().push(descriptor);
    }

    /// Runs until Ctrl+C / SIGTERM or the end of the inbound stream.
    pub async fn run(&self, connection: BoxedConnection) -> RuntimeResult<()> {
        self.run_until(connection, wait_for_shutdown()).await
    }

    /// Runs until `shutdown` resolves or the end of the inbound stream.
    ///
    /// Startup: the outbound worker starts, then all registered plugins load.
    /// Shutdown: inbound stops, plugins are disabled in reverse dependency
    /// order, and the outbound queue drains for up to `outbound.drain_timeout_ms`.
    pub async fn run_until<F>(&self, connection: BoxedConnection, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let worker = self.outbound.spawn(Arc::clone(&connection))?;

        let descriptors = std::mem::take(&mut *self.pending.lock());
        match self.plugins.load_all(descriptors).await {
            Ok(report) => {
                for (id, err) in &report.failed {
                    error!(plugin = %id, error = %err, "Plugin failed to start");
                }
                info!(
                    enabled = report.enabled.len(),
                    skipped = report.skipped.len(),
                    failed = report.failed.len(),
                    "Plugins loaded"
                );
            }
            Err(e) => {
                worker.shutdown().await;
                return Err(e.into());
            }
        }

        info!("Lattice runtime is now running");
        self.pump(&connection, shutdown).await;
        self.teardown(worker).await;
        Ok(())
    }

    async fn pump<F>(&self, connection: &BoxedConnection, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            let envelope = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return;
                }
                envelope = connection.receive() => envelope,
            };
            let Some(envelope) = envelope else {
                info!("Inbound stream ended");
                return;
            };

            let event = match envelope_to_event(self.bus.registry(), envelope) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Dropping inbound envelope");
                    continue;
                }
            };
            let report = self.bus.publish(event).await;
            for (subscription, fault) in report.faults() {
                warn!(
                    topic = %report.topic(),
                    %subscription,
                    error = %fault,
                    "Subscriber faulted"
                );
            }
            debug!(
                topic = %report.topic(),
                handlers = report.len(),
                "Event dispatched"
            );
        }
    }

    async fn teardown(&self, worker: QueueWorker) {
        async {
            for (id, err) in self.plugins.disable_all().await {
                error!(plugin = %id, error = %err, "Plugin failed to stop cleanly");
            }

            let abandoned = worker.drain(self.config.outbound.drain_timeout()).await;
            self.bus.clear();
            info!(abandoned, "Runtime stopped");
        }
        .instrument(span!(Level::INFO, "shutdown"))
        .await
    }
}

impl std::fmt::Debug for LatticeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatticeRuntime")
            .field("subscriptions", &self.bus.subscription_count())
            .field("commands", &self.router.len())
            .field("plugins", &self.plugins.len())
            .field("outbound", &self.outbound)
            .finish()
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`LatticeRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<LatticeConfig>,
    permissions: Option<BoxedPermissionStore>,
    plugins: Vec<PluginDescriptor>,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            config: None,
            permissions: None,
            plugins: Vec::new(),
            init_logging: true,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges a configuration over the loaded sources.
    pub fn merge(mut self, config: LatticeConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as is, skipping files and the environment.
    pub fn config(mut self, config: LatticeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the permission store built from the `permissions` section.
    pub fn permissions(mut self, store: impl PermissionStore) -> Self {
        self.permissions = Some(Arc::new(store));
        self
    }

    pub fn plugin(mut self, descriptor: PluginDescriptor) -> Self {
        self.plugins.push(descriptor);
        self
    }

    /// Leaves the global tracing subscriber alone.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    pub fn build(self) -> RuntimeResult<LatticeRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_loader.load()?,
        };
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let runtime = LatticeRuntime::assemble(config, self.permissions)?;
        for descriptor in self.plugins {
            runtime.register_plugin(descriptor);
        }
        Ok(runtime)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
