//! Plugin lifecycle management.
//!
//! [`PluginManager`] is the single owner of every known plugin. It:
//!
//! - Validates the whole dependency graph (duplicates, missing dependencies,
//!   version constraints, cycles) before admitting any descriptor, so a bad
//!   graph changes nothing.
//! - Enables plugins in topological order (dependencies first) and disables
//!   them in reverse order on [`disable_all`](PluginManager::disable_all).
//! - Runs each plugin's hooks isolated and bounded by the hook deadline.
//! - Registers a plugin's declared subscriptions and commands as one unit
//!   after its enable hook succeeds, and removes all of them before its
//!   disable hook runs.
//!
//! Lifecycle operations are serialized; state queries never wait for them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use lattice_core::{EventBus, HandlerFault, HandlerOutcome, PluginId, Subscriber, run_guarded};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, error, info, span, warn};

use super::graph::topological_layers;
use super::{PluginContext, PluginDescriptor, PluginState};
use crate::command::{Command, CommandRouter};
use crate::error::{PluginError, PluginResult, RegistrationError};
use crate::queue::OutboundQueue;

/// Default deadline for `on_enable` / `on_disable` hooks.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// What [`PluginManager::load_all`] did with each admitted plugin.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Enabled, in load order.
    pub enabled: Vec<PluginId>,
    /// Left in `Resolved`: disabled by configuration or a dependency did not come up.
    pub skipped: Vec<PluginId>,
    /// Went to `Failed`.
    pub failed: Vec<(PluginId, PluginError)>,
}

impl LoadReport {
    /// Returns `true` if every admitted plugin was enabled.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }
}

struct PluginEntry {
    descriptor: PluginDescriptor,
    state: PluginState,
    /// The context of the current enablement, reused by the disable hook.
    context: Option<PluginContext>,
}

/// Central manager for plugin discovery, dependency ordering and lifecycle.
///
/// Constructed with the event bus and command router it registers into; those
/// are handed to every plugin through its [`PluginContext`].
pub struct PluginManager {
    bus: Arc<EventBus>,
    router: Arc<CommandRouter>,
    outbound: Option<OutboundQueue>,
    /// Per-plugin config sections, keyed by plugin id.
    settings: HashMap<String, Value>,
    /// Ids that `load_all` resolves but never enables.
    disabled: HashSet<PluginId>,
    hook_timeout: Duration,
    entries: RwLock<Vec<PluginEntry>>,
    lifecycle: AsyncMutex<()>,
}

impl PluginManager {
    pub fn new(bus: Arc<EventBus>, router: Arc<CommandRouter>) -> Self {
        Self {
            bus,
            router,
            outbound: None,
            settings: HashMap::new(),
            disabled: HashSet::new(),
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            entries: RwLock::new(Vec::new()),
            lifecycle: AsyncMutex::new(()),
        }
    }

    /// Makes the outbound queue available to plugins (builder pattern).
    pub fn with_outbound(mut self, outbound: OutboundQueue) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Sets the per-plugin configuration sections.
    pub fn with_settings(mut self, settings: HashMap<String, Value>) -> Self {
        self.settings = settings;
        self
    }

    /// Marks plugins that `load_all` should leave disabled.
    pub fn with_disabled<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PluginId>,
    {
        self.disabled.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// Returns the state of `id`, or `None` if it is unknown.
    pub fn state(&self, id: &PluginId) -> Option<PluginState> {
        self.entries
            .read()
            .iter()
            .find(|e| e.descriptor.id() == id)
            .map(|e| e.state)
    }

    /// Every known plugin with its state, in discovery order.
    pub fn plugins(&self) -> Vec<(PluginId, PluginState)> {
        self.entries
            .read()
            .iter()
            .map(|e| (e.descriptor.id().clone(), e.state))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ─── Discovery ───────────────────────────────────────────────────────────

    /// Admits `descriptors`, then enables them in dependency order.
    ///
    /// Graph errors are returned before anything is admitted. Failures while
    /// enabling an individual plugin are collected in the [`LoadReport`];
    /// plugins depending on a plugin that did not come up stay `Resolved`.
    pub async fn load_all(&self, descriptors: Vec<PluginDescriptor>) -> PluginResult<LoadReport> {
        let _guard = self.lifecycle.lock().await;
        let order = self.admit(descriptors)?;

        let mut report = LoadReport::default();
        for id in order {
            if self.disabled.contains(&id) {
                info!(plugin = %id, "Plugin disabled by configuration, not enabling");
                report.skipped.push(id);
                continue;
            }
            if let Some(dep) = self.first_dependency_not_enabled(&id) {
                warn!(plugin = %id, dependency = %dep, "Dependency not enabled, skipping plugin");
                report.skipped.push(id);
                continue;
            }
            match self.enable_locked(&id).await {
                Ok(()) => report.enabled.push(id),
                Err(e) => report.failed.push((id, e)),
            }
        }

        info!(
            enabled = report.enabled.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Plugins loaded"
        );
        Ok(report)
    }

    /// Admits one descriptor at runtime without enabling it.
    pub async fn discover(&self, descriptor: PluginDescriptor) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.admit(vec![descriptor]).map(|_| ())
    }

    /// Forgets a plugin that is not active.
    ///
    /// Enabled plugins must be disabled first, and every plugin that depends
    /// on it must already be removed.
    pub async fn remove(&self, id: &PluginId) -> PluginResult<PluginDescriptor> {
        let _guard = self.lifecycle.lock().await;
        let mut entries = self.entries.write();
        let pos = entries
            .iter()
            .position(|e| e.descriptor.id() == id)
            .ok_or_else(|| PluginError::NotFound(id.clone()))?;

        let state = entries[pos].state;
        if matches!(
            state,
            PluginState::Loading | PluginState::Enabled | PluginState::Disabling
        ) {
            return Err(PluginError::InvalidTransition {
                plugin: id.clone(),
                from: state,
                to: PluginState::Disabled,
            });
        }
        let dependents: Vec<PluginId> = entries
            .iter()
            .filter(|e| e.descriptor.depends_on_id(id))
            .map(|e| e.descriptor.id().clone())
            .collect();
        if !dependents.is_empty() {
            return Err(PluginError::StillDependedOn {
                plugin: id.clone(),
                dependents,
            });
        }

        let entry = entries.remove(pos);
        info!(plugin = %id, "Plugin removed");
        Ok(entry.descriptor)
    }

    /// Validates the graph of known + new descriptors and admits the new ones
    /// as `Resolved`. Returns their ids in load order.
    fn admit(&self, descriptors: Vec<PluginDescriptor>) -> PluginResult<Vec<PluginId>> {
        let mut entries = self.entries.write();
        let known = entries.len();

        let layers = {
            let combined: Vec<&PluginDescriptor> = entries
                .iter()
                .map(|e| &e.descriptor)
                .chain(descriptors.iter())
                .collect();
            topological_layers(&combined).inspect_err(|e| error!(error = %e, "Plugin graph rejected"))?
        };

        for descriptor in descriptors {
            debug!(plugin = %descriptor.id(), version = %descriptor.version(), "Plugin discovered");
            entries.push(PluginEntry {
                descriptor,
                state: PluginState::Discovered,
                context: None,
            });
        }

        // Layer order guarantees dependencies are resolved before dependents.
        let order: Vec<usize> = layers.into_iter().flatten().filter(|&i| i >= known).collect();
        for &i in &order {
            entries[i].state = PluginState::Resolved;
            debug!(plugin = %entries[i].descriptor.id(), "Plugin resolved");
        }
        Ok(order
            .into_iter()
            .map(|i| entries[i].descriptor.id().clone())
            .collect())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Runs the plugin's enable hook and registers its declarations.
    ///
    /// All dependencies must be `Enabled`. On any failure the plugin goes to
    /// `Failed` with nothing registered.
    pub async fn enable(&self, id: &PluginId) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.enable_locked(id).await
    }

    /// Removes the plugin's registrations, then runs its disable hook.
    ///
    /// Rejected with [`PluginError::DependentsStillEnabled`] while any enabled
    /// plugin depends on it. A failing hook leaves the plugin `Failed`, but
    /// its registrations are gone either way.
    pub async fn disable(&self, id: &PluginId) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.disable_locked(id).await
    }

    /// Disables and re-enables a plugin.
    pub async fn reload(&self, id: &PluginId) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.disable_locked(id).await?;
        self.enable_locked(id).await
    }

    /// Disables every enabled plugin, dependents before their dependencies.
    ///
    /// Returns the plugins whose disable failed; they end up `Failed`.
    pub async fn disable_all(&self) -> Vec<(PluginId, PluginError)> {
        let _guard = self.lifecycle.lock().await;

        let order: Vec<PluginId> = {
            let entries = self.entries.read();
            let descriptors: Vec<&PluginDescriptor> = entries.iter().map(|e| &e.descriptor).collect();
            let indices: Vec<usize> = match topological_layers(&descriptors) {
                Ok(layers) => layers.into_iter().flatten().collect(),
                Err(e) => {
                    // Unreachable while admit and remove keep the graph closed.
                    warn!(error = %e, "Plugin graph inconsistent, disabling in discovery order");
                    (0..entries.len()).collect()
                }
            };
            indices
                .into_iter()
                .rev()
                .filter(|&i| entries[i].state.is_enabled())
                .map(|i| entries[i].descriptor.id().clone())
                .collect()
        };

        let mut failures = Vec::new();
        for id in order {
            if let Err(e) = self.disable_locked(&id).await {
                failures.push((id, e));
            }
        }
        failures
    }

    async fn enable_locked(&self, id: &PluginId) -> PluginResult<()> {
        let (descriptor, from) = self.snapshot(id)?;
        if !from.can_transition_to(PluginState::Loading) {
            return Err(PluginError::InvalidTransition {
                plugin: id.clone(),
                from,
                to: PluginState::Loading,
            });
        }
        for dep in descriptor.dependencies() {
            match self.state(&dep.id) {
                Some(PluginState::Enabled) => {}
                Some(_) => {
                    return Err(PluginError::DependencyNotEnabled {
                        plugin: id.clone(),
                        dependency: dep.id.clone(),
                    });
                }
                None => {
                    return Err(PluginError::MissingDependency {
                        plugin: id.clone(),
                        dependency: dep.id.clone(),
                    });
                }
            }
        }

        self.set_state(id, PluginState::Loading, None);
        let span = span!(Level::INFO, "plugin_enable", plugin = %id);

        async {
            let config = self
                .settings
                .get(id.as_str())
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::default()));
            let ctx = PluginContext::new(
                id.clone(),
                Arc::clone(&self.bus),
                Arc::clone(&self.router),
                self.outbound.clone(),
                Arc::new(config),
            );

            let plugin = Arc::clone(descriptor.entry());
            let hook_ctx = ctx.clone();
            let outcome = run_guarded(
                async move { plugin.on_enable(&hook_ctx).await },
                self.hook_timeout,
                CancellationToken::new(),
            )
            .await;
            let (subscribers, commands) = ctx.seal();

            if let Some(fault) = hook_fault(outcome) {
                self.purge(id);
                self.set_state(id, PluginState::Failed, None);
                error!(error = %fault, "Plugin enable hook failed");
                return Err(PluginError::HookFailed {
                    plugin: id.clone(),
                    fault,
                });
            }

            if let Err(reason) = self.register(id, subscribers, commands) {
                self.purge(id);
                self.set_state(id, PluginState::Failed, None);
                error!(error = %reason, "Plugin registration failed, rolled back");
                return Err(PluginError::Registration {
                    plugin: id.clone(),
                    reason,
                });
            }

            self.set_state(id, PluginState::Enabled, Some(ctx));
            info!("Plugin enabled");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn disable_locked(&self, id: &PluginId) -> PluginResult<()> {
        let (descriptor, from) = self.snapshot(id)?;
        if !from.can_transition_to(PluginState::Disabling) {
            return Err(PluginError::InvalidTransition {
                plugin: id.clone(),
                from,
                to: PluginState::Disabling,
            });
        }
        let dependents = enabled_dependents(&self.entries.read(), id);
        if !dependents.is_empty() {
            return Err(PluginError::DependentsStillEnabled {
                plugin: id.clone(),
                dependents,
            });
        }

        let ctx = self.take_context(id);
        self.set_state(id, PluginState::Disabling, None);
        let span = span!(Level::INFO, "plugin_disable", plugin = %id);

        async {
            self.purge(id);

            let ctx = ctx.unwrap_or_else(|| {
                PluginContext::new(
                    id.clone(),
                    Arc::clone(&self.bus),
                    Arc::clone(&self.router),
                    self.outbound.clone(),
                    Arc::new(Value::Object(Map::default())),
                )
            });
            let plugin = Arc::clone(descriptor.entry());
            let outcome = run_guarded(
                async move { plugin.on_disable(&ctx).await },
                self.hook_timeout,
                CancellationToken::new(),
            )
            .await;

            if let Some(fault) = hook_fault(outcome) {
                self.set_state(id, PluginState::Failed, None);
                error!(error = %fault, "Plugin disable hook failed");
                return Err(PluginError::HookFailed {
                    plugin: id.clone(),
                    fault,
                });
            }

            self.set_state(id, PluginState::Disabled, None);
            info!("Plugin disabled");
            Ok(())
        }
        .instrument(span)
        .await
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers declarations with nothing left behind on failure.
    ///
    /// Topics are validated before anything is registered, commands go in as
    /// one batch, subscriptions as one swap.
    fn register(
        &self,
        id: &PluginId,
        subscribers: Vec<Subscriber>,
        commands: Vec<Command>,
    ) -> Result<(), RegistrationError> {
        for subscriber in &subscribers {
            self.bus.registry().validate(subscriber.pattern())?;
        }
        let (sub_count, cmd_count) = (subscribers.len(), commands.len());

        self.router.register_all(commands)?;
        if let Err(e) = self.bus.subscribe_all(subscribers) {
            self.router.unregister_all(id);
            return Err(e.into());
        }

        debug!(subscriptions = sub_count, commands = cmd_count, "Plugin registrations applied");
        Ok(())
    }

    fn purge(&self, id: &PluginId) {
        let subscriptions = self.bus.unsubscribe_all(id);
        let commands = self.router.unregister_all(id);
        debug!(subscriptions, commands, "Plugin registrations removed");
    }

    // ─── Entry helpers ───────────────────────────────────────────────────────

    fn snapshot(&self, id: &PluginId) -> PluginResult<(PluginDescriptor, PluginState)> {
        self.entries
            .read()
            .iter()
            .find(|e| e.descriptor.id() == id)
            .map(|e| (e.descriptor.clone(), e.state))
            .ok_or_else(|| PluginError::NotFound(id.clone()))
    }

    fn set_state(&self, id: &PluginId, state: PluginState, context: Option<PluginContext>) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.iter_mut().find(|e| e.descriptor.id() == id) {
            debug!(plugin = %id, from = %entry.state, to = %state, "Plugin state changed");
            entry.state = state;
            entry.context = context;
        }
    }

    fn take_context(&self, id: &PluginId) -> Option<PluginContext> {
        self.entries
            .write()
            .iter_mut()
            .find(|e| e.descriptor.id() == id)
            .and_then(|e| e.context.take())
    }

    fn first_dependency_not_enabled(&self, id: &PluginId) -> Option<PluginId> {
        let entries = self.entries.read();
        let entry = entries.iter().find(|e| e.descriptor.id() == id)?;
        entry
            .descriptor
            .dependencies()
            .iter()
            .find(|dep| {
                !entries
                    .iter()
                    .any(|e| e.descriptor.id() == &dep.id && e.state.is_enabled())
            })
            .map(|dep| dep.id.clone())
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugins())
            .field("disabled", &self.disabled)
            .field("hook_timeout", &self.hook_timeout)
            .finish_non_exhaustive()
    }
}

fn enabled_dependents(entries: &[PluginEntry], id: &PluginId) -> Vec<PluginId> {
    entries
        .iter()
        .filter(|e| e.state.is_enabled() && e.descriptor.depends_on_id(id))
        .map(|e| e.descriptor.id().clone())
        .collect()
}

fn hook_fault(outcome: HandlerOutcome) -> Option<HandlerFault> {
    match outcome {
        HandlerOutcome::Completed => None,
        HandlerOutcome::Faulted(fault) => Some(fault),
        HandlerOutcome::Cancelled => Some(HandlerFault::Error("hook was cancelled".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandContext, CommandParser};
    use crate::plugin::{Plugin, Version};
    use async_trait::async_trait;
    use lattice_core::{BoxError, Event, StaticPermissionStore, topics};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Declares one subscription on `message.group` and, optionally, commands.
    #[derive(Clone, Default)]
    struct TestPlugin {
        name: &'static str,
        commands: Vec<(&'static str, &'static str)>,
        fail_enable: bool,
        fail_disable: bool,
        hits: Arc<AtomicUsize>,
        log: Log,
    }

    impl TestPlugin {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        async fn on_enable(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            self.log.lock().push(format!("enable:{}", self.name));
            let hits = Arc::clone(&self.hits);
            ctx.subscribe(Subscriber::new(topics::MESSAGE_GROUP, move |_e: Arc<Event>| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), BoxError>(())
                }
            }));
            for (name, alias) in &self.commands {
                ctx.command(
                    Command::new(*name, |_ctx: CommandContext| async { Ok::<(), BoxError>(()) })
                        .alias(*alias),
                );
            }
            if self.fail_enable {
                return Err("enable failed".into());
            }
            Ok(())
        }

        async fn on_disable(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
            self.log.lock().push(format!("disable:{}", self.name));
            if self.fail_disable {
                return Err("disable failed".into());
            }
            Ok(())
        }
    }

    fn desc(plugin: TestPlugin, deps: &[&str]) -> PluginDescriptor {
        deps.iter().fold(
            PluginDescriptor::new(plugin.name, Version::new(1, 0, 0), plugin),
            |d, dep| d.depends_on(*dep),
        )
    }

    fn manager() -> PluginManager {
        let bus = Arc::new(EventBus::default());
        let router = Arc::new(CommandRouter::new(
            CommandParser::default(),
            Arc::new(StaticPermissionStore::default()),
        ));
        PluginManager::new(bus, router)
    }

    fn id(s: &str) -> PluginId {
        PluginId::from(s)
    }

    #[tokio::test]
    async fn test_load_all_in_dependency_order() {
        let log = Log::default();
        let manager = manager();
        let report = manager
            .load_all(vec![
                desc(TestPlugin::new("app", &log), &["db"]),
                desc(TestPlugin::new("db", &log), &["log"]),
                desc(TestPlugin::new("log", &log), &[]),
            ])
            .await
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.enabled, vec![id("log"), id("db"), id("app")]);
        assert_eq!(*log.lock(), vec!["enable:log", "enable:db", "enable:app"]);
        assert_eq!(manager.bus.subscription_count(), 3);

        let failures = manager.disable_all().await;
        assert!(failures.is_empty());
        assert_eq!(
            log.lock()[3..],
            ["disable:app", "disable:db", "disable:log"]
        );
        assert_eq!(manager.bus.subscription_count(), 0);
        assert_eq!(manager.state(&id("db")), Some(PluginState::Disabled));
    }

    #[tokio::test]
    async fn test_cycle_rejects_whole_set() {
        let log = Log::default();
        let manager = manager();
        let err = manager
            .load_all(vec![
                desc(TestPlugin::new("a", &log), &["b"]),
                desc(TestPlugin::new("b", &log), &["a"]),
                desc(TestPlugin::new("c", &log), &[]),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, PluginError::DependencyCycle { .. }));
        assert!(manager.is_empty());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_before_loading() {
        let log = Log::default();
        let manager = manager();
        let result = manager
            .load_all(vec![
                desc(TestPlugin::new("ok", &log), &[]),
                desc(TestPlugin::new("needy", &log), &["ghost"]),
            ])
            .await;
        assert_eq!(
            result.unwrap_err(),
            PluginError::MissingDependency {
                plugin: id("needy"),
                dependency: id("ghost")
            }
        );
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_alias_collision_rolls_back_second_plugin() {
        let log = Log::default();
        let manager = manager();

        let first = TestPlugin {
            commands: vec![("mycmd", "mc")],
            ..TestPlugin::new("first", &log)
        };
        let second = TestPlugin {
            commands: vec![("fresh", "f"), ("other", "mc")],
            ..TestPlugin::new("second", &log)
        };
        let second_hits = Arc::clone(&second.hits);

        let report = manager
            .load_all(vec![desc(first, &[]), desc(second, &[])])
            .await
            .unwrap();

        assert_eq!(report.enabled, vec![id("first")]);
        assert!(matches!(
            &report.failed[..],
            [(failed, PluginError::Registration { .. })] if failed == &id("second")
        ));
        assert_eq!(manager.state(&id("second")), Some(PluginState::Failed));

        // Nothing of the failed plugin is observable.
        assert!(manager.router.lookup("fresh").is_none());
        assert_eq!(manager.router.lookup("mc").unwrap().name(), "mycmd");
        manager
            .bus
            .publish(Event::new(topics::MESSAGE_GROUP, json!({})))
            .await;
        assert_eq!(second_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_enable_failure_is_contained() {
        let log = Log::default();
        let manager = manager();
        let broken = TestPlugin {
            fail_enable: true,
            ..TestPlugin::new("broken", &log)
        };
        let report = manager
            .load_all(vec![
                desc(broken, &[]),
                desc(TestPlugin::new("dependent", &log), &["broken"]),
                desc(TestPlugin::new("healthy", &log), &[]),
            ])
            .await
            .unwrap();

        assert_eq!(report.enabled, vec![id("healthy")]);
        assert_eq!(report.skipped, vec![id("dependent")]);
        assert_eq!(manager.state(&id("broken")), Some(PluginState::Failed));
        assert_eq!(manager.state(&id("dependent")), Some(PluginState::Resolved));
        // The subscription declared before the failure was never registered.
        assert_eq!(manager.bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_disable_rejected_while_dependents_enabled() {
        let log = Log::default();
        let manager = manager();
        manager
            .load_all(vec![
                desc(TestPlugin::new("base", &log), &[]),
                desc(TestPlugin::new("top", &log), &["base"]),
            ])
            .await
            .unwrap();

        assert_eq!(
            manager.disable(&id("base")).await,
            Err(PluginError::DependentsStillEnabled {
                plugin: id("base"),
                dependents: vec![id("top")]
            })
        );
        assert_ok!(manager.disable(&id("top")).await);
        assert_ok!(manager.disable(&id("base")).await);

        // Re-enable from Disabled, dependencies first.
        assert_err!(manager.enable(&id("top")).await);
        assert_ok!(manager.enable(&id("base")).await);
        assert_ok!(manager.enable(&id("top")).await);
        assert_eq!(manager.bus.subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_disable_still_removes_registrations() {
        let log = Log::default();
        let manager = manager();
        let plugin = TestPlugin {
            fail_disable: true,
            commands: vec![("bye", "b")],
            ..TestPlugin::new("sticky", &log)
        };
        manager.load_all(vec![desc(plugin, &[])]).await.unwrap();
        assert_eq!(manager.router.len(), 1);

        let err = manager.disable(&id("sticky")).await.unwrap_err();
        assert!(matches!(err, PluginError::HookFailed { .. }));
        assert_eq!(manager.state(&id("sticky")), Some(PluginState::Failed));
        assert_eq!(manager.bus.subscription_count(), 0);
        assert!(manager.router.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_list_and_invalid_transitions() {
        let log = Log::default();
        let manager = manager().with_disabled(["muted"]);
        let report = manager
            .load_all(vec![desc(TestPlugin::new("muted", &log), &[])])
            .await
            .unwrap();
        assert_eq!(report.skipped, vec![id("muted")]);
        assert_eq!(manager.state(&id("muted")), Some(PluginState::Resolved));

        assert!(matches!(
            manager.disable(&id("muted")).await,
            Err(PluginError::InvalidTransition {
                from: PluginState::Resolved,
                to: PluginState::Disabling,
                ..
            })
        ));
        assert_ok!(manager.enable(&id("muted")).await);
        assert!(matches!(
            manager.enable(&id("muted")).await,
            Err(PluginError::InvalidTransition { .. })
        ));
        assert_eq!(
            manager.enable(&id("nobody")).await,
            Err(PluginError::NotFound(id("nobody")))
        );
    }

    #[tokio::test]
    async fn test_reload_discover_remove() {
        let log = Log::default();
        let manager = manager();
        manager
            .load_all(vec![desc(TestPlugin::new("core", &log), &[])])
            .await
            .unwrap();

        assert_ok!(manager.reload(&id("core")).await);
        assert_eq!(
            *log.lock(),
            vec!["enable:core", "disable:core", "enable:core"]
        );
        assert_eq!(manager.bus.subscription_count(), 1);

        assert_ok!(manager.discover(desc(TestPlugin::new("late", &log), &["core"])).await);
        assert_eq!(manager.state(&id("late")), Some(PluginState::Resolved));
        assert_eq!(
            manager.discover(desc(TestPlugin::new("late", &log), &[])).await,
            Err(PluginError::DuplicatePlugin(id("late")))
        );
        assert_ok!(manager.enable(&id("late")).await);

        assert!(manager.remove(&id("late")).await.is_err());
        assert_ok!(manager.disable(&id("late")).await);
        let removed = manager.remove(&id("late")).await.unwrap();
        assert_eq!(removed.id(), &id("late"));
        assert_eq!(manager.state(&id("late")), None);
    }

    #[tokio::test]
    async fn test_remove_refuses_while_depended_on() {
        let log = Log::default();
        let manager = manager();
        manager
            .load_all(vec![
                desc(TestPlugin::new("a", &log), &[]),
                desc(TestPlugin::new("b", &log), &["a"]),
            ])
            .await
            .unwrap();
        assert_ok!(manager.disable(&id("b")).await);
        assert_ok!(manager.disable(&id("a")).await);

        assert_eq!(
            manager.remove(&id("a")).await.unwrap_err(),
            PluginError::StillDependedOn {
                plugin: id("a"),
                dependents: vec![id("b")],
            }
        );
        assert_eq!(manager.state(&id("a")), Some(PluginState::Disabled));

        // The graph stays closed, so unrelated plugins are still admitted.
        assert_ok!(manager.discover(desc(TestPlugin::new("unrelated", &log), &[])).await);
        assert_ok!(manager.enable(&id("unrelated")).await);

        assert_ok!(manager.remove(&id("b")).await);
        assert_ok!(manager.remove(&id("a")).await);
        assert_ok!(manager.discover(desc(TestPlugin::new("late", &log), &[])).await);
        assert!(manager.disable_all().await.is_empty());
        assert_eq!(manager.state(&id("unrelated")), Some(PluginState::Disabled));
    }

    #[tokio::test]
    async fn test_plugin_config_section() {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct GreeterConfig {
            greeting: String,
        }

        struct Greeter(Arc<Mutex<String>>);

        #[async_trait]
        impl Plugin for Greeter {
            async fn on_enable(&self, ctx: &PluginContext) -> Result<(), BoxError> {
                let cfg: GreeterConfig = ctx.config()?;
                *self.0.lock() = cfg.greeting;
                Ok(())
            }
        }

        let seen = Arc::new(Mutex::new(String::new()));
        let manager = manager().with_settings(HashMap::from([(
            "greeter".to_string(),
            json!({ "greeting": "hello" }),
        )]));
        manager
            .load_all(vec![PluginDescriptor::new(
                "greeter",
                Version::new(0, 1, 0),
                Greeter(Arc::clone(&seen)),
            )])
            .await
            .unwrap();
        assert_eq!(*seen.lock(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_hook_times_out() {
        struct Hang;

        #[async_trait]
        impl Plugin for Hang {
            async fn on_enable(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }

        let manager = manager().with_hook_timeout(Duration::from_millis(10));
        let report = manager
            .load_all(vec![PluginDescriptor::new("hang", Version::new(1, 0, 0), Hang)])
            .await
            .unwrap();
        assert!(matches!(
            &report.failed[..],
            [(_, PluginError::HookFailed { fault: HandlerFault::Timeout(_), .. })]
        ));
    }
}
