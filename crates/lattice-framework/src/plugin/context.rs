use std::sync::Arc;

use lattice_core::{EventBus, PluginId, Subscriber};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::command::{Command, CommandRouter};
use crate::queue::OutboundQueue;

#[derive(Default)]
struct Declarations {
    subscribers: Vec<Subscriber>,
    commands: Vec<Command>,
    sealed: bool,
}

/// Handed to a plugin's lifecycle hooks.
///
/// During [`Plugin::on_enable`](super::Plugin::on_enable) the plugin declares
/// its subscriptions and commands here; the manager registers them all at once
/// after the hook returns. Declarations made after that point are ignored.
///
/// The context also gives access to the shared services a plugin typically
/// captures in its handlers: the event bus (for publishing), the command
/// router (for help text) and the outbound queue.
#[derive(Clone)]
pub struct PluginContext {
    id: PluginId,
    bus: Arc<EventBus>,
    router: Arc<CommandRouter>,
    outbound: Option<OutboundQueue>,
    config: Arc<Value>,
    declarations: Arc<Mutex<Declarations>>,
}

impl PluginContext {
    pub(crate) fn new(
        id: PluginId,
        bus: Arc<EventBus>,
        router: Arc<CommandRouter>,
        outbound: Option<OutboundQueue>,
        config: Arc<Value>,
    ) -> Self {
        Self {
            id,
            bus,
            router,
            outbound,
            config,
            declarations: Arc::default(),
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    /// The outbound queue, when the host runs one.
    pub fn outbound(&self) -> Option<&OutboundQueue> {
        self.outbound.as_ref()
    }

    /// Deserialises this plugin's configuration section into `T`.
    ///
    /// A plugin without a section sees an empty object, so a `T` with
    /// `#[serde(default)]` always deserialises.
    pub fn config<T>(&self) -> serde_json::Result<T>
    where
        T: DeserializeOwned,
    {
        T::deserialize(self.config.as_ref())
    }

    pub fn raw_config(&self) -> &Value {
        &self.config
    }

    /// Declares an event subscription owned by this plugin.
    pub fn subscribe(&self, subscriber: Subscriber) {
        let mut decl = self.declarations.lock();
        if decl.sealed {
            warn!(plugin = %self.id, "Subscription declared after enable, ignored");
            return;
        }
        decl.subscribers.push(subscriber.owner(&self.id));
    }

    /// Declares a command owned by this plugin.
    pub fn command(&self, command: Command) {
        let mut decl = self.declarations.lock();
        if decl.sealed {
            warn!(plugin = %self.id, command = %command.name(), "Command declared after enable, ignored");
            return;
        }
        decl.commands.push(command.owner(&self.id));
    }

    /// Takes the declarations and refuses any further ones.
    pub(crate) fn seal(&self) -> (Vec<Subscriber>, Vec<Command>) {
        let mut decl = self.declarations.lock();
        decl.sealed = true;
        (
            std::mem::take(&mut decl.subscribers),
            std::mem::take(&mut decl.commands),
        )
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
