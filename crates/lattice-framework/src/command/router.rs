use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lattice_core::{
    BoxError, BoxedPermissionStore, BusResult, Event, EventBus, HandlerOutcome, PermissionLevel,
    PluginId, Subscriber, SubscriptionHandle, run_guarded,
};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, info, span};

use super::parser::CommandParser;
use super::{Command, CommandContext, DEFAULT_COMMAND_TIMEOUT};
use crate::error::{CommandError, CommandResult};

/// Result of routing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Not a message, no text, or no prefix matched.
    NotACommand,
    /// A prefix matched but the word is no known name or alias.
    UnknownCommand { name: String },
    /// The caller's level is below the command's requirement; the handler did not run.
    PermissionDenied {
        command: String,
        required: PermissionLevel,
        actual: PermissionLevel,
    },
    /// The handler ran; `outcome` says how it ended.
    Executed {
        command: String,
        outcome: HandlerOutcome,
    },
}

#[derive(Default)]
struct CommandTable {
    /// Canonical name → command.
    commands: HashMap<String, Arc<Command>>,
    /// Every name and alias → canonical name.
    words: HashMap<String, String>,
}

impl CommandTable {
    /// Checks `command` against the table, ignoring a same-named command owned
    /// by the same plugin (which the registration replaces).
    fn check(&self, command: &Command) -> CommandResult<()> {
        for word in command.words() {
            if word.is_empty() || word.contains(char::is_whitespace) {
                return Err(CommandError::InvalidName(word.to_string()));
            }
        }

        let replaced = self.replaceable(command);
        if let Some(existing) = self.words.get(command.name())
            && replaced != Some(existing.as_str())
        {
            return Err(CommandError::DuplicateName {
                name: command.name().to_string(),
            });
        }
        for alias in command.alias_list() {
            if alias == command.name() {
                continue;
            }
            if let Some(existing) = self.words.get(alias)
                && replaced != Some(existing.as_str())
            {
                return Err(CommandError::DuplicateAlias {
                    command: command.name().to_string(),
                    alias: alias.clone(),
                });
            }
        }
        Ok(())
    }

    fn replaceable(&self, command: &Command) -> Option<&str> {
        self.commands
            .get(command.name())
            .filter(|existing| existing.owner_id() == command.owner_id())
            .map(|existing| existing.name())
    }

    fn insert(&mut self, command: Command) {
        self.remove(command.name());
        let name = command.name().to_string();
        for word in command.words() {
            self.words.insert(word.to_string(), name.clone());
        }
        self.commands.insert(name, Arc::new(command));
    }

    fn remove(&mut self, name: &str) -> Option<Arc<Command>> {
        let command = self.commands.remove(name)?;
        for word in command.words() {
            self.words.remove(word);
        }
        Some(command)
    }
}

/// Registry of commands plus the routing logic that invokes them.
///
/// Names and aliases share one namespace: a word can resolve to at most one
/// command. Share the router behind an `Arc`.
pub struct CommandRouter {
    parser: CommandParser,
    permissions: BoxedPermissionStore,
    timeout: Duration,
    table: RwLock<CommandTable>,
}

impl CommandRouter {
    pub fn new(parser: CommandParser, permissions: BoxedPermissionStore) -> Self {
        Self {
            parser,
            permissions,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            table: RwLock::new(CommandTable::default()),
        }
    }

    /// Sets the per-invocation deadline (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn parser(&self) -> &CommandParser {
        &self.parser
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers one command.
    ///
    /// Re-registering a name from the same owner replaces the old command.
    pub fn register(&self, command: Command) -> CommandResult<()> {
        self.register_all(vec![command])
    }

    /// Registers several commands as a unit: either all of them become
    /// routable or none does.
    pub fn register_all(&self, commands: Vec<Command>) -> CommandResult<()> {
        let mut table = self.table.write();

        // Also rejects collisions inside the batch itself.
        let mut staged = CommandTable {
            commands: table.commands.clone(),
            words: table.words.clone(),
        };
        for command in &commands {
            staged.check(command)?;
            staged.insert(command.clone());
        }

        for command in commands {
            debug!(
                command = %command.name(),
                aliases = ?command.alias_list(),
                owner = ?command.owner_id().map(PluginId::as_str),
                "Command registered"
            );
            table.insert(command);
        }
        Ok(())
    }

    /// Removes a command by its canonical name.
    pub fn unregister(&self, name: &str) -> CommandResult<()> {
        self.table
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CommandError::NotFound(name.to_string()))
    }

    /// Removes every command owned by `owner`. Returns how many were removed.
    pub fn unregister_all(&self, owner: &PluginId) -> usize {
        let mut table = self.table.write();
        let names: Vec<String> = table
            .commands
            .values()
            .filter(|c| c.owner_id() == Some(owner))
            .map(|c| c.name().to_string())
            .collect();
        for name in &names {
            table.remove(name);
        }
        if !names.is_empty() {
            debug!(owner = %owner, removed = names.len(), "Commands unregistered");
        }
        names.len()
    }

    // ─── Lookup ──────────────────────────────────────────────────────────────

    /// Resolves a name or alias.
    pub fn lookup(&self, word: &str) -> Option<Arc<Command>> {
        let table = self.table.read();
        table
            .words
            .get(word)
            .and_then(|name| table.commands.get(name))
            .cloned()
    }

    /// All commands, sorted by name.
    pub fn commands(&self) -> Vec<Arc<Command>> {
        let mut commands: Vec<_> = self.table.read().commands.values().cloned().collect();
        commands.sort_by(|a, b| a.name().cmp(b.name()));
        commands
    }

    pub fn len(&self) -> usize {
        self.table.read().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ─── Routing ─────────────────────────────────────────────────────────────

    /// Parses `event` and, if it names a permitted command, runs it.
    ///
    /// The handler runs isolated and bounded by the router's deadline; its
    /// fault is reported in [`RouteOutcome::Executed`] and never propagates.
    pub async fn route(&self, event: Arc<Event>) -> RouteOutcome {
        if !event.topic().is_message() {
            return RouteOutcome::NotACommand;
        }
        let Some(text) = event.text() else {
            return RouteOutcome::NotACommand;
        };
        let Some(parsed) = self.parser.parse(text) else {
            return RouteOutcome::NotACommand;
        };
        let Some(command) = self.lookup(parsed.name) else {
            debug!(name = %parsed.name, "Unknown command");
            return RouteOutcome::UnknownCommand {
                name: parsed.name.to_string(),
            };
        };

        let actor_id = actor_of(&event);
        let span = span!(
            Level::DEBUG,
            "command",
            command = %command.name(),
            actor = ?actor_id.as_deref(),
        );

        async {
            let level = match &actor_id {
                Some(actor) => self.permissions.get_level(actor).await,
                None => PermissionLevel::default(),
            };
            if !level.satisfies(command.required_level()) {
                info!(required = %command.required_level(), actual = %level, "Permission denied");
                return RouteOutcome::PermissionDenied {
                    command: command.name().to_string(),
                    required: command.required_level(),
                    actual: level,
                };
            }

            let ctx = CommandContext::new(
                Arc::clone(&event),
                command.name(),
                parsed.name,
                parsed.args,
                actor_id.clone(),
                level,
            );
            let handler = Arc::clone(command.handler());
            let outcome = run_guarded(
                async move { handler.call(ctx).await },
                self.timeout,
                CancellationToken::new(),
            )
            .await;
            debug!(outcome = ?outcome, "Command finished");

            RouteOutcome::Executed {
                command: command.name().to_string(),
                outcome,
            }
        }
        .instrument(span)
        .await
    }

    /// Subscribes the router to every message topic on `bus`.
    ///
    /// A faulted command makes the router's own invocation fail, so the fault
    /// shows up in the bus's dispatch report.
    pub fn attach(self: &Arc<Self>, bus: &EventBus, priority: i32) -> BusResult<SubscriptionHandle> {
        let router = Arc::clone(self);
        bus.subscribe(
            Subscriber::new("message.*", move |event: Arc<Event>| {
                let router = Arc::clone(&router);
                async move {
                    match router.route(event).await {
                        RouteOutcome::Executed {
                            outcome: HandlerOutcome::Faulted(fault),
                            ..
                        } => Err(BoxError::from(fault)),
                        _ => Ok(()),
                    }
                }
            })
            .priority(priority),
        )
    }

    // ─── Help ────────────────────────────────────────────────────────────────

    /// Help text for one command, looked up by name or alias.
    pub fn help(&self, word: &str) -> Option<String> {
        self.lookup(word)
            .map(|cmd| super::help::render_command(&cmd, self.parser.display_prefix()))
    }

    /// One line per command, sorted by name.
    pub fn help_index(&self) -> String {
        super::help::render_index(&self.commands(), self.parser.display_prefix())
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("prefixes", &self.parser.prefixes())
            .field("commands", &self.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// The invoking user is the event source. Ingestion fills it from the
/// payload's `user_id` only when the gateway did not stamp one.
fn actor_of(event: &Event) -> Option<String> {
    event.source_id().map(str::to_string)
}
