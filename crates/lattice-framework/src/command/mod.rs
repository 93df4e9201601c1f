//! Prefix commands: declaration, parsing and permission-gated routing.
//!
//! A [`Command`] is declared as data and handed to the
//! [`CommandRouter`]. The router watches message events, strips one of its
//! configured prefixes, resolves the first word against command names and
//! aliases, checks the caller's [`PermissionLevel`] and runs the handler.
//!
//! ```text
//! "/weather  Berlin now"
//!  │└──┬──┘  └───┬────┘
//!  │ name      args  ("Berlin now", passed through untouched)
//!  prefix
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice_framework::command::{Command, CommandContext};
//!
//! let weather = Command::new("weather", |ctx: CommandContext| async move {
//!     tracing::info!(city = %ctx.args(), "weather lookup");
//!     Ok(())
//! })
//! .alias("w")
//! .description("Shows the weather for a city")
//! .usage("weather <city>");
//!
//! router.register(weather)?;
//! ```

mod help;
mod parser;
mod router;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use lattice_core::{BoxError, Event, PermissionLevel, PluginId};

pub use parser::{CommandParser, ParsedCommand};
pub use router::{CommandRouter, RouteOutcome};

/// Default per-invocation deadline for command handlers.
pub const DEFAULT_COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

// =============================================================================
// Handler
// =============================================================================

/// Everything a command handler gets to see about one invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
    event: Arc<Event>,
    command: String,
    invoked_as: String,
    args: String,
    actor_id: Option<String>,
    level: PermissionLevel,
}

impl CommandContext {
    pub(crate) fn new(
        event: Arc<Event>,
        command: &str,
        invoked_as: &str,
        args: &str,
        actor_id: Option<String>,
        level: PermissionLevel,
    ) -> Self {
        Self {
            event,
            command: command.to_string(),
            invoked_as: invoked_as.to_string(),
            args: args.to_string(),
            actor_id,
            level,
        }
    }

    /// The message event that triggered the command.
    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    /// Canonical name of the command.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The word the user typed: the name or one of the aliases.
    pub fn invoked_as(&self) -> &str {
        &self.invoked_as
    }

    /// Everything after the command word, trimmed. Empty when absent.
    pub fn args(&self) -> &str {
        &self.args
    }

    /// The caller, if the event carried one.
    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    /// The caller's permission level at the time of routing.
    pub fn level(&self) -> PermissionLevel {
        self.level
    }
}

/// Logic run when a command is invoked.
///
/// Implemented for any `Fn(CommandContext) -> impl Future<Output = Result<(), BoxError>>`.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn call(&self, ctx: CommandContext) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn call(&self, ctx: CommandContext) -> Result<(), BoxError> {
        (self)(ctx).await
    }
}

pub type BoxedCommandHandler = Arc<dyn CommandHandler>;

// =============================================================================
// Command
// =============================================================================

/// Declaration of a command.
#[derive(Clone)]
pub struct Command {
    name: String,
    aliases: Vec<String>,
    permission: PermissionLevel,
    description: String,
    usage: Option<String>,
    handler: BoxedCommandHandler,
    owner: Option<PluginId>,
}

impl Command {
    /// Declares a command usable by [`PermissionLevel::Normal`] and above.
    pub fn new(name: impl Into<String>, handler: impl CommandHandler) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            permission: PermissionLevel::Normal,
            description: String::new(),
            usage: None,
            handler: Arc::new(handler),
            owner: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    pub fn aliases<I, S>(self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        aliases.into_iter().fold(self, |cmd, a| cmd.alias(a))
    }

    /// Minimum level required to invoke the command.
    pub fn permission(mut self, level: PermissionLevel) -> Self {
        self.permission = level;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Usage line shown in help, without the prefix (e.g. `weather <city>`).
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<PluginId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias_list(&self) -> &[String] {
        &self.aliases
    }

    pub fn required_level(&self) -> PermissionLevel {
        self.permission
    }

    pub fn description_text(&self) -> &str {
        &self.description
    }

    pub fn usage_text(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    pub fn owner_id(&self) -> Option<&PluginId> {
        self.owner.as_ref()
    }

    pub(crate) fn handler(&self) -> &BoxedCommandHandler {
        &self.handler
    }

    /// Every word this command answers to: its name, then its aliases.
    pub(crate) fn words(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("permission", &self.permission)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
