//! Console Bot Example
//!
//! Every line typed on stdin arrives as a private message from one user;
//! replies are printed to stdout. Logs go to stderr.
//!
//! ```text
//! > /ping
//! [to console] pong
//! > #echo hello
//! [to console] hello
//! > /help
//! [to console] /echo - Repeats its arguments
//! ...
//! ```
//!
//! Lines starting with `!` are sent as other event kinds: `!join <user>`
//! raises `notice.member_increase`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --admin
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use clap::Parser;
use lattice::prelude::*;
use lattice::runtime::ConfigLoader;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(about = "Talk to a Lattice bot from the terminal")]
struct Args {
    /// Configuration file (defaults to searching for lattice.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User id the console speaks as
    #[arg(short, long, default_value = "console")]
    user: String,

    /// Grant the console user admin permissions
    #[arg(long)]
    admin: bool,
}

// ============================================================================
// Connection
// ============================================================================

struct ConsoleConnection {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    user: String,
    next_message_id: AtomicU64,
}

impl ConsoleConnection {
    fn new(user: String) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            user,
            next_message_id: AtomicU64::new(1),
        }
    }

    fn envelope_for(&self, line: &str) -> Envelope {
        if let Some(joined) = line.strip_prefix("!join ") {
            return Envelope::new(
                topics::NOTICE_MEMBER_INCREASE,
                json!({ "user_id": joined.trim(), "group_id": "console" }),
            );
        }
        Envelope::new(
            topics::MESSAGE_PRIVATE,
            json!({ "user_id": self.user, "raw_message": line }),
        )
    }
}

#[async_trait]
impl Connection for ConsoleConnection {
    async fn send(&self, envelope: &Envelope) -> SendResult<Ack> {
        let Some(text) = envelope.payload["message"].as_str() else {
            return Err(SendError::Fatal(format!(
                "{} without a message",
                envelope.kind
            )));
        };
        let target = envelope.payload["user_id"].as_str().unwrap_or("everyone");
        println!("[to {target}] {text}");

        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        Ok(Ack {
            message_id: Some(id.to_string()),
            data: json!({}),
        })
    }

    async fn receive(&self) -> Option<Envelope> {
        let mut lines = self.lines.lock().await;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some(self.envelope_for(&line)),
                Ok(None) => return None,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read stdin");
                    return None;
                }
            }
        }
    }
}

// ============================================================================
// Plugins
// ============================================================================

fn reply_to(cmd: &CommandContext, text: impl Into<String>) -> Envelope {
    Envelope::new(
        "send_private_msg",
        json!({ "user_id": cmd.actor_id(), "message": text.into() }),
    )
}

/// `ping`, `help` and the admin-only `stats`.
struct Basics;

#[async_trait]
impl Plugin for Basics {
    async fn on_enable(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let outbound = ctx.outbound().cloned().ok_or("no outbound queue")?;

        let queue = outbound.clone();
        ctx.command(
            Command::new("ping", move |cmd: CommandContext| {
                let queue = queue.clone();
                async move {
                    queue.enqueue(reply_to(&cmd, "pong"), 0)?;
                    Ok::<(), BoxError>(())
                }
            })
            .alias("p")
            .description("Checks that the bot is alive"),
        );

        let queue = outbound.clone();
        let router = Arc::clone(ctx.router());
        ctx.command(
            Command::new("help", move |cmd: CommandContext| {
                let queue = queue.clone();
                let text = match cmd.args() {
                    "" => router.help_index(),
                    name => router
                        .help(name)
                        .unwrap_or_else(|| format!("unknown command '{name}'")),
                };
                async move {
                    queue.enqueue(reply_to(&cmd, text), 0)?;
                    Ok::<(), BoxError>(())
                }
            })
            .description("Lists commands, or describes one")
            .usage("help [command]"),
        );

        let queue = outbound;
        let bus = Arc::clone(ctx.bus());
        ctx.command(
            Command::new("stats", move |cmd: CommandContext| {
                let queue = queue.clone();
                let text = format!(
                    "{} subscriptions, {} queued",
                    bus.subscription_count(),
                    queue.len()
                );
                async move {
                    queue.enqueue(reply_to(&cmd, text), 10)?;
                    Ok::<(), BoxError>(())
                }
            })
            .permission(PermissionLevel::Admin)
            .description("Shows bus and queue counters"),
        );
        Ok(())
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct EchoSettings {
    /// Prepended to every echo.
    prefix: String,
}

/// `echo <text>` and a greeting for new members.
struct Echo;

#[async_trait]
impl Plugin for Echo {
    async fn on_enable(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let settings: Arc<EchoSettings> = Arc::new(ctx.config()?);
        let outbound = ctx.outbound().cloned().ok_or("no outbound queue")?;

        let queue = outbound.clone();
        ctx.command(
            Command::new("echo", move |cmd: CommandContext| {
                let queue = queue.clone();
                let text = format!("{}{}", settings.prefix, cmd.args());
                async move {
                    queue.enqueue(reply_to(&cmd, text), 0)?;
                    Ok::<(), BoxError>(())
                }
            })
            .alias("say")
            .description("Repeats its arguments")
            .usage("echo <text>"),
        );

        ctx.subscribe(Subscriber::new(
            topics::NOTICE_MEMBER_INCREASE,
            move |event: Arc<Event>| {
                let queue = outbound.clone();
                async move {
                    let user = event.payload()["user_id"].as_str().unwrap_or("someone");
                    queue.enqueue(
                        Envelope::new(
                            "send_group_msg",
                            json!({ "group_id": "console", "message": format!("welcome, {user}!") }),
                        ),
                        0,
                    )?;
                    Ok::<(), BoxError>(())
                }
            },
        ));
        Ok(())
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().set("logging.output", "stderr");
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let config = loader.load()?;

    let level = if args.admin {
        PermissionLevel::Admin
    } else {
        PermissionLevel::Normal
    };
    let runtime = LatticeRuntime::builder()
        .config(config)
        .permissions(
            StaticPermissionStore::new(PermissionLevel::Normal).with_level(&args.user, level),
        )
        .plugin(PluginDescriptor::new("basics", Version::new(1, 0, 0), Basics))
        .plugin(
            PluginDescriptor::new("echo", Version::new(1, 1, 0), Echo)
                .depends_on_version("basics", "^1.0".parse()?),
        )
        .build()?;

    info!(user = %args.user, admin = args.admin, "Console bot ready, type /help");
    runtime
        .run(Arc::new(ConsoleConnection::new(args.user.clone())))
        .await?;
    Ok(())
}
