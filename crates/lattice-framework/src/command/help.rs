//! Plain-text help rendering.

use std::fmt::Write;
use std::sync::Arc;

use super::Command;

pub(super) fn render_command(command: &Command, prefix: &str) -> String {
    let mut out = format!("{prefix}{}", command.name());
    if !command.alias_list().is_empty() {
        let aliases: Vec<String> = command
            .alias_list()
            .iter()
            .map(|a| format!("{prefix}{a}"))
            .collect();
        let _ = write!(out, " (aliases: {})", aliases.join(", "));
    }
    if !command.description_text().is_empty() {
        let _ = write!(out, "\n  {}", command.description_text());
    }
    if let Some(usage) = command.usage_text() {
        let _ = write!(out, "\n  usage: {prefix}{usage}");
    }
    let _ = write!(out, "\n  permission: {}", command.required_level());
    out
}

pub(super) fn render_index(commands: &[Arc<Command>], prefix: &str) -> String {
    if commands.is_empty() {
        return "no commands available".to_string();
    }
    commands
        .iter()
        .map(|cmd| match cmd.description_text() {
            "" => format!("{prefix}{}", cmd.name()),
            desc => format!("{prefix}{} - {desc}", cmd.name()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
