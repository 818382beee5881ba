//! `send`: dispatch a single command.

use anyhow::Result;
use blackbox::Command;

use super::session::{Plan, execute};
use crate::Cli;
use crate::config::Config;

/// Parse a command given as a digit (`1`-`5`) or a name (`watchdog`, `crash-dump`, ...).
pub(crate) fn parse_command(s: &str) -> Result<Command, String> {
    s.parse::<Command>().map_err(|_| {
        let known: Vec<String> = Command::ALL
            .iter()
            .map(|c| format!("{} ({})", c.wire_byte() as char, c.name()))
            .collect();
        format!("unknown command '{s}', expected one of: {}", known.join(", "))
    })
}

/// Boot the device, send `command` and collect its reply.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &Config,
    command: Command,
    json: bool,
    simulate: bool,
) -> Result<()> {
    execute(cli, config, Plan::Single(command), simulate, json)
}
