//! `run`: the full fault-injection scenario.

use anyhow::Result;

use super::session::{Plan, execute};
use crate::Cli;
use crate::config::Config;

/// Run the fixed scenario against the selected port or the simulator.
pub(crate) fn cmd_run(cli: &Cli, config: &Config, json: bool, simulate: bool) -> Result<()> {
    execute(cli, config, Plan::Scenario, simulate, json)
}
