//! Session driver shared by `run` and `send`.

use anyhow::Result;
use blackbox::{
    Channel, Clock, Command, ManualClock, NativeChannel, RunEvent, ScenarioConfig, ScenarioResult,
    ScenarioRunner, SessionOutcome, SystemClock, sim::SimulatedDevice,
};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;
use std::io;
use std::time::Duration;

use crate::config::Config;
use crate::report;
use crate::serial::{select_serial_port, serial_config};
use crate::{Cli, CliError, use_fancy_output};

/// What a session executes after the boot banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
    /// The fixed four-step scenario.
    Scenario,
    /// One command with its scenario policy.
    Single(Command),
}

/// Open the target (real port or simulated device) and run `plan` on it.
pub(crate) fn execute(
    cli: &Cli,
    config: &Config,
    plan: Plan,
    simulate: bool,
    json: bool,
) -> Result<()> {
    let scenario = config.scenario();
    let chatty = !cli.quiet && !json;

    if simulate {
        let clock = ManualClock::new();
        let device = SimulatedDevice::crash_reporter(clock.clone());
        let runner = build_runner(scenario, clock)?;
        if chatty {
            eprintln!("{} Using simulated device", style("ℹ").blue());
        }
        return drive(cli, "simulated", &runner, device, plan, json);
    }

    // Reject bad timings before touching the port.
    let runner = build_runner(scenario, SystemClock::new())?;

    let options = cli.serial_options();
    let port = select_serial_port(&options, config)?;
    let serial = serial_config(&port, &options, config);
    if chatty {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            style(&serial.port_name).green(),
            serial.baud_rate
        );
    }

    let channel = NativeChannel::open(&serial)?;
    drive(cli, &serial.port_name, &runner, channel, plan, json)
}

fn build_runner<K: Clock>(scenario: ScenarioConfig, clock: K) -> Result<ScenarioRunner<K>> {
    ScenarioRunner::new(scenario, clock).map_err(|e| CliError::Usage(e.to_string()).into())
}

fn spinner(hidden: bool) -> ProgressBar {
    if hidden || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn drive<K, C>(
    cli: &Cli,
    port: &str,
    runner: &ScenarioRunner<K>,
    channel: C,
    plan: Plan,
    json: bool,
) -> Result<()>
where
    K: Clock,
    C: Channel,
{
    let pb = spinner(cli.quiet || json);
    let mut total = 0;
    let mut current = String::new();
    let mut write_error: Option<io::Error> = None;

    let observer = |event: RunEvent<'_>| match event {
        RunEvent::Booting { delay } => {
            pb.set_message(format!(
                "Waiting {:.1}s for the device to boot",
                delay.as_secs_f64()
            ));
        },
        RunEvent::StepStarted {
            index,
            total: steps,
            step,
        } => {
            total = steps;
            current = format!("[{}/{steps}] {}", index + 1, step.label);
            pb.set_message(current.clone());
        },
        RunEvent::Waiting { budget, .. } => {
            pb.set_message(format!(
                "{current}: collecting (up to {:.1}s)",
                budget.as_secs_f64()
            ));
        },
        RunEvent::StepFinished { index, result } => {
            if json || write_error.is_some() {
                return;
            }
            let written =
                pb.suspend(|| report::write_step(&mut io::stdout().lock(), index, total, result));
            if let Err(e) = written {
                write_error = Some(e);
            }
        },
    };

    let result = match plan {
        Plan::Scenario => runner.run(channel, observer),
        Plan::Single(command) => runner.run_single(channel, command, observer),
    };
    pb.finish_and_clear();
    debug!(
        "Session on {port} ended: {}",
        report::outcome_label(&result.outcome)
    );

    if json {
        let report = report::json_report(port, &result);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if let Some(e) = write_error {
            return Err(e.into());
        }
        if cli.verbose > 0 {
            report::write_boot_log(&mut io::stdout().lock(), &result.boot_log)?;
        }
        if !cli.quiet {
            report::print_summary(&result);
        }
    }

    finish(result)
}

/// Map the session outcome onto the CLI's error classes.
fn finish(result: ScenarioResult) -> Result<()> {
    match result.outcome {
        SessionOutcome::Completed => Ok(()),
        SessionOutcome::Interrupted => {
            Err(CliError::Cancelled("Session interrupted".to_string()).into())
        },
        SessionOutcome::Failed(e) => Err(e.into()),
    }
}
