//! blackbox CLI - drive the crash reporter firmware through its fault scenario.
//!
//! ## Features
//!
//! - Run the fixed stack/recursion/crash/watchdog scenario
//! - Send a single command and capture the reply
//! - Simulated device for dry runs without hardware
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use blackbox::Command as DeviceCommand;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

mod commands;
mod config;
mod report;
mod serial;

use commands::send::parse_command;
use config::Config;
use serial::SerialOptions;

/// User-facing failures that are not library errors.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The user stopped the session (exit code 0).
    #[error("{0}")]
    Cancelled(String),
}

/// blackbox - fault-injection harness for the black box crash reporter.
///
/// Environment variables:
///   BLACKBOX_PORT              - Default serial port
///   BLACKBOX_BAUD              - Default baud rate (default: 9600)
///   BLACKBOX_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "blackbox")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "BLACKBOX_PORT")]
    port: Option<String>,

    /// Baud rate [default: 9600].
    #[arg(short, long, global = true, env = "BLACKBOX_BAUD")]
    baud: Option<u32>,

    /// Serial read timeout in milliseconds [default: 1000].
    #[arg(long, global = true, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "BLACKBOX_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn serial_options(&self) -> SerialOptions {
        SerialOptions {
            port: self.port.clone(),
            baud: self.baud,
            timeout_ms: self.timeout_ms,
            non_interactive: self.non_interactive,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the full scenario: stack pointer, recursion, crash dump, watchdog.
    Run {
        /// Print a JSON report instead of text.
        #[arg(long)]
        json: bool,

        /// Run against a simulated device instead of a serial port.
        #[arg(long)]
        simulate: bool,
    },

    /// Send one command (1-5 or its name) and capture the reply.
    Send {
        /// Command digit or name: 1/watchdog, 2/crash-dump, 3/clear, 4/stack-pointer,
        /// 5/deep-recursion.
        #[arg(value_parser = parse_command)]
        command: DeviceCommand,

        /// Print a JSON report instead of text.
        #[arg(long)]
        json: bool,

        /// Run against a simulated device instead of a serial port.
        #[arg(long)]
        simulate: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        shell: Shell,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    blackbox::set_interrupt_checker(was_interrupted);
}

/// Exit code for an error that reached the top level.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Cancelled(_)) => 0,
        None => 1,
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Run { json, simulate } => {
            commands::run::cmd_run(cli, &config, *json, *simulate)?;
        },
        Commands::Send {
            command,
            json,
            simulate,
        } => {
            commands::send::cmd_send(cli, &config, *command, *json, *simulate)?;
        },
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json);
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
        },
    }

    Ok(())
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "blackbox v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            if code == 0 {
                if !cli.quiet {
                    eprintln!("{} {err}", style("!").yellow().bold());
                }
            } else {
                eprintln!("{} {err:#}", style("Error:").red().bold());
            }
            ExitCode::from(code)
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["blackbox", "run"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run {
                json: false,
                simulate: false
            }
        ));
    }

    #[test]
    fn test_cli_parse_run_json_simulate() {
        let cli = Cli::try_parse_from(["blackbox", "run", "--json", "--simulate"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run {
                json: true,
                simulate: true
            }
        ));
    }

    #[test]
    fn test_cli_parse_send_by_digit_and_name() {
        let cli = Cli::try_parse_from(["blackbox", "send", "2"]).unwrap();
        match cli.command {
            Commands::Send { command, .. } => assert_eq!(command, DeviceCommand::CrashDump),
            _ => panic!("Expected Send command"),
        }

        let cli = Cli::try_parse_from(["blackbox", "send", "stack-pointer", "--simulate"]).unwrap();
        match cli.command {
            Commands::Send {
                command, simulate, ..
            } => {
                assert_eq!(command, DeviceCommand::StackPointerQuery);
                assert!(simulate);
            },
            _ => panic!("Expected Send command"),
        }
    }

    #[test]
    fn test_cli_parse_send_invalid_command() {
        assert!(Cli::try_parse_from(["blackbox", "send", "7"]).is_err());
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["blackbox", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["blackbox", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Zsh }
        ));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "blackbox",
            "-p",
            "/dev/ttyACM0",
            "-b",
            "19200",
            "--timeout-ms",
            "250",
            "-vv",
            "--non-interactive",
            "--config",
            "bb.toml",
            "run",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, Some(19200));
        assert_eq!(cli.timeout_ms, Some(250));
        assert_eq!(cli.verbose, 2);
        assert!(cli.non_interactive);
        assert_eq!(cli.config_path, Some(PathBuf::from("bb.toml")));

        let options = cli.serial_options();
        assert_eq!(options.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(options.baud, Some(19200));
    }

    #[test]
    fn test_cli_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["blackbox", "run", "--port", "COM4", "-q"]).unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM4"));
        assert!(cli.quiet);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["blackbox"]).is_err());
    }

    #[test]
    fn test_exit_code_mapping() {
        let usage: anyhow::Error = CliError::Usage("bad".to_string()).into();
        let cancelled: anyhow::Error = CliError::Cancelled("stop".to_string()).into();
        let failure: anyhow::Error = blackbox::Error::Interrupted.into();

        assert_eq!(exit_code_for(&usage), 2);
        assert_eq!(exit_code_for(&cancelled), 0);
        assert_eq!(exit_code_for(&failure), 1);
    }
}
