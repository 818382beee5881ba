//! Serial port resolution.
//!
//! The port comes from the first source that names one:
//! - `--port` / `BLACKBOX_PORT`
//! - `[connection] port` in the configuration file
//! - auto-detection, preferring recognised USB bridges
//!
//! With several candidates an interactive terminal gets a picker; scripts and
//! `--non-interactive` get a usage error instead.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    blackbox::{DEFAULT_BAUD, DetectedPort, SerialConfig, detect_ports},
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal, time::Duration},
};

/// Default read timeout when neither flag nor config sets one.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Options for serial port selection and setup.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Explicit baud rate specified via CLI.
    pub baud: Option<u32>,
    /// Explicit read timeout specified via CLI.
    pub timeout_ms: Option<u64>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Build the serial settings for a session on `port`.
pub fn serial_config(port: &str, options: &SerialOptions, config: &Config) -> SerialConfig {
    let baud = options
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    let timeout_ms = options
        .timeout_ms
        .or(config.connection.timeout_ms)
        .unwrap_or(DEFAULT_TIMEOUT_MS);

    SerialConfig::new(port, baud).with_timeout(Duration::from_millis(timeout_ms))
}

/// Resolve the port to open.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        debug!("Using port from command line: {port_name}");
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config.connection.port {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    choose_detected(detect_ports(), options.non_interactive)
}

/// Pick one port out of the detected list.
fn choose_detected(ports: Vec<DetectedPort>, non_interactive: bool) -> Result<String> {
    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found. Connect the board or pass --port",
        ));
    }

    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.device.is_known())
        .cloned()
        .collect();

    // A single recognised bridge wins even when other ports exist.
    let candidates = if known.is_empty() { ports } else { known };

    match candidates
        .len()
        .cmp(&1)
    {
        Ordering::Equal => {
            let port = &candidates[0];
            info!("Auto-selected port: {}", port.describe());
            Ok(port.name.clone())
        },
        Ordering::Greater if non_interactive => Err(usage_err(
            "Multiple serial ports found; pass --port to choose one",
        )),
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(&candidates)
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Multiple serial ports found and no terminal to prompt on; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

fn select_port_interactive(ports: &[DetectedPort]) -> Result<String> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let items: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&p.describe(), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the crash reporter's serial port")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .get(index)
            .map(|p| p.name.clone())
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackbox::DeviceKind;

    fn port(name: &str, device: DeviceKind) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            device,
            vid: None,
            pid: None,
            product: None,
        }
    }

    fn usage_message(err: &anyhow::Error) -> Option<String> {
        match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(msg)) => Some(msg.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_explicit_port_wins_over_config() {
        let options = SerialOptions {
            port: Some("/dev/ttyACM9".to_string()),
            ..SerialOptions::default()
        };
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyUSB0".to_string());

        assert_eq!(
            select_serial_port(&options, &config).unwrap(),
            "/dev/ttyACM9"
        );
    }

    #[test]
    fn test_config_port_used_without_flag() {
        let mut config = Config::default();
        config.connection.port = Some("COM7".to_string());

        assert_eq!(
            select_serial_port(&SerialOptions::default(), &config).unwrap(),
            "COM7"
        );
    }

    #[test]
    fn test_no_detected_ports_is_usage_error() {
        let err = choose_detected(Vec::new(), true).unwrap_err();
        assert!(usage_message(&err).is_some());
    }

    #[test]
    fn test_single_port_auto_selected() {
        let chosen = choose_detected(vec![port("/dev/ttyS0", DeviceKind::Unknown)], true).unwrap();
        assert_eq!(chosen, "/dev/ttyS0");
    }

    #[test]
    fn test_single_known_port_preferred_over_unknown() {
        let ports = vec![
            port("/dev/ttyS0", DeviceKind::Unknown),
            port("/dev/ttyACM0", DeviceKind::Arduino),
            port("/dev/ttyS1", DeviceKind::Unknown),
        ];
        assert_eq!(choose_detected(ports, true).unwrap(), "/dev/ttyACM0");
    }

    #[test]
    fn test_multiple_ports_non_interactive_is_usage_error() {
        let ports = vec![
            port("/dev/ttyACM0", DeviceKind::Arduino),
            port("/dev/ttyUSB0", DeviceKind::Ch340),
        ];
        let err = choose_detected(ports, true).unwrap_err();
        let msg = usage_message(&err).unwrap();
        assert!(msg.contains("--port"));
    }

    #[test]
    fn test_serial_config_precedence() {
        let mut config = Config::default();
        config.connection.baud = Some(19200);
        config.connection.timeout_ms = Some(250);

        let from_config = serial_config("/dev/ttyACM0", &SerialOptions::default(), &config);
        assert_eq!(from_config.baud_rate, 19200);
        assert_eq!(from_config.timeout, Duration::from_millis(250));

        let options = SerialOptions {
            baud: Some(115_200),
            timeout_ms: Some(50),
            ..SerialOptions::default()
        };
        let from_flags = serial_config("/dev/ttyACM0", &options, &config);
        assert_eq!(from_flags.baud_rate, 115_200);
        assert_eq!(from_flags.timeout, Duration::from_millis(50));

        let defaults = serial_config("/dev/ttyACM0", &SerialOptions::default(), &Config::default());
        assert_eq!(defaults.baud_rate, DEFAULT_BAUD);
        assert_eq!(defaults.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
    }
}
