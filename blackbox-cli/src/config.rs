//! Configuration file support for blackbox.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BLACKBOX_*)
//! 3. Local config file (./blackbox.toml)
//! 4. Global config file (~/.config/blackbox/config.toml)
//!
//! All timings are given in milliseconds. An empty marker string disables the
//! marker check for that step.

use blackbox::ScenarioConfig;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "blackbox.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Read timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Scenario timing overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    pub boot_delay_ms: Option<u64>,
    pub boot_poll_ms: Option<u64>,

    pub stack_pointer_settle_ms: Option<u64>,
    pub stack_pointer_poll_ms: Option<u64>,
    pub stack_pointer_marker: Option<String>,

    pub recursion_pre_delay_ms: Option<u64>,
    pub recursion_settle_ms: Option<u64>,
    pub recursion_poll_ms: Option<u64>,
    pub recursion_marker: Option<String>,

    pub crash_pre_delay_ms: Option<u64>,
    pub crash_grace_ms: Option<u64>,
    pub crash_window_attempts: Option<u32>,
    pub crash_window_interval_ms: Option<u64>,
    pub crash_marker: Option<String>,

    pub watchdog_pre_delay_ms: Option<u64>,
    pub watchdog_timeout_ms: Option<u64>,
    pub watchdog_margin_ms: Option<u64>,
    pub watchdog_window_attempts: Option<u32>,
    pub watchdog_window_interval_ms: Option<u64>,
    pub watchdog_marker: Option<String>,
}

fn set_ms(target: &mut Duration, value: Option<u64>) {
    if let Some(ms) = value {
        *target = Duration::from_millis(ms);
    }
}

fn set_marker(target: &mut Option<String>, value: Option<&String>) {
    if let Some(marker) = value {
        *target = if marker.is_empty() {
            None
        } else {
            Some(marker.clone())
        };
    }
}

impl TimingConfig {
    /// Apply these overrides on top of `base`.
    pub fn apply(&self, mut base: ScenarioConfig) -> ScenarioConfig {
        set_ms(&mut base.boot_delay, self.boot_delay_ms);
        set_ms(&mut base.boot_poll_interval, self.boot_poll_ms);

        set_ms(&mut base.stack_pointer_settle, self.stack_pointer_settle_ms);
        set_ms(&mut base.stack_pointer_poll, self.stack_pointer_poll_ms);
        set_marker(&mut base.stack_pointer_expect, self.stack_pointer_marker.as_ref());

        set_ms(&mut base.recursion_pre_delay, self.recursion_pre_delay_ms);
        set_ms(&mut base.recursion_settle, self.recursion_settle_ms);
        set_ms(&mut base.recursion_poll, self.recursion_poll_ms);
        set_marker(&mut base.recursion_expect, self.recursion_marker.as_ref());

        set_ms(&mut base.crash_pre_delay, self.crash_pre_delay_ms);
        set_ms(&mut base.crash_grace, self.crash_grace_ms);
        if let Some(attempts) = self.crash_window_attempts {
            base.crash_window_attempts = attempts;
        }
        set_ms(&mut base.crash_window_interval, self.crash_window_interval_ms);
        set_marker(&mut base.crash_expect, self.crash_marker.as_ref());

        set_ms(&mut base.watchdog_pre_delay, self.watchdog_pre_delay_ms);
        set_ms(&mut base.watchdog_timeout, self.watchdog_timeout_ms);
        set_ms(&mut base.watchdog_margin, self.watchdog_margin_ms);
        if let Some(attempts) = self.watchdog_window_attempts {
            base.watchdog_window_attempts = attempts;
        }
        set_ms(&mut base.watchdog_window_interval, self.watchdog_window_interval_ms);
        set_marker(&mut base.watchdog_expect, self.watchdog_marker.as_ref());

        base
    }

    /// Merge another timing table into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field;
                    }
                )*
            };
        }

        take!(
            boot_delay_ms,
            boot_poll_ms,
            stack_pointer_settle_ms,
            stack_pointer_poll_ms,
            stack_pointer_marker,
            recursion_pre_delay_ms,
            recursion_settle_ms,
            recursion_poll_ms,
            recursion_marker,
            crash_pre_delay_ms,
            crash_grace_ms,
            crash_window_attempts,
            crash_window_interval_ms,
            crash_marker,
            watchdog_pre_delay_ms,
            watchdog_timeout_ms,
            watchdog_margin_ms,
            watchdog_window_attempts,
            watchdog_window_interval_ms,
            watchdog_marker,
        );
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Scenario timing configuration.
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "blackbox").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Scenario timing with file overrides applied.
    pub fn scenario(&self) -> ScenarioConfig {
        self.timing
            .apply(ScenarioConfig::default())
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.timeout_ms.is_some() {
            self.connection.timeout_ms = other.connection.timeout_ms;
        }
        self.timing.merge(other.timing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.connection.timeout_ms.is_none());
        assert_eq!(config.scenario(), ScenarioConfig::default());
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_connection() {
        let mut base = Config::default();
        base.connection.baud = Some(9600);

        let mut other = Config::default();
        other.connection.port = Some("/dev/ttyACM0".to_string());
        other.connection.baud = Some(115200);

        base.merge(other);

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.connection.baud, Some(115200));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.port = Some("COM3".to_string());
        base.timing.crash_grace_ms = Some(4000);

        base.merge(Config::default());

        assert_eq!(base.connection.port.as_deref(), Some("COM3"));
        assert_eq!(base.timing.crash_grace_ms, Some(4000));
    }

    #[test]
    fn test_config_merge_timing_fields_individually() {
        let mut base = Config::default();
        base.timing.boot_delay_ms = Some(1000);
        base.timing.watchdog_marker = Some("WDT".to_string());

        let mut other = Config::default();
        other.timing.boot_delay_ms = Some(3000);

        base.merge(other);
        assert_eq!(base.timing.boot_delay_ms, Some(3000));
        assert_eq!(base.timing.watchdog_marker.as_deref(), Some("WDT"));
    }

    // ---- Timing application ----

    #[test]
    fn test_timing_apply_overrides_only_set_fields() {
        let timing = TimingConfig {
            crash_grace_ms: Some(1500),
            crash_window_attempts: Some(20),
            watchdog_timeout_ms: Some(8000),
            ..TimingConfig::default()
        };

        let scenario = timing.apply(ScenarioConfig::default());
        let defaults = ScenarioConfig::default();

        assert_eq!(scenario.crash_grace, Duration::from_millis(1500));
        assert_eq!(scenario.crash_window_attempts, 20);
        assert_eq!(scenario.watchdog_timeout, Duration::from_secs(8));
        assert_eq!(scenario.boot_delay, defaults.boot_delay);
        assert_eq!(scenario.stack_pointer_expect, defaults.stack_pointer_expect);
    }

    #[test]
    fn test_empty_marker_disables_check() {
        let timing = TimingConfig {
            recursion_marker: Some(String::new()),
            crash_marker: Some("REBOOT".to_string()),
            ..TimingConfig::default()
        };

        let scenario = timing.apply(ScenarioConfig::default());
        assert!(scenario.recursion_expect.is_none());
        assert_eq!(scenario.crash_expect.as_deref(), Some("REBOOT"));
    }

    // ---- TOML deserialization ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
port = "/dev/cu.usbmodem101"
baud = 9600
timeout_ms = 500

[timing]
boot_delay_ms = 2500
watchdog_margin_ms = 3000
watchdog_marker = "WATCHDOG"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/cu.usbmodem101"));
        assert_eq!(config.connection.baud, Some(9600));
        assert_eq!(config.connection.timeout_ms, Some(500));

        let scenario = config.scenario();
        assert_eq!(scenario.boot_delay, Duration::from_millis(2500));
        assert_eq!(scenario.watchdog_margin, Duration::from_secs(3));
        assert_eq!(scenario.watchdog_expect.as_deref(), Some("WATCHDOG"));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.port.is_none());
        assert!(config.timing.boot_delay_ms.is_none());
    }

    // ---- load_from_path with tempfile ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blackbox.toml");
        fs::write(
            &path,
            r#"
[connection]
port = "/dev/ttyACM1"
[timing]
crash_window_attempts = 12
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(config.scenario().crash_window_attempts, 12);
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "connection = [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.port.is_none());
    }

    // ---- global_config_path ----

    #[test]
    fn test_global_config_path_shape() {
        if let Some(p) = Config::global_config_path() {
            let s = p.to_string_lossy();
            assert!(s.contains("blackbox"));
            assert!(s.ends_with("config.toml"));
        }
    }
}
