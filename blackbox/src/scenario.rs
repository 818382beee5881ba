//! Fixed fault-injection scenario.
//!
//! The runner drives four steps in strict program order:
//!
//! 1. stack pointer query, drained until idle after a short settle delay
//! 2. deep recursion stress, drained until idle after a longer settle delay
//! 3. explicit crash dump, grace period then a fixed capture window
//! 4. watchdog hang, wait out the watchdog plus a margin then a fixed window
//!
//! Each step's capture is recorded whether or not it is empty. Only a channel
//! failure (or an interrupt) stops the session early; the channel is closed on
//! every exit path.
//!
//! ## Example
//!
//! ```rust,no_run
//! use blackbox::{NativeChannel, ScenarioConfig, ScenarioRunner, SerialConfig, SystemClock};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channel = NativeChannel::open(&SerialConfig::new("/dev/ttyACM0", 9600))?;
//!     let runner = ScenarioRunner::new(ScenarioConfig::default(), SystemClock::new())?;
//!
//!     let result = runner.run(channel, |_event| {});
//!     for step in &result.steps {
//!         println!("{}: {}", step.step.command, step.capture.text);
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use log::{debug, info, warn};

use crate::clock::Clock;
use crate::collect::{Capture, capture_window, drain_until_idle};
use crate::command::{self, Command};
use crate::error::{Error, Result};
use crate::port::{Channel, ChannelGuard};

/// How replies are collected once the settle delay has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case", tag = "kind"))]
pub enum Collection {
    /// Read while data keeps arriving; stop at the first empty availability check.
    DrainUntilIdle {
        /// Wait between successive polls.
        #[cfg_attr(feature = "serde", serde(rename = "poll_interval_ms", serialize_with = "crate::collect::serialize_millis"))]
        poll_interval: Duration,
    },
    /// Always poll `attempts` times, `interval` apart.
    FixedAttempts {
        /// Number of polls.
        attempts: u32,
        /// Wait after every poll.
        #[cfg_attr(feature = "serde", serde(rename = "interval_ms", serialize_with = "crate::collect::serialize_millis"))]
        interval: Duration,
    },
}

/// Wait and collection policy attached to a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WaitPolicy {
    /// Wait after sending before the first read attempt.
    #[cfg_attr(feature = "serde", serde(rename = "settle_ms", serialize_with = "crate::collect::serialize_millis"))]
    pub settle: Duration,
    /// Collection strategy.
    pub collection: Collection,
}

impl WaitPolicy {
    /// Drain-until-idle policy.
    pub const fn drain(settle: Duration, poll_interval: Duration) -> Self {
        Self {
            settle,
            collection: Collection::DrainUntilIdle { poll_interval },
        }
    }

    /// Fixed-attempts window, preceded by a grace period.
    pub const fn window(grace: Duration, attempts: u32, interval: Duration) -> Self {
        Self {
            settle: grace,
            collection: Collection::FixedAttempts { attempts, interval },
        }
    }

    /// Worst-case wait when the device stays silent. Saturates at `Duration::MAX`.
    pub fn silent_duration(&self) -> Duration {
        self.checked_silent_duration()
            .unwrap_or(Duration::MAX)
    }

    fn checked_silent_duration(&self) -> Option<Duration> {
        match self.collection {
            Collection::DrainUntilIdle { .. } => Some(self.settle),
            Collection::FixedAttempts { attempts, interval } => self
                .settle
                .checked_add(interval.checked_mul(attempts)?),
        }
    }

    /// Run this policy against the channel.
    pub fn collect<C, K>(&self, channel: &mut C, clock: &K) -> Result<Capture>
    where
        C: Channel + ?Sized,
        K: Clock + ?Sized,
    {
        match self.collection {
            Collection::DrainUntilIdle { poll_interval } => {
                drain_until_idle(channel, clock, self.settle, poll_interval)
            },
            Collection::FixedAttempts { attempts, interval } => {
                let start = clock.now();
                clock.sleep(self.settle)?;
                let mut capture = capture_window(channel, clock, attempts, interval)?;
                capture.elapsed = clock.now() - start;
                Ok(capture)
            },
        }
    }

    fn validate(&self, label: &str) -> Result<()> {
        match self.collection {
            Collection::DrainUntilIdle { poll_interval } if poll_interval.is_zero() => Err(
                Error::Config(format!("{label}: drain poll interval must be non-zero")),
            ),
            Collection::FixedAttempts { attempts: 0, .. } => Err(Error::Config(format!(
                "{label}: capture window needs at least one attempt"
            ))),
            _ if self.checked_silent_duration().is_none() => Err(Error::Config(format!(
                "{label}: capture window is too long"
            ))),
            _ => Ok(()),
        }
    }
}

/// One command paired with its wait policy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TestStep {
    /// Human-readable label.
    pub label: String,
    /// Command to dispatch.
    pub command: Command,
    /// Pause before dispatching.
    #[cfg_attr(feature = "serde", serde(rename = "pre_delay_ms", serialize_with = "crate::collect::serialize_millis"))]
    pub pre_delay: Duration,
    /// Collection policy after dispatch.
    pub policy: WaitPolicy,
    /// Substring expected somewhere in the capture.
    pub expect: Option<String>,
}

/// Timing of the fixed scenario.
///
/// Defaults follow the crash reporter firmware: a 9600 baud UART, a reboot on
/// port open, a 2 s watchdog, and a reset cycle of roughly 2-3 s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    /// Wait after opening the port for the device to boot.
    pub boot_delay: Duration,
    /// Poll interval used when draining the boot banner.
    pub boot_poll_interval: Duration,

    /// Settle delay after the stack pointer query.
    pub stack_pointer_settle: Duration,
    /// Poll interval while draining the stack pointer reply.
    pub stack_pointer_poll: Duration,
    /// Expected marker in the stack pointer reply.
    pub stack_pointer_expect: Option<String>,

    /// Pause before the recursion stress step.
    pub recursion_pre_delay: Duration,
    /// Settle delay after the recursion stress command.
    pub recursion_settle: Duration,
    /// Poll interval while draining the recursion trace.
    pub recursion_poll: Duration,
    /// Expected marker in the recursion trace.
    pub recursion_expect: Option<String>,

    /// Pause before the crash dump step.
    pub crash_pre_delay: Duration,
    /// Grace period for the reset to begin.
    pub crash_grace: Duration,
    /// Polls in the post-crash window.
    pub crash_window_attempts: u32,
    /// Interval between post-crash polls.
    pub crash_window_interval: Duration,
    /// Expected marker in the post-crash report.
    pub crash_expect: Option<String>,

    /// Pause before the watchdog step.
    pub watchdog_pre_delay: Duration,
    /// How long the device hangs before its watchdog fires.
    pub watchdog_timeout: Duration,
    /// Extra wait on top of the watchdog timeout.
    pub watchdog_margin: Duration,
    /// Polls in the post-watchdog window.
    pub watchdog_window_attempts: u32,
    /// Interval between post-watchdog polls.
    pub watchdog_window_interval: Duration,
    /// Expected marker in the post-watchdog report.
    pub watchdog_expect: Option<String>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            boot_delay: Duration::from_secs(2),
            boot_poll_interval: Duration::from_millis(100),

            stack_pointer_settle: Duration::from_millis(500),
            stack_pointer_poll: Duration::from_millis(100),
            stack_pointer_expect: Some("Current Stack Pointer".to_string()),

            recursion_pre_delay: Duration::from_secs(1),
            recursion_settle: Duration::from_millis(500),
            recursion_poll: Duration::from_millis(100),
            recursion_expect: Some("Recursion test complete".to_string()),

            crash_pre_delay: Duration::from_secs(3),
            crash_grace: Duration::from_secs(3),
            crash_window_attempts: 10,
            crash_window_interval: Duration::from_millis(500),
            crash_expect: Some("EXPLICIT CRASH DUMP".to_string()),

            watchdog_pre_delay: Duration::ZERO,
            watchdog_timeout: Duration::from_secs(2),
            watchdog_margin: Duration::from_secs(4),
            watchdog_window_attempts: 10,
            watchdog_window_interval: Duration::from_millis(500),
            watchdog_expect: Some("WATCHDOG TIMEOUT".to_string()),
        }
    }
}

impl ScenarioConfig {
    /// The four scenario steps, in execution order.
    pub fn steps(&self) -> Vec<TestStep> {
        vec![
            self.step_for(Command::StackPointerQuery),
            self.step_for(Command::DeepRecursionStress),
            self.step_for(Command::CrashDump),
            self.step_for(Command::WatchdogHang),
        ]
    }

    /// The step that would run `command` in this scenario.
    ///
    /// `ClearCrashData` is not part of the scenario; it gets the quick-reply
    /// policy of the stack pointer query.
    pub fn step_for(&self, command: Command) -> TestStep {
        let (label, pre_delay, policy, expect) = match command {
            Command::StackPointerQuery => (
                "Stack pointer query",
                Duration::ZERO,
                WaitPolicy::drain(self.stack_pointer_settle, self.stack_pointer_poll),
                self.stack_pointer_expect
                    .clone(),
            ),
            Command::DeepRecursionStress => (
                "Deep recursion stress",
                self.recursion_pre_delay,
                WaitPolicy::drain(self.recursion_settle, self.recursion_poll),
                self.recursion_expect
                    .clone(),
            ),
            Command::CrashDump => (
                "Explicit crash dump",
                self.crash_pre_delay,
                WaitPolicy::window(
                    self.crash_grace,
                    self.crash_window_attempts,
                    self.crash_window_interval,
                ),
                self.crash_expect
                    .clone(),
            ),
            Command::WatchdogHang => (
                "Watchdog timeout",
                self.watchdog_pre_delay,
                WaitPolicy::window(
                    self.watchdog_timeout
                        .saturating_add(self.watchdog_margin),
                    self.watchdog_window_attempts,
                    self.watchdog_window_interval,
                ),
                self.watchdog_expect
                    .clone(),
            ),
            Command::ClearCrashData => (
                "Clear crash data",
                Duration::ZERO,
                WaitPolicy::drain(self.stack_pointer_settle, self.stack_pointer_poll),
                None,
            ),
        };

        TestStep {
            label: label.to_string(),
            command,
            pre_delay,
            policy,
            expect,
        }
    }

    /// Reject timings that would make a step meaningless.
    pub fn validate(&self) -> Result<()> {
        if self
            .boot_poll_interval
            .is_zero()
        {
            return Err(Error::Config("boot poll interval must be non-zero".into()));
        }
        if self
            .watchdog_timeout
            .checked_add(self.watchdog_margin)
            .is_none()
        {
            return Err(Error::Config("watchdog timeout plus margin is too long".into()));
        }
        for step in self.steps() {
            step.policy
                .validate(&step.label)?;
        }
        if self
            .checked_silent_duration()
            .is_none()
        {
            return Err(Error::Config("total scenario duration is too long".into()));
        }
        Ok(())
    }

    /// Worst-case session length when the device never answers.
    ///
    /// Saturates at `Duration::MAX`; [`validate`](Self::validate) rejects
    /// configs where that would happen.
    pub fn silent_duration(&self) -> Duration {
        self.checked_silent_duration()
            .unwrap_or(Duration::MAX)
    }

    fn checked_silent_duration(&self) -> Option<Duration> {
        self.steps()
            .iter()
            .try_fold(self.boot_delay, |acc, step| {
                acc.checked_add(step.pre_delay)?
                    .checked_add(step.policy.checked_silent_duration()?)
            })
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StepResult {
    /// The step that ran.
    pub step: TestStep,
    /// Everything captured after dispatch.
    pub capture: Capture,
    /// Whether the expected marker was seen (`None` when no marker is set).
    pub marker_found: Option<bool>,
}

impl StepResult {
    fn new(step: TestStep, capture: Capture) -> Self {
        let marker_found = step
            .expect
            .as_deref()
            .map(|marker| capture.contains(marker));
        Self {
            step,
            capture,
            marker_found,
        }
    }
}

/// How the session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Every step ran.
    Completed,
    /// An external interrupt stopped the session; the channel was closed.
    Interrupted,
    /// A channel error stopped the session; the channel was closed.
    Failed(Error),
}

/// Ordered step results plus the session outcome.
#[derive(Debug)]
pub struct ScenarioResult {
    /// Output drained right after opening the port.
    pub boot_log: Capture,
    /// Results of the steps that ran, in order.
    pub steps: Vec<StepResult>,
    /// How the session ended.
    pub outcome: SessionOutcome,
}

impl ScenarioResult {
    /// Whether the session completed without a channel error or interrupt.
    pub fn passed(&self) -> bool {
        matches!(self.outcome, SessionOutcome::Completed)
    }

    /// Number of steps whose expected marker was missing.
    pub fn missing_markers(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.marker_found == Some(false))
            .count()
    }

    /// Turn a non-completed outcome into an error.
    pub fn into_result(self) -> Result<Vec<StepResult>> {
        match self.outcome {
            SessionOutcome::Completed => Ok(self.steps),
            SessionOutcome::Interrupted => Err(Error::Interrupted),
            SessionOutcome::Failed(e) => Err(e),
        }
    }
}

/// Progress notifications emitted while the scenario runs.
#[derive(Debug, Clone, Copy)]
pub enum RunEvent<'a> {
    /// Waiting for the device to boot after the port was opened.
    Booting {
        /// Boot delay.
        delay: Duration,
    },
    /// A step is about to be dispatched.
    StepStarted {
        /// Zero-based step index.
        index: usize,
        /// Total number of steps.
        total: usize,
        /// The step.
        step: &'a TestStep,
    },
    /// The command was sent; collection is in progress.
    Waiting {
        /// Zero-based step index.
        index: usize,
        /// Worst-case wait if the device stays silent.
        budget: Duration,
    },
    /// A step finished collecting.
    StepFinished {
        /// Zero-based step index.
        index: usize,
        /// The finished result.
        result: &'a StepResult,
    },
}

/// Orchestrates the scenario on a single channel.
///
/// Generic over the clock so tests run on virtual time.
pub struct ScenarioRunner<K: Clock> {
    config: ScenarioConfig,
    clock: K,
}

impl<K: Clock> ScenarioRunner<K> {
    /// Create a runner; fails if the configuration is invalid.
    pub fn new(config: ScenarioConfig, clock: K) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, clock })
    }

    /// Scenario configuration.
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Clock used for every wait.
    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Run the full scenario, taking ownership of an opened channel.
    pub fn run<C, F>(&self, channel: C, observer: F) -> ScenarioResult
    where
        C: Channel,
        F: FnMut(RunEvent<'_>),
    {
        self.run_steps(channel, &self.config.steps(), observer)
    }

    /// Run one command with its scenario policy (boot handling included).
    pub fn run_single<C, F>(&self, channel: C, command: Command, observer: F) -> ScenarioResult
    where
        C: Channel,
        F: FnMut(RunEvent<'_>),
    {
        self.run_steps(channel, &[self.config.step_for(command)], observer)
    }

    /// Run an arbitrary ordered list of steps.
    ///
    /// The channel is closed exactly once before this returns, whatever the
    /// outcome.
    pub fn run_steps<C, F>(&self, channel: C, steps: &[TestStep], mut observer: F) -> ScenarioResult
    where
        C: Channel,
        F: FnMut(RunEvent<'_>),
    {
        let mut guard = ChannelGuard::new(channel);
        let mut boot_log = Capture::default();
        let mut results = Vec::with_capacity(steps.len());

        let outcome = match self.drive(&mut guard, steps, &mut boot_log, &mut results, &mut observer)
        {
            Ok(()) => SessionOutcome::Completed,
            Err(Error::Interrupted) => {
                warn!("Interrupted after {} of {} steps", results.len(), steps.len());
                SessionOutcome::Interrupted
            },
            Err(e) => {
                warn!("Session aborted after {} of {} steps: {e}", results.len(), steps.len());
                SessionOutcome::Failed(e)
            },
        };

        guard.close();

        ScenarioResult {
            boot_log,
            steps: results,
            outcome,
        }
    }

    fn drive<C, F>(
        &self,
        channel: &mut ChannelGuard<C>,
        steps: &[TestStep],
        boot_log: &mut Capture,
        results: &mut Vec<StepResult>,
        observer: &mut F,
    ) -> Result<()>
    where
        C: Channel,
        F: FnMut(RunEvent<'_>),
    {
        info!("Session started on {}", channel.name());

        observer(RunEvent::Booting {
            delay: self.config.boot_delay,
        });
        *boot_log = drain_until_idle(
            &mut **channel,
            &self.clock,
            self.config.boot_delay,
            self.config.boot_poll_interval,
        )?;
        debug!("Boot banner: {} bytes", boot_log.bytes_read);

        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            observer(RunEvent::StepStarted { index, total, step });
            info!("[{}/{total}] {}", index + 1, step.label);

            if !step.pre_delay.is_zero() {
                debug!("Pre-delay {:?}", step.pre_delay);
                self.clock.sleep(step.pre_delay)?;
            }

            command::send(&mut **channel, step.command)?;
            observer(RunEvent::Waiting {
                index,
                budget: step.policy.silent_duration(),
            });

            let capture = step
                .policy
                .collect(&mut **channel, &self.clock)?;
            let result = StepResult::new(step.clone(), capture);

            match result.marker_found {
                Some(false) => info!(
                    "{}: {} bytes, marker {:?} not seen",
                    step.label,
                    result.capture.bytes_read,
                    step.expect.as_deref().unwrap_or_default()
                ),
                _ => info!("{}: {} bytes", step.label, result.capture.bytes_read),
            }

            observer(RunEvent::StepFinished {
                index,
                result: &result,
            });
            results.push(result);
        }

        info!("Session completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sim::SimulatedDevice;

    fn init_logger() {
        let _ = env_logger::builder()
            .is_test(true)
            .try_init();
    }

    /// Timings matching the end-to-end expectations: crash text arrives 2.5 s
    /// after the reset command and the window covers more than 3 s.
    fn test_config() -> ScenarioConfig {
        ScenarioConfig {
            boot_delay: Duration::from_millis(100),
            crash_pre_delay: Duration::ZERO,
            crash_grace: Duration::from_millis(500),
            crash_window_attempts: 8,
            crash_window_interval: Duration::from_millis(500),
            watchdog_timeout: Duration::from_secs(2),
            watchdog_margin: Duration::from_millis(500),
            watchdog_window_attempts: 4,
            watchdog_window_interval: Duration::from_millis(500),
            ..ScenarioConfig::default()
        }
    }

    fn scripted_device(clock: &ManualClock) -> SimulatedDevice {
        SimulatedDevice::new(clock.clone())
            .on_command(b'4', Duration::ZERO, b"SP=0x20001ffc\n")
            .on_command(b'5', Duration::from_millis(200), b"depth 50\r\ndepth 40\r\n")
            .on_command(b'2', Duration::from_millis(2500), b"REBOOT: crash at 0x0804\n")
            .on_command(b'1', Duration::from_millis(2100), b"WATCHDOG RESET\n")
    }

    #[test]
    fn test_default_steps_order_and_policies() {
        let config = ScenarioConfig::default();
        let steps = config.steps();
        let commands: Vec<Command> = steps
            .iter()
            .map(|s| s.command)
            .collect();
        assert_eq!(
            commands,
            vec![
                Command::StackPointerQuery,
                Command::DeepRecursionStress,
                Command::CrashDump,
                Command::WatchdogHang,
            ]
        );
        assert!(matches!(
            steps[0].policy.collection,
            Collection::DrainUntilIdle { .. }
        ));
        assert!(steps[1].policy.settle >= steps[0].policy.settle);
        assert!(matches!(
            steps[2].policy.collection,
            Collection::FixedAttempts { attempts: 10, .. }
        ));
        assert!(steps[3].policy.settle >= config.watchdog_timeout);
    }

    #[test]
    fn test_validate_rejects_zero_attempt_window() {
        let config = ScenarioConfig {
            crash_window_attempts: 0,
            ..ScenarioConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(ScenarioRunner::new(config, ManualClock::new()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_drain_poll() {
        let config = ScenarioConfig {
            stack_pointer_poll: Duration::ZERO,
            ..ScenarioConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_window_that_overflows() {
        let config = ScenarioConfig {
            crash_window_attempts: u32::MAX,
            crash_window_interval: Duration::from_millis(u64::MAX),
            ..ScenarioConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert_eq!(config.silent_duration(), Duration::MAX);
        assert!(ScenarioRunner::new(config, ManualClock::new()).is_err());
    }

    #[test]
    fn test_validate_rejects_total_that_overflows() {
        // Each step fits on its own; the sum does not
        let config = ScenarioConfig {
            boot_delay: Duration::MAX,
            ..ScenarioConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ScenarioConfig {
            watchdog_timeout: Duration::MAX,
            ..ScenarioConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert_eq!(
            config
                .step_for(Command::WatchdogHang)
                .policy
                .settle,
            Duration::MAX
        );
    }

    #[test]
    fn test_silent_duration_adds_all_waits() {
        let config = ScenarioConfig::default();
        // 2 boot + 0.5 + (1 + 0.5) + (3 + 3 + 5) + (6 + 5)
        assert_eq!(config.silent_duration(), Duration::from_millis(26_000));
    }

    #[test]
    fn test_end_to_end_scenario_against_simulated_device() {
        init_logger();
        let clock = ManualClock::new();
        let device = scripted_device(&clock);
        let probe = device.probe();
        let runner = ScenarioRunner::new(test_config(), clock.clone()).unwrap();

        let result = runner.run(device, |_| {});

        assert!(result.passed(), "outcome: {:?}", result.outcome);
        assert_eq!(result.steps.len(), 4);
        assert_eq!(result.steps[0].capture.text, "SP=0x20001ffc\n");
        assert!(result.steps[1].capture.contains("depth 40"));
        assert!(result.steps[2].capture.contains("REBOOT: crash at 0x0804"));
        assert!(result.steps[3].capture.contains("WATCHDOG RESET"));
        assert!(result.steps[3].capture.elapsed >= Duration::from_millis(2100));

        assert_eq!(probe.written(), b"4521".to_vec());
        assert_eq!(probe.close_calls(), 1);
    }

    #[test]
    fn test_empty_steps_are_recorded_not_failed() {
        let clock = ManualClock::new();
        let device = SimulatedDevice::new(clock.clone());
        let runner = ScenarioRunner::new(test_config(), clock).unwrap();

        let result = runner.run(device, |_| {});

        assert!(result.passed());
        assert_eq!(result.steps.len(), 4);
        assert!(
            result
                .steps
                .iter()
                .all(|s| s.capture.is_empty())
        );
        assert_eq!(result.missing_markers(), 4);
    }

    #[test]
    fn test_io_error_aborts_session_and_closes_once() {
        let clock = ManualClock::new();
        // Boot drain and first two commands succeed; the third write fails
        let device = scripted_device(&clock).fail_writes_after(2);
        let probe = device.probe();
        let runner = ScenarioRunner::new(test_config(), clock).unwrap();

        let result = runner.run(device, |_| {});

        assert!(!result.passed());
        assert!(matches!(result.outcome, SessionOutcome::Failed(Error::Io(_))));
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].capture.text, "SP=0x20001ffc\n");
        assert_eq!(probe.close_calls(), 1);
        assert!(result.into_result().is_err());
    }

    #[test]
    fn test_markers_reported_per_step() {
        let clock = ManualClock::new();
        let device = scripted_device(&clock);
        let config = ScenarioConfig {
            stack_pointer_expect: Some("SP=".into()),
            recursion_expect: None,
            crash_expect: Some("REBOOT".into()),
            watchdog_expect: Some("never printed".into()),
            ..test_config()
        };
        let runner = ScenarioRunner::new(config, clock).unwrap();

        let result = runner.run(device, |_| {});

        let markers: Vec<Option<bool>> = result
            .steps
            .iter()
            .map(|s| s.marker_found)
            .collect();
        assert_eq!(markers, vec![Some(true), None, Some(true), Some(false)]);
        assert_eq!(result.missing_markers(), 1);
        // Markers never change the session outcome
        assert!(result.passed());
    }

    #[test]
    fn test_boot_banner_is_kept_out_of_steps() {
        let clock = ManualClock::new();
        let device = scripted_device(&clock).with_boot_banner(Duration::from_millis(50), b"[BOOT] System ready!\r\n");
        let runner = ScenarioRunner::new(test_config(), clock).unwrap();

        let result = runner.run(device, |_| {});

        assert!(result.boot_log.contains("System ready"));
        assert!(!result.steps[0].capture.contains("System ready"));
    }

    #[test]
    fn test_observer_sees_events_in_order() {
        let clock = ManualClock::new();
        let device = scripted_device(&clock);
        let runner = ScenarioRunner::new(test_config(), clock).unwrap();
        let mut seen = Vec::new();

        let result = runner.run(device, |event| {
            seen.push(match event {
                RunEvent::Booting { .. } => "boot".to_string(),
                RunEvent::StepStarted { index, .. } => format!("start{index}"),
                RunEvent::Waiting { index, .. } => format!("wait{index}"),
                RunEvent::StepFinished { index, .. } => format!("done{index}"),
            });
        });

        assert!(result.passed());
        assert_eq!(seen.first().map(String::as_str), Some("boot"));
        assert_eq!(seen.len(), 1 + 4 * 3);
        assert_eq!(&seen[1..4], ["start0", "wait0", "done0"]);
        assert_eq!(seen.last().map(String::as_str), Some("done3"));
    }

    #[test]
    fn test_run_single_sends_one_command() {
        let clock = ManualClock::new();
        let device = scripted_device(&clock).on_command(b'3', Duration::ZERO, b"cleared\n");
        let probe = device.probe();
        let runner = ScenarioRunner::new(test_config(), clock).unwrap();

        let result = runner.run_single(device, Command::ClearCrashData, |_| {});

        assert!(result.passed());
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].capture.text, "cleared\n");
        assert_eq!(probe.written(), b"3".to_vec());
        assert_eq!(probe.close_calls(), 1);
    }

    #[test]
    fn test_window_step_elapsed_includes_grace() {
        let clock = ManualClock::new();
        let mut device = SimulatedDevice::new(clock.clone());
        let policy = WaitPolicy::window(Duration::from_secs(1), 5, Duration::from_millis(200));

        let capture = policy.collect(&mut device, &clock).unwrap();

        assert_eq!(capture.polls, 5);
        assert_eq!(capture.elapsed, Duration::from_secs(2));
        assert_eq!(policy.silent_duration(), Duration::from_secs(2));
    }
}
