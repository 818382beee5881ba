//! # blackbox
//!
//! A serial command/response harness for a crash-reporting embedded device.
//!
//! The harness drives the device through a fixed fault-injection scenario and
//! captures what it says back:
//!
//! - single-byte command dispatch
//! - drain-until-idle collection for quick replies
//! - fixed capture windows spanning device resets
//! - a scenario runner that owns the channel and closes it on every exit path
//!
//! All waiting goes through the [`Clock`] trait and all I/O through the
//! [`Channel`] trait, so the whole scenario runs against
//! [`sim::SimulatedDevice`] on virtual time.
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: `Serialize` for commands, policies and results
//!
//! ## Example
//!
//! ```rust,no_run
//! use blackbox::{NativeChannel, ScenarioConfig, ScenarioRunner, SerialConfig, SystemClock};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SerialConfig::new("/dev/ttyACM0", 9600);
//!     let channel = NativeChannel::open(&config)?;
//!
//!     let runner = ScenarioRunner::new(ScenarioConfig::default(), SystemClock::new())?;
//!     let result = runner.run(channel, |_event| {});
//!
//!     for step in result.into_result()? {
//!         println!("== {}\n{}", step.step.label, step.capture.text);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod clock;
pub mod collect;
pub mod command;
pub mod decode;
pub mod device;
pub mod error;
pub mod port;
pub mod scenario;
pub mod sim;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register the process-wide stop flag for [`SystemClock`].
///
/// Every wait in a session is a `SystemClock::sleep`, which wakes every
/// 20 ms to call this checker. Once it returns `true` the sleep ends with
/// [`Error::Interrupted`] and the runner closes the channel and keeps the
/// steps captured so far. Only the first registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Whether the registered checker currently asks the session to stop.
///
/// `false` when no checker has been registered.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativeChannel;
pub use {
    clock::{Clock, ManualClock, SystemClock},
    collect::{Capture, ResponseBuffer, capture_window, drain_until_idle},
    command::{Command, send},
    decode::{decode_lossy_prefix, normalize_newlines},
    device::{DetectedPort, DeviceKind, detect_ports},
    error::{Error, Result},
    port::{Channel, ChannelGuard, DEFAULT_BAUD, SerialConfig},
    scenario::{
        Collection, RunEvent, ScenarioConfig, ScenarioResult, ScenarioRunner, SessionOutcome,
        StepResult, TestStep, WaitPolicy,
    },
};
