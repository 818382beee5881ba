//! Test commands and their single-byte wire encoding.
//!
//! The device reads one ASCII digit per command. There is no framing, no
//! acknowledgment byte and no length prefix:
//!
//! ```text
//! +-------+-----------------------------------+
//! | Digit | Meaning                           |
//! +-------+-----------------------------------+
//! |  '1'  | Induce watchdog-triggering hang   |
//! |  '2'  | Explicit crash dump (resets)      |
//! |  '3'  | Clear stored crash report         |
//! |  '4'  | Report current stack pointer      |
//! |  '5'  | Run deep recursion stress         |
//! +-------+-----------------------------------+
//! ```

use std::fmt;
use std::str::FromStr;

use log::trace;

use crate::error::{Error, Result};
use crate::port::Channel;

/// A fault-injection command understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Command {
    /// Report the current stack pointer.
    StackPointerQuery,
    /// Run a stack-heavy recursive computation.
    DeepRecursionStress,
    /// Save a crash dump and force a reset.
    CrashDump,
    /// Spin without feeding the watchdog until it resets the device.
    WatchdogHang,
    /// Clear the crash report stored on the device.
    ClearCrashData,
}

impl Command {
    /// Every command the device understands, in wire-digit order.
    pub const ALL: [Self; 5] = [
        Self::WatchdogHang,
        Self::CrashDump,
        Self::ClearCrashData,
        Self::StackPointerQuery,
        Self::DeepRecursionStress,
    ];

    /// The single ASCII digit sent for this command.
    pub const fn wire_byte(self) -> u8 {
        match self {
            Self::WatchdogHang => b'1',
            Self::CrashDump => b'2',
            Self::ClearCrashData => b'3',
            Self::StackPointerQuery => b'4',
            Self::DeepRecursionStress => b'5',
        }
    }

    /// Look up the command for a wire digit.
    pub fn from_wire_byte(byte: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.wire_byte() == byte)
    }

    /// Whether the device resets (and drops off the link) after this command.
    pub fn resets_device(self) -> bool {
        matches!(self, Self::CrashDump | Self::WatchdogHang)
    }

    /// Short, stable identifier (used on the command line and in JSON).
    pub fn name(self) -> &'static str {
        match self {
            Self::StackPointerQuery => "stack-pointer",
            Self::DeepRecursionStress => "deep-recursion",
            Self::CrashDump => "crash-dump",
            Self::WatchdogHang => "watchdog",
            Self::ClearCrashData => "clear",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let [digit] = s.as_bytes() {
            if let Some(command) = Self::from_wire_byte(*digit) {
                return Ok(command);
            }
        }
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("Unknown command: '{s}'")))
    }
}

/// Write a command's wire byte to the channel.
///
/// Returns as soon as the byte is flushed; waiting for a reply is the caller's
/// job, since every command needs a different wait policy.
pub fn send<C: Channel + ?Sized>(channel: &mut C, command: Command) -> Result<()> {
    let byte = command.wire_byte();
    trace!("Sending {command} as {:?}", char::from(byte));
    channel.write_all_bytes(&[byte])
}
