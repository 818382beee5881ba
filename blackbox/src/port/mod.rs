//! Channel abstraction over the duplex byte stream to the device.
//!
//! The harness never talks to a serial driver directly. Everything above this
//! module works against the [`Channel`] trait, so the same dispatch and
//! collection code drives a real port, a scripted mock, or the simulated
//! device in [`crate::sim`].
//!
//! ```text
//! +------------------+     +------------------+
//! |  ScenarioRunner  |     |  ScenarioRunner  |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! |  Channel Trait   |     |  Channel Trait   |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! |  NativeChannel   |     | SimulatedDevice  |
//! |   (serialport)   |     |  (ManualClock)   |
//! +------------------+     +------------------+
//!      Hardware                  Tests
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use blackbox::port::{Channel, SerialConfig};
//!
//! fn example<C: Channel>(channel: &mut C) -> blackbox::Result<()> {
//!     channel.write_all_bytes(b"4")?;
//!
//!     let available = channel.bytes_available()?;
//!     let data = channel.read_available(available)?;
//!     println!("Received: {}", String::from_utf8_lossy(&data));
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use log::{trace, warn};

use crate::error::Result;

/// Baud rate the crash reporter firmware configures its UART with.
pub const DEFAULT_BAUD: u32 = 9600;

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Duplex byte channel to the device under test.
///
/// Implementations must never block in [`bytes_available`](Channel::bytes_available)
/// or wait for more data than is already buffered in
/// [`read_available`](Channel::read_available).
pub trait Channel {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Write all bytes and flush before returning.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()>;

    /// Number of received bytes currently buffered. Returns 0 when idle.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read up to `max` bytes that are already buffered.
    fn read_available(&mut self, max: usize) -> Result<Vec<u8>>;

    /// Close the channel and release resources.
    ///
    /// Must be idempotent: closing twice, or closing a channel whose link has
    /// already failed, is not an error.
    fn close(&mut self) -> Result<()>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_all_bytes(buf)
    }

    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn read_available(&mut self, max: usize) -> Result<Vec<u8>> {
        (**self).read_available(max)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Scoped owner of a session's channel.
///
/// The wrapped channel is closed exactly once: by an explicit
/// [`close`](ChannelGuard::close), or on drop for every other exit path
/// (error propagation, interrupt, unwinding).
pub struct ChannelGuard<C: Channel> {
    channel: C,
    closed: bool,
}

impl<C: Channel> ChannelGuard<C> {
    /// Take ownership of an opened channel.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            closed: false,
        }
    }

    /// Whether the channel has been released.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the channel now. Later calls (including the one from `Drop`) are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        trace!("Closing channel {}", self.channel.name());
        if let Err(e) = self.channel.close() {
            warn!("Closing {} failed: {e}", self.channel.name());
        }
    }
}

impl<C: Channel> Deref for ChannelGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.channel
    }
}

impl<C: Channel> DerefMut for ChannelGuard<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

impl<C: Channel> Drop for ChannelGuard<C> {
    fn drop(&mut self) {
        self.close();
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::NativeChannel;
