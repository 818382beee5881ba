//! Error types for blackbox.

use std::io;
use thiserror::Error;

/// Result type for blackbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for blackbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial port could not be opened (missing device, permissions, busy).
    #[error("Cannot open {port}: {source}")]
    Connection {
        /// Port name/path that failed to open.
        port: String,
        /// Underlying cause reported by the driver.
        #[source]
        source: io::Error,
    },

    /// Read or write failure on an open channel (e.g. device unplugged).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An external interrupt was observed while waiting.
    #[error("Interrupted")]
    Interrupted,

    /// Invalid scenario or timing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is the result of a user interrupt rather than a failure.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Whether this error came from the channel itself (open or mid-session I/O).
    pub fn is_channel_failure(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Io(_))
    }
}

#[cfg(feature = "native")]
impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Self::Io(err.into())
    }
}
