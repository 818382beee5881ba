//! Native serial channel implementation using the `serialport` crate.
//!
//! This module provides the channel implementation for native platforms
//! (Linux, macOS, Windows, FreeBSD, etc.).

use {
    crate::{
        error::{Error, Result},
        port::{Channel, SerialConfig},
    },
    log::{debug, trace},
    serialport::{DataBits, FlowControl, Parity, StopBits},
    std::io::{self, Read, Write},
};

/// Native serial channel.
///
/// The underlying port is held in an `Option` so that [`Channel::close`] can
/// drop it early and stay idempotent.
pub struct NativeChannel {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl NativeChannel {
    /// Open a serial port with the given configuration (8N1, no flow control).
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening {} at {} baud (timeout {:?})",
            config.port_name, config.baud_rate, config.timeout
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| Error::Connection {
                port: config
                    .port_name
                    .clone(),
                source: e.into(),
            })?;

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
            baud_rate: config.baud_rate,
        })
    }

    /// Get the configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotConnected, "port closed")))
    }
}

impl Channel for NativeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(buf)?;
        port.flush()?;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let count = self
            .port_mut()?
            .bytes_to_read()?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    fn read_available(&mut self, max: usize) -> Result<Vec<u8>> {
        let available = self.bytes_available()?;
        let want = available.min(max);
        if want == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; want];
        let n = match self
            .port_mut()?
            .read(&mut buf)
        {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(Error::Io(e)),
        };
        buf.truncate(n);
        trace!("Read {n} of {available} buffered bytes");
        Ok(buf)
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the boxed port closes the OS handle
        if self
            .port
            .take()
            .is_some()
        {
            debug!("Closed {}", self.name);
        }
        Ok(())
    }
}
