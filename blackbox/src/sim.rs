//! Simulated device for running the harness without hardware.
//!
//! [`SimulatedDevice`] implements [`Channel`] on top of a [`ManualClock`].
//! Every written command byte schedules reply bursts at offsets from the
//! virtual time of the write; a burst only becomes readable once the shared
//! clock has reached it. Because collectors sleep on the same clock, reset
//! latencies of several seconds cost nothing in tests.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use log::trace;

use crate::clock::{Clock, ManualClock};
use crate::error::{Error, Result};
use crate::port::Channel;

#[derive(Debug, Clone)]
struct Burst {
    at: Duration,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct ProbeState {
    written: Vec<u8>,
    close_calls: usize,
}

/// Read-only view of what happened to a [`SimulatedDevice`].
///
/// Stays valid after the device has been moved into a runner.
#[derive(Debug, Clone)]
pub struct DeviceProbe {
    state: Rc<RefCell<ProbeState>>,
}

impl DeviceProbe {
    /// Every byte written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.state
            .borrow()
            .written
            .clone()
    }

    /// How many times `close()` was called.
    pub fn close_calls(&self) -> usize {
        self.state
            .borrow()
            .close_calls
    }
}

/// Virtual device answering command bytes with timed output.
pub struct SimulatedDevice {
    clock: ManualClock,
    replies: HashMap<u8, Vec<Burst>>,
    scheduled: Vec<Burst>,
    rx: VecDeque<u8>,
    state: Rc<RefCell<ProbeState>>,
    fail_writes_after: Option<usize>,
    closed: bool,
}

impl SimulatedDevice {
    /// A silent device sharing `clock`.
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            replies: HashMap::new(),
            scheduled: Vec::new(),
            rx: VecDeque::new(),
            state: Rc::default(),
            fail_writes_after: None,
            closed: false,
        }
    }

    /// Reply to `command` with `bytes`, `delay` after the command is written.
    ///
    /// Calling this again for the same command adds another burst.
    #[must_use]
    pub fn on_command(mut self, command: u8, delay: Duration, bytes: &[u8]) -> Self {
        self.replies
            .entry(command)
            .or_default()
            .push(Burst {
                at: delay,
                bytes: bytes.to_vec(),
            });
        self
    }

    /// Emit `bytes` unprompted, `delay` after now (e.g. a boot banner).
    #[must_use]
    pub fn with_boot_banner(mut self, delay: Duration, bytes: &[u8]) -> Self {
        let at = self.clock.now() + delay;
        self.schedule(at, bytes.to_vec());
        self
    }

    /// Fail every write once `count` command bytes have been accepted.
    #[must_use]
    pub fn fail_writes_after(mut self, count: usize) -> Self {
        self.fail_writes_after = Some(count);
        self
    }

    /// Handle for inspecting writes and closes after the device is moved.
    pub fn probe(&self) -> DeviceProbe {
        DeviceProbe {
            state: Rc::clone(&self.state),
        }
    }

    /// A device that behaves like the crash reporter firmware: boot banner,
    /// immediate replies to `4`, `5` and `3`, and a reset followed by a
    /// post-mortem report 2.5 s after `2` and 2.1 s after `1`.
    pub fn crash_reporter(clock: ManualClock) -> Self {
        let ms = Duration::from_millis;
        let mut device = Self::new(clock).with_boot_banner(ms(50), &banner(None));

        device = device
            .on_command(b'4', ms(5), b"4\r\n>>> Current Stack Pointer: 0x08F3 <<<\r\n")
            .on_command(b'4', ms(15), b">>> RAMEND: 0x08FF <<<\r\n")
            .on_command(b'4', ms(25), MENU.as_bytes());

        device = device.on_command(
            b'5',
            ms(5),
            b"5\r\n>>> Starting deep recursion test (50 levels)... <<<\r\n>>> Initial SP: 0x08F3 <<<\r\n",
        );
        for (i, depth) in [50u16, 40, 30, 20, 10].into_iter().enumerate() {
            let sp = 0x08F3 - (50 - depth + 1) * 37;
            let line = format!("  Recursion depth: 0x{depth:04X} | SP: 0x{sp:04X}\r\n");
            device = device.on_command(b'5', ms(20 + 30 * i as u64), line.as_bytes());
        }
        device = device
            .on_command(
                b'5',
                ms(180),
                b">>> Final SP: 0x08F3 <<<\r\n>>> Recursion test complete! <<<\r\n",
            )
            .on_command(b'5', ms(190), MENU.as_bytes());

        device = device.on_command(
            b'3',
            ms(5),
            b"3\r\n>>> Clearing EEPROM crash data... <<<\r\n>>> EEPROM cleared! <<<\r\n",
        );

        device = device
            .on_command(
                b'2',
                ms(5),
                b"2\r\n\r\n>>> User-triggered crash dump - saving state... <<<\r\n>>> Dump saved! Forcing system reset... <<<\r\n",
            )
            .on_command(b'2', ms(2500), &banner(Some("EXPLICIT CRASH DUMP (User Triggered)")));

        device
            .on_command(
                b'1',
                ms(5),
                b"1\r\n\r\n>>> Entering infinite loop... Watchdog will trigger in ~2s <<<\r\n",
            )
            .on_command(b'1', ms(2100), &banner(Some("WATCHDOG TIMEOUT (System Hung)")))
    }

    fn schedule(&mut self, at: Duration, bytes: Vec<u8>) {
        let pos = self
            .scheduled
            .partition_point(|b| b.at <= at);
        self.scheduled
            .insert(pos, Burst { at, bytes });
    }

    fn release_due(&mut self) {
        let now = self.clock.now();
        let due = self
            .scheduled
            .partition_point(|b| b.at <= now);
        for burst in self
            .scheduled
            .drain(..due)
        {
            trace!("Device emits {} bytes at {:?}", burst.bytes.len(), burst.at);
            self.rx
                .extend(burst.bytes);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "simulated device closed",
            )));
        }
        Ok(())
    }
}

impl Channel for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let accepted = self
            .state
            .borrow()
            .written
            .len();
        if self
            .fail_writes_after
            .is_some_and(|limit| accepted + buf.len() > limit)
        {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated device unplugged",
            )));
        }

        self.state
            .borrow_mut()
            .written
            .extend_from_slice(buf);

        let now = self.clock.now();
        for byte in buf {
            let bursts = self
                .replies
                .get(byte)
                .cloned()
                .unwrap_or_default();
            for burst in bursts {
                self.schedule(now + burst.at, burst.bytes);
            }
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.ensure_open()?;
        self.release_due();
        Ok(self.rx.len())
    }

    fn read_available(&mut self, max: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.release_due();
        let n = max.min(self.rx.len());
        Ok(self
            .rx
            .drain(..n)
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        self.state
            .borrow_mut()
            .close_calls += 1;
        self.closed = true;
        Ok(())
    }
}

const MENU: &str = "\r\n[1] Watchdog  [2] Crash dump  [3] Clear  [4] Stack pointer  [5] Recursion\r\nSelect option: ";

fn banner(crash_reason: Option<&str>) -> Vec<u8> {
    let mut text = String::from(
        "\r\n====================================================\r\n   Black Box Forensic Crash Reporter\r\n====================================================\r\n[BOOT] Checking EEPROM for crash report...\r\n",
    );
    match crash_reason {
        Some(reason) => {
            text.push_str("[BOOT] *** PREVIOUS CRASH DETECTED! ***\r\n");
            text.push_str("╔══════════════════════════════════════════╗\r\n");
            text.push_str(&format!("║ Crash Reason: {reason}\r\n"));
            text.push_str("║ Stack Pointer at Crash: 0x08E1\r\n");
            text.push_str("╚══════════════════════════════════════════╝\r\n");
            text.push_str("[BOOT] Crash data cleared. Ready for new crashes!\r\n");
        },
        None => text.push_str("[BOOT] No crash report found. Clean boot!\r\n"),
    }
    text.push_str("[BOOT] Initializing Watchdog Timer (2s timeout)...\r\n[BOOT] System ready!\r\n");
    text.push_str(MENU);
    text.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_not_visible_before_its_time() {
        let clock = ManualClock::new();
        let mut device = SimulatedDevice::new(clock.clone()).on_command(
            b'2',
            Duration::from_millis(2500),
            b"REBOOT",
        );

        device
            .write_all_bytes(b"2")
            .unwrap();
        clock.advance(Duration::from_millis(2499));
        assert_eq!(device.bytes_available().unwrap(), 0);

        clock.advance(Duration::from_millis(1));
        assert_eq!(device.bytes_available().unwrap(), 6);
        assert_eq!(device.read_available(3).unwrap(), b"REB".to_vec());
        assert_eq!(device.read_available(64).unwrap(), b"OOT".to_vec());
    }

    #[test]
    fn test_unknown_command_is_silent_but_recorded() {
        let clock = ManualClock::new();
        let mut device = SimulatedDevice::new(clock.clone());
        let probe = device.probe();

        device
            .write_all_bytes(b"9")
            .unwrap();
        clock.advance(Duration::from_secs(5));

        assert_eq!(device.bytes_available().unwrap(), 0);
        assert_eq!(probe.written(), b"9".to_vec());
    }

    #[test]
    fn test_close_is_idempotent_and_counted() {
        let mut device = SimulatedDevice::new(ManualClock::new());
        let probe = device.probe();

        device.close().unwrap();
        device.close().unwrap();

        assert_eq!(probe.close_calls(), 2);
        assert!(device.bytes_available().is_err());
    }

    #[test]
    fn test_fail_writes_after_limit() {
        let mut device = SimulatedDevice::new(ManualClock::new()).fail_writes_after(1);

        device
            .write_all_bytes(b"4")
            .unwrap();
        let err = device
            .write_all_bytes(b"5")
            .unwrap_err();
        assert!(err.is_channel_failure());
    }

    #[test]
    fn test_crash_reporter_reports_after_reset() {
        let clock = ManualClock::new();
        let mut device = SimulatedDevice::crash_reporter(clock.clone());

        clock.advance(Duration::from_millis(100));
        let n = device.bytes_available().unwrap();
        let banner = String::from_utf8(device.read_available(n).unwrap()).unwrap();
        assert!(banner.contains("Clean boot"));

        device
            .write_all_bytes(b"1")
            .unwrap();
        clock.advance(Duration::from_millis(2200));
        let n = device.bytes_available().unwrap();
        let report = String::from_utf8(device.read_available(n).unwrap()).unwrap();
        assert!(report.contains("Entering infinite loop"));
        assert!(report.contains("WATCHDOG TIMEOUT"));
    }
}
