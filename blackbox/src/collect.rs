//! Response collection policies.
//!
//! Two policies cover every step of the scenario:
//!
//! - [`drain_until_idle`]: wait a settle delay, then read while data keeps
//!   arriving and stop at the first poll where the channel reports nothing
//!   available. Used for commands that answer immediately.
//! - [`capture_window`]: poll a fixed number of times at a fixed interval no
//!   matter what arrives. Used after commands that reset the device, where boot
//!   and crash text come in bursts separated by gaps longer than one poll.
//!
//! Note that `drain_until_idle` truncates a reply whose bursts are separated by
//! more than one poll interval. That is the accepted price for low latency on
//! quick-reply commands; use a window when a reply may pause.

use std::time::Duration;

use log::{debug, trace};

use crate::clock::Clock;
use crate::decode::decode_lossy_prefix;
use crate::error::Result;
use crate::port::Channel;

/// Text accumulated across the reads of one step.
///
/// Decoding is lossy: invalid byte sequences become `U+FFFD`. A multi-byte
/// character split across two reads is reassembled.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    text: String,
    pending: Vec<u8>,
    bytes_read: usize,
}

impl ResponseBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and append one read's worth of bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.bytes_read += bytes.len();
        self.pending
            .extend_from_slice(bytes);
        let decoded = decode_lossy_prefix(&mut self.pending);
        self.text
            .push_str(&decoded);
    }

    /// Text decoded so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether no bytes have been appended.
    pub fn is_empty(&self) -> bool {
        self.bytes_read == 0
    }

    /// Finalize the buffer. Bytes of an unfinished UTF-8 sequence are replaced.
    pub fn finish(mut self, polls: usize, elapsed: Duration) -> Capture {
        if !self
            .pending
            .is_empty()
        {
            self.text
                .push_str(&String::from_utf8_lossy(&self.pending));
        }
        Capture {
            text: self.text,
            polls,
            bytes_read: self.bytes_read,
            elapsed,
        }
    }
}

/// A finalized response buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Capture {
    /// Decoded text in arrival order.
    pub text: String,
    /// Number of availability checks performed.
    pub polls: usize,
    /// Raw bytes read from the channel.
    pub bytes_read: usize,
    /// Time spent collecting, settle delay included.
    #[cfg_attr(feature = "serde", serde(rename = "elapsed_ms", serialize_with = "serialize_millis"))]
    pub elapsed: Duration,
}

impl Capture {
    /// Whether the device sent nothing during collection.
    pub fn is_empty(&self) -> bool {
        self.bytes_read == 0
    }

    /// Substring presence check.
    pub fn contains(&self, marker: &str) -> bool {
        self.text
            .contains(marker)
    }
}

#[cfg(feature = "serde")]
pub(crate) fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Read whatever is buffered right now into `buffer`.
///
/// Returns the availability count reported before the read, not the number of
/// bytes the read produced: a short or timed-out read must not look idle.
fn poll_once<C: Channel + ?Sized>(channel: &mut C, buffer: &mut ResponseBuffer) -> Result<usize> {
    let available = channel.bytes_available()?;
    if available == 0 {
        return Ok(0);
    }
    let data = channel.read_available(available)?;
    trace!("Poll saw {available} bytes, read {}", data.len());
    buffer.append(&data);
    Ok(available)
}

/// Sleep `settle`, then read until one poll finds nothing available.
///
/// Bounded by `settle` plus one `poll_interval` per non-empty poll.
pub fn drain_until_idle<C, K>(
    channel: &mut C,
    clock: &K,
    settle: Duration,
    poll_interval: Duration,
) -> Result<Capture>
where
    C: Channel + ?Sized,
    K: Clock + ?Sized,
{
    let start = clock.now();
    clock.sleep(settle)?;

    let mut buffer = ResponseBuffer::new();
    let mut polls = 0;
    loop {
        polls += 1;
        if poll_once(channel, &mut buffer)? == 0 {
            break;
        }
        clock.sleep(poll_interval)?;
    }

    let elapsed = clock.now() - start;
    debug!(
        "Drained {} bytes in {polls} polls ({elapsed:?})",
        buffer.bytes_read
    );
    Ok(buffer.finish(polls, elapsed))
}

/// Poll exactly `attempts` times, sleeping `interval` after every poll.
///
/// Total time is always `attempts * interval`, whether or not data arrives.
pub fn capture_window<C, K>(
    channel: &mut C,
    clock: &K,
    attempts: u32,
    interval: Duration,
) -> Result<Capture>
where
    C: Channel + ?Sized,
    K: Clock + ?Sized,
{
    let start = clock.now();
    let mut buffer = ResponseBuffer::new();

    for attempt in 1..=attempts {
        let n = poll_once(channel, &mut buffer)?;
        if n > 0 {
            trace!("Window poll {attempt}/{attempts}: {n} bytes");
        }
        clock.sleep(interval)?;
    }

    let elapsed = clock.now() - start;
    debug!(
        "Window captured {} bytes over {attempts} polls ({elapsed:?})",
        buffer.bytes_read
    );
    Ok(buffer.finish(attempts as usize, elapsed))
}
