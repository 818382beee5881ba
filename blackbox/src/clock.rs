//! Waitable time source used by every settle delay and poll interval.
//!
//! Production code sleeps on [`SystemClock`]; tests and the simulated device
//! share a [`ManualClock`] whose sleeps advance virtual time instantly.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};

/// Longest single real sleep before the interrupt checker is consulted again.
const INTERRUPT_SLICE: Duration = Duration::from_millis(20);

/// Monotonic time source with a blocking sleep.
pub trait Clock {
    /// Time elapsed since this clock's origin.
    fn now(&self) -> Duration;

    /// Block for `duration`.
    ///
    /// Returns [`Error::Interrupted`] if an interrupt is requested before the
    /// full duration has elapsed.
    fn sleep(&self, duration: Duration) -> Result<()>;
}

impl<K: Clock + ?Sized> Clock for &K {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) -> Result<()> {
        (**self).sleep(duration)
    }
}

type InterruptChecker = Arc<dyn Fn() -> bool + Send + Sync>;

/// Wall clock backed by `std::thread::sleep`.
///
/// Sleeps are sliced so an interrupt is noticed within a few milliseconds.
/// By default the process-wide checker registered with
/// [`crate::set_interrupt_checker`] is consulted.
#[derive(Clone)]
pub struct SystemClock {
    origin: Instant,
    checker: Option<InterruptChecker>,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            checker: None,
        }
    }

    /// Use a dedicated interrupt checker instead of the process-wide one.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.checker = Some(Arc::new(checker));
        self
    }

    fn interrupted(&self) -> bool {
        match &self.checker {
            Some(checker) => checker(),
            None => crate::is_interrupted_requested(),
        }
    }
}

impl std::fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemClock")
            .field("origin", &self.origin)
            .field("custom_checker", &self.checker.is_some())
            .finish()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin
            .elapsed()
    }

    fn sleep(&self, duration: Duration) -> Result<()> {
        // `None` when the deadline is past what `Instant` can hold
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.interrupted() {
                return Err(Error::Interrupted);
            }
            let remaining = deadline.map_or(Duration::MAX, |d| {
                d.saturating_duration_since(Instant::now())
            });
            if remaining.is_zero() {
                return Ok(());
            }
            thread::sleep(remaining.min(INTERRUPT_SLICE));
        }
    }
}

/// Virtual clock for deterministic tests.
///
/// Clones share the same time, so a simulated device holding one handle sees
/// every sleep performed through another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    /// Create a virtual clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move virtual time forward without going through [`Clock::sleep`].
    pub fn advance(&self, duration: Duration) {
        self.now
            .set(self.now.get() + duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) -> Result<()> {
        trace!("Virtual sleep {duration:?}");
        self.advance(duration);
        Ok(())
    }
}
