//! Monotonic time as seen by the client core.
//!
//! The core never reads a platform timer directly. Every handle owns a
//! [`Clock`] and samples it once at the top of each pump call, so all
//! decisions made in one pump share the same notion of "now".

use core::time::Duration;

/// A point on a monotonic millisecond timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Instant(u64);

impl Instant {
    /// The origin of the timeline.
    pub const ZERO: Instant = Instant(0);

    /// Creates an instant from a millisecond count.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the origin of the timeline.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// `self + duration`, saturating at the end of the timeline.
    pub fn saturating_add(&self, duration: Duration) -> Instant {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Instant(self.0.saturating_add(millis))
    }
}

/// A source of monotonic time.
pub trait Clock {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// A clock that only moves when told to.
///
/// Clones share the same timeline, which lets a test keep one copy while the
/// client owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: alloc::rc::Rc<core::cell::Cell<u64>>,
}

impl ManualClock {
    /// Creates a clock starting at [`Instant::ZERO`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let next = Instant(self.millis.get()).saturating_add(by);
        self.millis.set(next.as_millis());
    }

    /// Jumps to an absolute instant. Going backwards is ignored.
    pub fn set(&self, to: Instant) {
        if to.as_millis() > self.millis.get() {
            self.millis.set(to.as_millis());
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant(self.millis.get())
    }
}

/// Wall-independent clock backed by [`std::time::Instant`].
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl SystemClock {
    /// Creates a clock whose origin is the moment of the call.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        let elapsed = self.origin.elapsed().as_millis();
        Instant(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}
