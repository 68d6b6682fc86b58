use crate::kernel::hal::{TICK_FREQ_HZ, clock_ticks};
use core::ops::{Add, Mul, Sub};

/// Span of time measured in kernel clock ticks.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct Duration {
    ticks: u64,
}

impl Duration {
    pub const SECOND: Duration = Duration {
        ticks: TICK_FREQ_HZ,
    };
    pub const MILLISECOND: Duration = Duration {
        ticks: TICK_FREQ_HZ / 1000,
    };
    pub const MICROSECOND: Duration = Duration {
        ticks: TICK_FREQ_HZ / 1_000_000,
    };
    pub const ZERO: Duration = Duration { ticks: 0 };
    pub const MAX: Duration = Duration { ticks: u64::MAX };

    pub const fn from_ticks(ticks: u64) -> Duration {
        Duration { ticks }
    }

    pub const fn from_secs(secs: u64) -> Duration {
        Duration {
            ticks: Duration::SECOND.ticks.saturating_mul(secs),
        }
    }

    pub const fn from_millis(millis: u64) -> Duration {
        Duration {
            ticks: Duration::MILLISECOND.ticks.saturating_mul(millis),
        }
    }

    pub const fn from_micros(micros: u64) -> Duration {
        Duration {
            ticks: Duration::MICROSECOND.ticks.saturating_mul(micros),
        }
    }

    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    pub const fn is_zero(&self) -> bool {
        self.ticks == 0
    }

    pub const fn as_secs(&self) -> u64 {
        self.ticks / Duration::SECOND.ticks
    }

    pub const fn as_millis(&self) -> u64 {
        self.ticks / Duration::MILLISECOND.ticks
    }

    pub const fn as_micros(&self) -> u64 {
        self.ticks / Duration::MICROSECOND.ticks
    }

    pub const fn saturating_add(self, rhs: Duration) -> Duration {
        Duration {
            ticks: self.ticks.saturating_add(rhs.ticks),
        }
    }

    pub const fn saturating_sub(self, rhs: Duration) -> Duration {
        Duration {
            ticks: self.ticks.saturating_sub(rhs.ticks),
        }
    }
}

impl Mul<u32> for Duration {
    type Output = Duration;
    fn mul(self, rhs: u32) -> Duration {
        Duration {
            ticks: self.ticks.saturating_mul(rhs as u64),
        }
    }
}

impl Add<Duration> for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        self.saturating_add(rhs)
    }
}

impl Sub<Duration> for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        self.saturating_sub(rhs)
    }
}

/// Point on the monotonic kernel clock.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct Instant {
    tick: u64,
}

impl Instant {
    pub fn now() -> Instant {
        Instant {
            tick: clock_ticks(),
        }
    }

    #[cfg(test)]
    pub(crate) const fn from_ticks(tick: u64) -> Instant {
        Instant { tick }
    }

    pub const fn ticks(&self) -> u64 {
        self.tick
    }

    /// Returns the amount of time elapsed since this instant.
    ///
    /// Returns a zero duration if current time is earlier than self.
    pub fn elapsed(&self) -> Duration {
        Instant::now().duration_since(*self)
    }

    /// Time from `earlier` to `self`, or zero if `earlier` is later.
    pub const fn duration_since(&self, earlier: Instant) -> Duration {
        Duration {
            ticks: self.tick.saturating_sub(earlier.tick),
        }
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant {
            tick: self.tick.saturating_add(rhs.ticks),
        }
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;
    fn sub(self, rhs: Duration) -> Instant {
        Instant {
            tick: self.tick.saturating_sub(rhs.ticks),
        }
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        self.duration_since(rhs)
    }
}

/// How long a blocking kernel call may wait.
#[derive(PartialEq, Eq, Clone, Copy, Hash, Debug, Default)]
pub enum Timeout {
    /// Fail immediately instead of blocking.
    NoWait,
    /// Block for at most the given time.
    After(Duration),
    /// Block until the awaited event happens.
    #[default]
    Forever,
}

impl Timeout {
    pub const fn from_millis(millis: u64) -> Timeout {
        Timeout::After(Duration::from_millis(millis))
    }

    /// The wait deadline, or `None` for an unbounded wait.
    ///
    /// `NoWait` has no meaningful deadline for a blocking call, and callers
    /// handle it before asking.
    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Timeout::NoWait => Some(Instant::now()),
            Timeout::After(duration) => Some(Instant::now() + duration),
            Timeout::Forever => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Timeout {
        Timeout::After(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_conversions() {
        assert_eq!(Duration::from_secs(2).as_millis(), 2000);
        assert_eq!(Duration::from_millis(1500).as_secs(), 1);
        assert_eq!(Duration::from_micros(250).as_micros(), 250);
        assert!(Duration::ZERO.is_zero());
    }

    #[test]
    fn duration_arithmetic_saturates() {
        assert_eq!(Duration::MAX + Duration::SECOND, Duration::MAX);
        assert_eq!(Duration::ZERO - Duration::SECOND, Duration::ZERO);
        assert_eq!(Duration::MILLISECOND * 3, Duration::from_millis(3));
    }

    #[test]
    fn instant_ordering_and_difference() {
        let earlier = Instant::from_ticks(100);
        let later = earlier + Duration::from_ticks(50);
        assert!(earlier < later);
        assert_eq!(later - earlier, Duration::from_ticks(50));
        assert_eq!(earlier - later, Duration::ZERO);
        let last = Instant::from_ticks(u64::MAX);
        assert_eq!(last + Duration::SECOND, last);
    }

    #[test]
    fn timeout_deadlines() {
        assert_eq!(Timeout::Forever.deadline(), None);
        let before = Instant::now();
        let deadline = Timeout::from_millis(10).deadline();
        assert!(deadline.is_some_and(|d| d >= before + Duration::from_millis(10)));
        assert_eq!(Timeout::from(Duration::SECOND), Timeout::After(Duration::SECOND));
    }
}
