//! Clocks and second-resolution time values
//!
//! Credential lifetimes are tracked at whole-second resolution. The
//! [`Clock`] trait abstracts the source of "now" so that expiry and
//! safety-margin logic can be driven by a [`TestClock`] in tests.

use std::{
    fmt,
    ops::{Add, Mul, Sub},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

/// Unix time
///
/// Seconds elapsed since the beginning of the Unix epoch on
/// 1970/01/01 at 00:00:00 UTC.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct UnixTime(pub u64);

impl From<SystemTime> for UnixTime {
    #[inline]
    fn from(t: SystemTime) -> Self {
        let secs = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("times before the Unix epoch are not expected")
            .as_secs();

        UnixTime(secs)
    }
}

impl fmt::Display for UnixTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A whole-second duration
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct DurationSecs(pub u64);

impl DurationSecs {
    /// The larger of the two durations
    #[inline]
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        DurationSecs(self.0.max(other.0))
    }
}

impl fmt::Display for DurationSecs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl From<Duration> for DurationSecs {
    #[inline]
    fn from(d: Duration) -> Self {
        DurationSecs(d.as_secs())
    }
}

impl From<DurationSecs> for Duration {
    #[inline]
    fn from(d: DurationSecs) -> Self {
        Duration::from_secs(d.0)
    }
}

impl Add<DurationSecs> for UnixTime {
    type Output = UnixTime;

    /// Saturates at the maximum representable time rather than wrapping
    #[inline]
    fn add(self, rhs: DurationSecs) -> Self::Output {
        UnixTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub<DurationSecs> for UnixTime {
    type Output = UnixTime;

    /// Saturates at the epoch rather than wrapping
    #[inline]
    fn sub(self, rhs: DurationSecs) -> Self::Output {
        UnixTime(self.0.saturating_sub(rhs.0))
    }
}

impl Sub<UnixTime> for UnixTime {
    type Output = DurationSecs;

    /// Saturates at zero rather than wrapping
    #[inline]
    fn sub(self, rhs: UnixTime) -> Self::Output {
        DurationSecs(self.0.saturating_sub(rhs.0))
    }
}

impl Add<DurationSecs> for DurationSecs {
    type Output = DurationSecs;

    #[inline]
    fn add(self, rhs: DurationSecs) -> Self::Output {
        DurationSecs(self.0 + rhs.0)
    }
}

impl Sub<DurationSecs> for DurationSecs {
    type Output = DurationSecs;

    /// Saturates at zero rather than wrapping
    #[inline]
    fn sub(self, rhs: DurationSecs) -> Self::Output {
        DurationSecs(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<u64> for DurationSecs {
    type Output = DurationSecs;

    #[inline]
    fn mul(self, rhs: u64) -> Self::Output {
        DurationSecs(self.0 * rhs)
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixTime;
}

impl<C: Clock> Clock for &C {
    #[inline]
    fn now(&self) -> UnixTime {
        (*self).now()
    }
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime::from(SystemTime::now())
    }
}

/// A settable clock for tests
///
/// Clones share the underlying time, so a test can hand a clone to the
/// component under test and advance time from the outside.
#[derive(Clone, Debug, Default)]
pub struct TestClock {
    now: Arc<AtomicU64>,
}

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime(self.now.load(Ordering::Acquire))
    }
}

impl TestClock {
    /// Creates a new test clock reading the specified time
    pub fn new(time: UnixTime) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(time.0)),
        }
    }

    /// Sets the clock's current time to `val`
    pub fn set(&self, val: UnixTime) {
        self.now.store(val.0, Ordering::Release);
    }

    /// Advances the clock's current time by `inc`
    pub fn advance(&self, inc: DurationSecs) {
        self.now.fetch_add(inc.0, Ordering::AcqRel);
    }
}
