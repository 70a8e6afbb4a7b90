use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::{Add, Sub},
};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Capture time of a packet, in nanoseconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Self = Timestamp(0);

    #[inline]
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Build a timestamp from a `timeval`-style pair.
    #[inline]
    pub fn from_secs_micros(secs: u64, micros: u32) -> Self {
        Self(secs * NANOS_PER_SEC + micros as u64 * 1_000)
    }

    /// Build a timestamp from a `timespec`-style pair.
    #[inline]
    pub fn from_secs_nanos(secs: u64, nanos: u32) -> Self {
        Self(secs * NANOS_PER_SEC + nanos as u64)
    }

    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NANOS_PER_SEC as f64).round() as u64)
    }

    #[inline]
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Whole seconds since the epoch.
    #[inline]
    pub fn secs(&self) -> u64 {
        self.0 / NANOS_PER_SEC
    }

    #[inline]
    pub fn subsec_micros(&self) -> u32 {
        ((self.0 % NANOS_PER_SEC) / 1_000) as u32
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(date_time) = DateTime::from_timestamp(
            (self.0 / NANOS_PER_SEC) as i64,
            (self.0 % NANOS_PER_SEC) as u32,
        ) {
            if !f.alternate() {
                return write!(f, "{}", date_time.format("%Y-%m-%d %H:%M:%S%.6f UTC"));
            }
        }

        write!(f, "{}.{:09}", self.0 / NANOS_PER_SEC, self.0 % NANOS_PER_SEC)
    }
}

/// Signed distance between two timestamps, in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Interval(pub i64);

impl Interval {
    pub const ZERO: Self = Interval(0);

    #[inline]
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub fn from_secs(secs: u32) -> Self {
        Self(secs as i64 * NANOS_PER_SEC as i64)
    }

    #[inline]
    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// Whole seconds, rounded towards negative infinity.
    #[inline]
    pub fn whole_secs(&self) -> i64 {
        self.0.div_euclid(NANOS_PER_SEC as i64)
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_nanos = self.0.unsigned_abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}{}.{:09}",
            sign,
            total_nanos / NANOS_PER_SEC,
            total_nanos % NANOS_PER_SEC
        )
    }
}

impl Add<Interval> for Timestamp {
    type Output = Timestamp;
    #[inline]
    fn add(self, rhs: Interval) -> Self::Output {
        Timestamp(self.0.saturating_add_signed(rhs.0))
    }
}

impl Sub for Timestamp {
    type Output = Interval;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        if self.0 >= rhs.0 {
            Interval((self.0 - rhs.0) as i64)
        } else {
            Interval(-((rhs.0 - self.0) as i64))
        }
    }
}
