// src/model/time.rs

//! Temporal types. The wire counts microseconds from 2000-01-01 (the
//! "driver epoch"), not the Unix epoch; conversions below account for the
//! 946,684,800-second offset.

use std::time::SystemTime;

/// Seconds between 1970-01-01 and 2000-01-01.
pub const EPOCH_OFFSET_SECS: i64 = 946_684_800;

const MICROS_PER_SEC: i64 = 1_000_000;

/// A point in absolute (UTC) time with microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Datetime {
    micros: i64,
}

impl Datetime {
    /// 2000-01-01T00:00:00Z.
    pub const EPOCH: Datetime = Datetime { micros: 0 };

    pub fn from_micros(micros: i64) -> Self {
        Datetime { micros }
    }

    /// Microseconds since 2000-01-01T00:00:00Z.
    pub fn micros(&self) -> i64 {
        self.micros
    }

    pub fn from_unix_micros(micros: i64) -> Self {
        Datetime {
            micros: micros - EPOCH_OFFSET_SECS * MICROS_PER_SEC,
        }
    }

    pub fn to_unix_micros(&self) -> i64 {
        self.micros + EPOCH_OFFSET_SECS * MICROS_PER_SEC
    }
}

impl TryFrom<SystemTime> for Datetime {
    type Error = std::time::SystemTimeError;

    fn try_from(time: SystemTime) -> Result<Self, Self::Error> {
        let since_unix = time.duration_since(SystemTime::UNIX_EPOCH)?;
        Ok(Datetime::from_unix_micros(since_unix.as_micros() as i64))
    }
}

/// A wall-clock date and time without a timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDatetime {
    micros: i64,
}

impl LocalDatetime {
    pub fn from_micros(micros: i64) -> Self {
        LocalDatetime { micros }
    }

    /// Microseconds since 2000-01-01T00:00:00.
    pub fn micros(&self) -> i64 {
        self.micros
    }
}

/// A calendar date without time or timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalDate {
    days: i32,
}

impl LocalDate {
    pub fn from_days(days: i32) -> Self {
        LocalDate { days }
    }

    /// Days since 2000-01-01.
    pub fn days(&self) -> i32 {
        self.days
    }
}

/// A time of day, microseconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalTime {
    micros: i64,
}

impl LocalTime {
    pub const MIDNIGHT: LocalTime = LocalTime { micros: 0 };

    pub fn from_micros(micros: i64) -> Self {
        debug_assert!((0..86_400 * MICROS_PER_SEC).contains(&micros));
        LocalTime { micros }
    }

    pub fn micros(&self) -> i64 {
        self.micros
    }
}

/// An exact span of time in microseconds. Unlike [`RelativeDuration`] this
/// carries no calendar components; the wire encodes days and months fields
/// that must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    micros: i64,
}

impl Duration {
    pub const ZERO: Duration = Duration { micros: 0 };

    pub fn from_micros(micros: i64) -> Self {
        Duration { micros }
    }

    pub fn micros(&self) -> i64 {
        self.micros
    }
}

impl TryFrom<std::time::Duration> for Duration {
    type Error = std::num::TryFromIntError;

    fn try_from(d: std::time::Duration) -> Result<Self, Self::Error> {
        Ok(Duration {
            micros: i64::try_from(d.as_micros())?,
        })
    }
}

/// A calendar-aware span: months and days do not have a fixed length in
/// microseconds, so all three components travel separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RelativeDuration {
    pub micros: i64,
    pub days: i32,
    pub months: i32,
}

impl RelativeDuration {
    pub fn new(micros: i64, days: i32, months: i32) -> Self {
        RelativeDuration {
            micros,
            days,
            months,
        }
    }
}

/// A span measured only in whole days and months; the microsecond component
/// on the wire must be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DateDuration {
    pub days: i32,
    pub months: i32,
}

impl DateDuration {
    pub fn new(days: i32, months: i32) -> Self {
        DateDuration { days, months }
    }
}
