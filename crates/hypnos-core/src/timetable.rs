//! Timetable domain values.
//!
//! These are the values a user configures and the peripheral enforces:
//! curfew times, work/break durations, scheduled exceptions and the token
//! budget. Construction validates every invariant, and deserialization goes
//! through the same constructors so a stored blob can never produce an
//! out-of-range value.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Maximum number of active exceptions the peripheral can hold.
pub const MAX_ACTIVE_EXCEPTIONS: usize = 4;

/// Errors raised when a timetable value violates its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimetableError {
    /// Hour or minute outside the wall-clock range.
    #[error("invalid time {hour:02}:{minute:02}: hour must be 0-23 and minute 0-59")]
    InvalidTime {
        /// Offending hour.
        hour: u8,
        /// Offending minute.
        minute: u8,
    },

    /// Exception whose start is not strictly before its end.
    #[error("invalid exception: start {start} is not before end {end}")]
    InvalidException {
        /// Exception start.
        start: DateTime<Utc>,
        /// Exception end.
        end: DateTime<Utc>,
    },

    /// More exceptions than the peripheral can store.
    #[error("too many active exceptions: {actual} (maximum {max})")]
    TooManyExceptions {
        /// Peripheral capacity.
        max: usize,
        /// Number supplied.
        actual: usize,
    },
}

/// A wall-clock time of day with minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "RawHourMinute")]
#[schema(example = json!({"hour": 7, "minute": 30}))]
pub struct HourMinuteTime {
    /// Hour of day, 0-23.
    #[schema(minimum = 0, maximum = 23)]
    hour: u8,
    /// Minute of hour, 0-59.
    #[schema(minimum = 0, maximum = 59)]
    minute: u8,
}

#[derive(Deserialize)]
struct RawHourMinute {
    hour: u8,
    minute: u8,
}

impl TryFrom<RawHourMinute> for HourMinuteTime {
    type Error = TimetableError;

    fn try_from(raw: RawHourMinute) -> Result<Self, Self::Error> {
        Self::new(raw.hour, raw.minute)
    }
}

impl HourMinuteTime {
    /// Create a time of day.
    ///
    /// # Errors
    ///
    /// Returns [`TimetableError::InvalidTime`] if `hour > 23` or `minute > 59`.
    pub const fn new(hour: u8, minute: u8) -> Result<Self, TimetableError> {
        if hour > 23 || minute > 59 {
            return Err(TimetableError::InvalidTime { hour, minute });
        }
        Ok(Self { hour, minute })
    }

    /// Hour of day.
    #[must_use]
    pub const fn hour(self) -> u8 {
        self.hour
    }

    /// Minute of hour.
    #[must_use]
    pub const fn minute(self) -> u8 {
        self.minute
    }

    /// Minutes elapsed since midnight.
    #[must_use]
    pub const fn minutes_since_midnight(self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }

    /// Build a time of day from minutes since midnight, wrapping over 24h.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub const fn from_minutes_wrapping(minutes: i32) -> Self {
        let wrapped = minutes.rem_euclid(24 * 60);
        Self {
            hour: (wrapped / 60) as u8,
            minute: (wrapped % 60) as u8,
        }
    }
}

impl std::fmt::Display for HourMinuteTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A scheduled interval during which curfew and duration rules are suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "RawTimeException")]
#[schema(example = json!({
    "start": "2025-01-15T20:00:00Z",
    "end": "2025-01-15T23:30:00Z"
}))]
pub struct TimeException {
    /// Start of the exception (inclusive), whole seconds.
    start: DateTime<Utc>,
    /// End of the exception, whole seconds.
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeException {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeException> for TimeException {
    type Error = TimetableError;

    fn try_from(raw: RawTimeException) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl TimeException {
    /// Create an exception, truncating both instants to whole seconds.
    ///
    /// # Errors
    ///
    /// Returns [`TimetableError::InvalidException`] unless `start < end`
    /// after truncation.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimetableError> {
        let start = start.trunc_subsecs(0);
        let end = end.trunc_subsecs(0);
        if start >= end {
            return Err(TimetableError::InvalidException { start, end });
        }
        Ok(Self { start, end })
    }

    /// Start instant.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// End instant.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// The full set of scheduling parameters pushed to the peripheral.
///
/// Only ever replaced as a whole; there is no partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "morning_curfew": {"hour": 7, "minute": 0},
    "night_curfew": {"hour": 22, "minute": 30},
    "work_duration_minutes": 50,
    "break_duration_minutes": 10,
    "active_exceptions": [],
    "tokens_left": 3
}))]
pub struct TimetableConfig {
    /// End of the night restriction.
    pub morning_curfew: HourMinuteTime,

    /// Start of the night restriction.
    pub night_curfew: HourMinuteTime,

    /// Length of a work phase in minutes.
    pub work_duration_minutes: u32,

    /// Length of a break phase in minutes.
    pub break_duration_minutes: u32,

    /// Scheduled exceptions, in the order they are sent.
    #[serde(default)]
    pub active_exceptions: Vec<TimeException>,

    /// Remaining token budget.
    pub tokens_left: u32,
}

impl TimetableConfig {
    /// Check constraints that span more than one field.
    ///
    /// # Errors
    ///
    /// Returns [`TimetableError::TooManyExceptions`] if the exception list
    /// exceeds [`MAX_ACTIVE_EXCEPTIONS`].
    pub fn validate(&self) -> Result<(), TimetableError> {
        if self.active_exceptions.len() > MAX_ACTIVE_EXCEPTIONS {
            return Err(TimetableError::TooManyExceptions {
                max: MAX_ACTIVE_EXCEPTIONS,
                actual: self.active_exceptions.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hour_minute_bounds() {
        assert!(HourMinuteTime::new(23, 59).is_ok());
        assert!(HourMinuteTime::new(0, 0).is_ok());
        assert_eq!(
            HourMinuteTime::new(24, 0),
            Err(TimetableError::InvalidTime { hour: 24, minute: 0 })
        );
        assert!(HourMinuteTime::new(12, 60).is_err());
    }

    #[test]
    fn test_from_minutes_wrapping() {
        assert_eq!(
            HourMinuteTime::from_minutes_wrapping(-60),
            HourMinuteTime::new(23, 0).unwrap()
        );
        assert_eq!(
            HourMinuteTime::from_minutes_wrapping(24 * 60 + 5),
            HourMinuteTime::new(0, 5).unwrap()
        );
    }

    #[test]
    fn test_hour_minute_display() {
        assert_eq!(HourMinuteTime::new(7, 5).unwrap().to_string(), "07:05");
    }

    #[test]
    fn test_hour_minute_deserialize_rejects_out_of_range() {
        let ok: HourMinuteTime = serde_json::from_str(r#"{"hour": 7, "minute": 30}"#).unwrap();
        assert_eq!(ok.hour(), 7);
        assert!(serde_json::from_str::<HourMinuteTime>(r#"{"hour": 25, "minute": 0}"#).is_err());
    }

    #[test]
    fn test_exception_truncates_to_seconds() {
        let start = Utc.timestamp_opt(1000, 900_000_000).unwrap();
        let end = Utc.timestamp_opt(2000, 1).unwrap();
        let exception = TimeException::new(start, end).unwrap();
        assert_eq!(exception.start().timestamp_subsec_nanos(), 0);
        assert_eq!(exception.start().timestamp(), 1000);
        assert_eq!(exception.end().timestamp(), 2000);
    }

    #[test]
    fn test_exception_requires_start_before_end() {
        let t = Utc.timestamp_opt(5000, 0).unwrap();
        assert!(TimeException::new(t, t).is_err());

        // Equal after truncation
        let a = Utc.timestamp_opt(5000, 100).unwrap();
        let b = Utc.timestamp_opt(5000, 900).unwrap();
        assert!(TimeException::new(a, b).is_err());
    }

    #[test]
    fn test_exception_deserialize_validates() {
        let json = r#"{"start": "2025-01-15T23:00:00Z", "end": "2025-01-15T20:00:00Z"}"#;
        assert!(serde_json::from_str::<TimeException>(json).is_err());
    }

    #[test]
    fn test_config_exception_capacity() {
        let exception =
            TimeException::new(Utc.timestamp_opt(1, 0).unwrap(), Utc.timestamp_opt(2, 0).unwrap())
                .unwrap();
        let mut config = TimetableConfig {
            morning_curfew: HourMinuteTime::new(7, 0).unwrap(),
            night_curfew: HourMinuteTime::new(22, 0).unwrap(),
            work_duration_minutes: 50,
            break_duration_minutes: 10,
            active_exceptions: vec![exception; MAX_ACTIVE_EXCEPTIONS],
            tokens_left: 3,
        };
        assert!(config.validate().is_ok());

        config.active_exceptions.push(exception);
        assert_eq!(
            config.validate(),
            Err(TimetableError::TooManyExceptions { max: 4, actual: 5 })
        );
    }
}
