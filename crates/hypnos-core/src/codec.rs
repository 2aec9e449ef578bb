//! Binary codec for the peripheral's characteristic layouts.
//!
//! Pure functions, no I/O and no state. All multi-byte values are
//! little-endian.
//!
//! # Layouts
//!
//! ```text
//! hour/minute  (2 bytes) : u16 = (utc_hour << 6) | utc_minute
//! exceptions   (8n bytes): n x [start_epoch_secs: u32][end_epoch_secs: u32]
//! scalar       (4 bytes) : u32
//! unix time    (4 bytes) : u32 epoch seconds
//! battery      (1 byte)  : percent 0-100
//! ```
//!
//! Times of day are exchanged in local wall-clock terms at the API boundary
//! and normalized to UTC on the wire. Only hour and minute travel, so the
//! conversion wraps around midnight and never carries a date.

use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;

use crate::timetable::{HourMinuteTime, TimeException};

/// Size of an encoded [`HourMinuteTime`].
pub const HOUR_MINUTE_LEN: usize = 2;

/// Size of one encoded [`TimeException`].
pub const TIME_EXCEPTION_LEN: usize = 8;

/// Size of an encoded scalar integer field.
pub const SCALAR_LEN: usize = 4;

const MINUTE_BITS: u16 = 6;
const MINUTE_MASK: u16 = 0b11_1111;
const HOUR_MASK: u16 = 0b1_1111;

/// Errors produced while encoding or decoding a characteristic value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Buffer shorter than the field requires.
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// Exception list whose length is not a multiple of 8.
    #[error("exception list length {len} is not a multiple of 8")]
    Misaligned {
        /// Supplied length.
        len: usize,
    },

    /// Decoded hour/minute outside the wall-clock range.
    #[error("decoded time {hour}:{minute} is out of range")]
    InvalidTime {
        /// Decoded hour.
        hour: u16,
        /// Decoded minute.
        minute: u16,
    },

    /// Decoded exception with `start >= end`.
    #[error("decoded exception has start {start} not before end {end}")]
    InvalidException {
        /// Start epoch seconds.
        start: u32,
        /// End epoch seconds.
        end: u32,
    },

    /// Instant not representable as unsigned 32-bit epoch seconds.
    #[error("timestamp {value} does not fit in 32-bit epoch seconds")]
    OutOfRange {
        /// Epoch seconds that failed to fit.
        value: i64,
    },

    /// Battery level above 100 percent.
    #[error("battery level {value} exceeds 100 percent")]
    InvalidBattery {
        /// Decoded value.
        value: u8,
    },
}

/// Result alias for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

fn offset_minutes(offset: FixedOffset) -> i32 {
    offset.local_minus_utc() / 60
}

fn ensure_len(bytes: &[u8], expected: usize) -> CodecResult<()> {
    if bytes.len() < expected {
        return Err(CodecError::TooShort {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/// Encode a local time of day as the 2-byte UTC wire value.
#[must_use]
pub fn encode_hour_minute(time: HourMinuteTime, local_offset: FixedOffset) -> [u8; HOUR_MINUTE_LEN] {
    let utc = HourMinuteTime::from_minutes_wrapping(
        i32::from(time.minutes_since_midnight()) - offset_minutes(local_offset),
    );
    let value = (u16::from(utc.hour()) << MINUTE_BITS) | u16::from(utc.minute());
    value.to_le_bytes()
}

/// Decode a 2-byte UTC wire value into a local time of day.
///
/// # Errors
///
/// [`CodecError::TooShort`] for fewer than 2 bytes, [`CodecError::InvalidTime`]
/// if the packed hour or minute is out of range.
pub fn decode_hour_minute(bytes: &[u8], local_offset: FixedOffset) -> CodecResult<HourMinuteTime> {
    ensure_len(bytes, HOUR_MINUTE_LEN)?;
    let value = u16::from_le_bytes([bytes[0], bytes[1]]);
    let hour = (value >> MINUTE_BITS) & HOUR_MASK;
    let minute = value & MINUTE_MASK;
    if hour > 23 || minute > 59 {
        return Err(CodecError::InvalidTime { hour, minute });
    }
    let utc_minutes = i32::from(hour) * 60 + i32::from(minute);
    Ok(HourMinuteTime::from_minutes_wrapping(
        utc_minutes + offset_minutes(local_offset),
    ))
}

fn epoch_secs(instant: DateTime<Utc>) -> CodecResult<u32> {
    let value = instant.timestamp();
    u32::try_from(value).map_err(|_| CodecError::OutOfRange { value })
}

/// Encode exceptions in list order. An empty list encodes to zero bytes.
///
/// # Errors
///
/// [`CodecError::OutOfRange`] if an instant is before 1970 or after 2106.
pub fn encode_time_exceptions(exceptions: &[TimeException]) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(exceptions.len() * TIME_EXCEPTION_LEN);
    for exception in exceptions {
        bytes.extend_from_slice(&epoch_secs(exception.start())?.to_le_bytes());
        bytes.extend_from_slice(&epoch_secs(exception.end())?.to_le_bytes());
    }
    Ok(bytes)
}

/// Decode an exception list, preserving encoded order.
///
/// # Errors
///
/// [`CodecError::Misaligned`] if the length is not a multiple of 8,
/// [`CodecError::InvalidException`] if an entry has `start >= end`.
pub fn decode_time_exceptions(bytes: &[u8]) -> CodecResult<Vec<TimeException>> {
    if bytes.len() % TIME_EXCEPTION_LEN != 0 {
        return Err(CodecError::Misaligned { len: bytes.len() });
    }

    bytes
        .chunks_exact(TIME_EXCEPTION_LEN)
        .map(|chunk| {
            let start = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let end = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            let invalid = CodecError::InvalidException { start, end };
            let start_at = DateTime::from_timestamp(i64::from(start), 0).ok_or(invalid.clone())?;
            let end_at = DateTime::from_timestamp(i64::from(end), 0).ok_or(invalid.clone())?;
            TimeException::new(start_at, end_at).map_err(|_| invalid)
        })
        .collect()
}

/// Encode a scalar integer field (durations, tokens left).
#[must_use]
pub const fn encode_u32(value: u32) -> [u8; SCALAR_LEN] {
    value.to_le_bytes()
}

/// Decode a scalar integer field. Bytes past the first four are ignored.
///
/// # Errors
///
/// [`CodecError::TooShort`] for fewer than 4 bytes.
pub fn decode_u32(bytes: &[u8]) -> CodecResult<u32> {
    ensure_len(bytes, SCALAR_LEN)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Encode an instant for the peripheral's clock characteristic.
///
/// # Errors
///
/// [`CodecError::OutOfRange`] if the instant does not fit in 32 bits.
pub fn encode_unix_time(now: DateTime<Utc>) -> CodecResult<[u8; SCALAR_LEN]> {
    Ok(epoch_secs(now)?.to_le_bytes())
}

/// Decode the standard battery level characteristic.
///
/// # Errors
///
/// [`CodecError::TooShort`] for an empty buffer, [`CodecError::InvalidBattery`]
/// above 100.
pub fn decode_battery_level(bytes: &[u8]) -> CodecResult<u8> {
    ensure_len(bytes, 1)?;
    match bytes[0] {
        value @ 0..=100 => Ok(value),
        value => Err(CodecError::InvalidBattery { value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hm(hour: u8, minute: u8) -> HourMinuteTime {
        HourMinuteTime::new(hour, minute).unwrap()
    }

    fn east(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    fn exception(start: i64, end: i64) -> TimeException {
        TimeException::new(
            Utc.timestamp_opt(start, 0).unwrap(),
            Utc.timestamp_opt(end, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_encode_hour_minute_known_bytes() {
        // 07:30 at UTC+2 is 05:30 UTC -> (5 << 6) | 30 = 350
        assert_eq!(encode_hour_minute(hm(7, 30), east(2)), [0x5E, 0x01]);
    }

    #[test]
    fn test_encode_hour_minute_rolls_back_over_midnight() {
        // 01:00 at UTC+2 is 23:00 UTC on the previous day
        let bytes = encode_hour_minute(hm(1, 0), east(2));
        assert_eq!(u16::from_le_bytes(bytes), 23 << 6);
        assert_eq!(decode_hour_minute(&bytes, east(2)).unwrap(), hm(1, 0));
    }

    #[test]
    fn test_encode_hour_minute_rolls_forward_over_midnight() {
        // 22:15 at UTC-5 is 03:15 UTC the next day
        let bytes = encode_hour_minute(hm(22, 15), east(-5));
        assert_eq!(u16::from_le_bytes(bytes), (3 << 6) | 15);
    }

    #[test]
    fn test_hour_minute_roundtrip_all_values_and_offsets() {
        let offsets = (-12..=14)
            .map(east)
            .chain([
                FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap(),
                FixedOffset::east_opt(-(9 * 3600 + 30 * 60)).unwrap(),
                FixedOffset::east_opt(12 * 3600 + 45 * 60).unwrap(),
            ])
            .collect::<Vec<_>>();

        for offset in offsets {
            for hour in 0..24 {
                for minute in 0..60 {
                    let time = hm(hour, minute);
                    let decoded = decode_hour_minute(&encode_hour_minute(time, offset), offset);
                    assert_eq!(decoded, Ok(time), "{time} at {offset}");
                }
            }
        }
    }

    #[test]
    fn test_decode_hour_minute_too_short() {
        assert_eq!(
            decode_hour_minute(&[0x5E], east(0)),
            Err(CodecError::TooShort {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_decode_hour_minute_rejects_out_of_range() {
        // hour 24, minute 0
        let bytes = (24u16 << 6).to_le_bytes();
        assert!(matches!(
            decode_hour_minute(&bytes, east(0)),
            Err(CodecError::InvalidTime { hour: 24, .. })
        ));
        // minute 63
        let bytes = 63u16.to_le_bytes();
        assert!(decode_hour_minute(&bytes, east(0)).is_err());
    }

    #[test]
    fn test_encode_exceptions_known_bytes() {
        let bytes =
            encode_time_exceptions(&[exception(1000, 2000), exception(5000, 9000)]).unwrap();
        assert_eq!(
            bytes,
            [
                0xE8, 0x03, 0x00, 0x00, 0xD0, 0x07, 0x00, 0x00, 0x88, 0x13, 0x00, 0x00, 0x28,
                0x23, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_exceptions_roundtrip_preserves_order() {
        let lists = [
            vec![],
            vec![exception(1, 2)],
            vec![exception(9000, 9500), exception(1000, 2000), exception(5000, 9000)],
            vec![exception(1_700_000_000, 1_700_003_600); 4],
        ];
        for list in lists {
            let bytes = encode_time_exceptions(&list).unwrap();
            assert_eq!(bytes.len(), list.len() * TIME_EXCEPTION_LEN);
            assert_eq!(decode_time_exceptions(&bytes).unwrap(), list);
        }
    }

    #[test]
    fn test_empty_exceptions_encode_to_nothing() {
        assert!(encode_time_exceptions(&[]).unwrap().is_empty());
        assert_eq!(decode_time_exceptions(&[]).unwrap(), vec![]);
    }

    #[test]
    fn test_decode_exceptions_misaligned() {
        assert_eq!(
            decode_time_exceptions(&[0u8; 9]),
            Err(CodecError::Misaligned { len: 9 })
        );
    }

    #[test]
    fn test_decode_exceptions_rejects_inverted_interval() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2000u32.to_le_bytes());
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        assert_eq!(
            decode_time_exceptions(&bytes),
            Err(CodecError::InvalidException {
                start: 2000,
                end: 1000
            })
        );
    }

    #[test]
    fn test_encode_exceptions_out_of_range() {
        let before_epoch = TimeException::new(
            Utc.timestamp_opt(-10, 0).unwrap(),
            Utc.timestamp_opt(10, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(
            encode_time_exceptions(&[before_epoch]),
            Err(CodecError::OutOfRange { value: -10 })
        );
    }

    #[test]
    fn test_scalar_codec() {
        assert_eq!(encode_u32(50), [50, 0, 0, 0]);
        assert_eq!(decode_u32(&[0x2C, 0x01, 0x00, 0x00]), Ok(300));
        assert_eq!(
            decode_u32(&[1, 2, 3]),
            Err(CodecError::TooShort {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_unix_time_and_battery() {
        let now = Utc.timestamp_opt(0x0102_0304, 0).unwrap();
        assert_eq!(encode_unix_time(now), Ok([0x04, 0x03, 0x02, 0x01]));
        assert_eq!(decode_battery_level(&[87]), Ok(87));
        assert_eq!(
            decode_battery_level(&[101]),
            Err(CodecError::InvalidBattery { value: 101 })
        );
        assert!(decode_battery_level(&[]).is_err());
    }
}
