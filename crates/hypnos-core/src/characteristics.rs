//! Static GATT layout of the timetable peripheral.
//!
//! Every timetable characteristic lives under one vendor-specific 128-bit
//! base UUID. A 16-bit offset is substituted into the `XXXX` group:
//!
//! ```text
//! f364XXXX-b000-4042-ba50-05ca45bf8abc
//! ```
//!
//! The battery level comes from the standard Battery Service and uses the
//! Bluetooth SIG base UUID instead.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Vendor base UUID with the 16-bit offset group zeroed.
const VENDOR_BASE: u128 = 0xf364_0000_b000_4042_ba50_05ca_45bf_8abc;

/// Bluetooth SIG base UUID with the 16-bit offset group zeroed.
const SIG_BASE: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Offset of the timetable service itself.
pub const TIMETABLE_SERVICE_OFFSET: u16 = 0x1400;

/// Substitute a 16-bit offset into a base UUID.
#[must_use]
pub const fn derive_uuid(base: u128, offset: u16) -> Uuid {
    Uuid::from_u128(base | ((offset as u128) << 96))
}

/// The timetable service UUID.
pub const TIMETABLE_SERVICE_UUID: Uuid = derive_uuid(VENDOR_BASE, TIMETABLE_SERVICE_OFFSET);

/// A characteristic the engine knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Characteristic {
    /// Peripheral real-time clock, epoch seconds.
    CurrentTime,
    /// Morning curfew, 2-byte UTC hour/minute.
    MorningCurfew,
    /// Night curfew, 2-byte UTC hour/minute.
    NightCurfew,
    /// Work phase length in minutes.
    WorkDuration,
    /// Break phase length in minutes.
    BreakDuration,
    /// Active exception list.
    ActiveExceptions,
    /// Remaining token budget.
    TokensLeft,
    /// Standard battery level, percent.
    BatteryLevel,
}

/// The six timetable characteristics, in write priority order.
pub const TIMETABLE_FIELDS: [Characteristic; 6] = [
    Characteristic::MorningCurfew,
    Characteristic::NightCurfew,
    Characteristic::WorkDuration,
    Characteristic::BreakDuration,
    Characteristic::ActiveExceptions,
    Characteristic::TokensLeft,
];

/// Every characteristic written during a sync, in the order they are written.
///
/// The clock goes first so curfews are evaluated against the right time.
pub const WRITE_ORDER: [Characteristic; 7] = [
    Characteristic::CurrentTime,
    Characteristic::MorningCurfew,
    Characteristic::NightCurfew,
    Characteristic::WorkDuration,
    Characteristic::BreakDuration,
    Characteristic::ActiveExceptions,
    Characteristic::TokensLeft,
];

/// Characteristics read back once the writes have drained.
pub const READ_ORDER: [Characteristic; 2] =
    [Characteristic::ActiveExceptions, Characteristic::BatteryLevel];

const ALL: [Characteristic; 8] = [
    Characteristic::CurrentTime,
    Characteristic::MorningCurfew,
    Characteristic::NightCurfew,
    Characteristic::WorkDuration,
    Characteristic::BreakDuration,
    Characteristic::ActiveExceptions,
    Characteristic::TokensLeft,
    Characteristic::BatteryLevel,
];

impl Characteristic {
    /// The 16-bit offset substituted into the base UUID.
    #[must_use]
    pub const fn offset(self) -> u16 {
        match self {
            Self::MorningCurfew => 0x1401,
            Self::NightCurfew => 0x1402,
            Self::WorkDuration => 0x1403,
            Self::BreakDuration => 0x1404,
            Self::ActiveExceptions => 0x1405,
            Self::TokensLeft => 0x1406,
            Self::CurrentTime => 0x1407,
            Self::BatteryLevel => 0x2a19,
        }
    }

    /// Full 128-bit UUID.
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            Self::BatteryLevel => derive_uuid(SIG_BASE, self.offset()),
            _ => derive_uuid(VENDOR_BASE, self.offset()),
        }
    }

    /// Reverse lookup. Unknown UUIDs yield `None`.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        ALL.into_iter().find(|c| c.uuid() == uuid)
    }

    /// Short name used in logs and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CurrentTime => "current_time",
            Self::MorningCurfew => "morning_curfew",
            Self::NightCurfew => "night_curfew",
            Self::WorkDuration => "work_duration",
            Self::BreakDuration => "break_duration",
            Self::ActiveExceptions => "active_exceptions",
            Self::TokensLeft => "tokens_left",
            Self::BatteryLevel => "battery_level",
        }
    }
}

impl std::fmt::Display for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuid() {
        assert_eq!(
            TIMETABLE_SERVICE_UUID.to_string(),
            "f3641400-b000-4042-ba50-05ca45bf8abc"
        );
    }

    #[test]
    fn test_characteristic_uuids() {
        assert_eq!(
            Characteristic::MorningCurfew.uuid().to_string(),
            "f3641401-b000-4042-ba50-05ca45bf8abc"
        );
        assert_eq!(
            Characteristic::TokensLeft.uuid().to_string(),
            "f3641406-b000-4042-ba50-05ca45bf8abc"
        );
        assert_eq!(
            Characteristic::BatteryLevel.uuid().to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_uuid_lookup_roundtrip() {
        for c in ALL {
            assert_eq!(Characteristic::from_uuid(c.uuid()), Some(c));
        }
        assert_eq!(Characteristic::from_uuid(Uuid::nil()), None);
        assert_eq!(Characteristic::from_uuid(TIMETABLE_SERVICE_UUID), None);
    }

    #[test]
    fn test_write_order_contains_timetable_fields() {
        assert_eq!(&WRITE_ORDER[1..], &TIMETABLE_FIELDS);
    }
}
