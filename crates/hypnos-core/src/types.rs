//! Shared types and OpenAPI schemas.
//!
//! Identifiers, the connection state machine's states, and the events the
//! engine reports to whoever registered a sink.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use utoipa::ToSchema;

use crate::characteristics::Characteristic;
use crate::config::is_valid_mac_address;
use crate::platform::BluetoothError;
use crate::timetable::TimeException;

/// Platform identifier of a peripheral: its Bluetooth address.
///
/// Always stored upper-case so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "F1:E2:D3:C4:B5:A6")]
pub struct PeripheralId(String);

impl PeripheralId {
    /// Parse and normalise a `XX:XX:XX:XX:XX:XX` address.
    ///
    /// # Errors
    ///
    /// Returns [`BluetoothError::InvalidAddress`] if the string is not a MAC
    /// address.
    pub fn parse(address: &str) -> Result<Self, BluetoothError> {
        let address = address.trim();
        if !is_valid_mac_address(address) {
            return Err(BluetoothError::InvalidAddress {
                address: address.to_string(),
            });
        }
        Ok(Self(address.to_uppercase()))
    }

    /// The normalised address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeripheralId {
    type Err = BluetoothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeripheralId {
    type Error = BluetoothError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeripheralId> for String {
    fn from(id: PeripheralId) -> Self {
        id.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the discovered-peripheral result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "F1:E2:D3:C4:B5:A6",
    "name": "Hypnos",
    "rssi_dbm": -58,
    "last_seen_utc": "2025-01-15T21:04:11Z"
}))]
pub struct PeripheralHandle {
    /// Platform identifier.
    pub id: PeripheralId,

    /// Advertised name, if any.
    pub name: Option<String>,

    /// Signal strength of the latest report.
    pub rssi_dbm: Option<i16>,

    /// When the latest report arrived.
    pub last_seen_utc: DateTime<Utc>,
}

/// State of the single peripheral link.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Link requested, waiting for the platform.
    Connecting,
    /// Link up, resolving the GATT table.
    DiscoveringServices,
    /// Draining the write/read queue.
    Syncing,
    /// Sync finished, link idle.
    Ready,
    /// Teardown requested, waiting for the link to close.
    Disconnecting,
}

impl ConnectionState {
    /// Returns `true` unless the state is [`ConnectionState::Disconnected`].
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Lower-case name, as serialised.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::DiscoveringServices => "discovering_services",
            Self::Syncing => "syncing",
            Self::Ready => "ready",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values read back from the peripheral during the last sync.
///
/// A field stays at its previous value when its read fails to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PeripheralSnapshot {
    /// Exceptions echoed back by the peripheral.
    pub active_exceptions: Option<Vec<TimeException>>,

    /// Battery charge in percent.
    #[schema(example = 87)]
    pub battery_percent: Option<u8>,

    /// When the last sync drained.
    pub last_sync_utc: Option<DateTime<Utc>>,
}

/// Current link as seen from outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LinkStatus {
    /// Link state.
    pub state: ConnectionState,
    /// Peripheral the link belongs to, unless disconnected.
    pub peripheral: Option<PeripheralId>,
    /// Values read back during the last sync.
    pub snapshot: PeripheralSnapshot,
}

/// Failure categories reported to the event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Discovery could not start or continue.
    Scan,
    /// Link could not be established or was lost before becoming ready.
    Connection,
    /// A buffer was malformed for its field.
    Codec,
    /// The peripheral refused a write.
    WriteRejected,
}

/// Notifications pushed to the sink registered with `Init`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A report was merged into the result set.
    PeripheralDiscovered(PeripheralHandle),
    /// The result set was emptied (scan stopped or eviction tick).
    ResultsCleared,
    /// The link changed state.
    StateChanged(ConnectionState),
    /// The write/read queue drained.
    SyncCompleted(PeripheralSnapshot),
    /// A field could not be encoded and was left out of the write queue.
    FieldSkipped {
        /// Affected characteristic.
        characteristic: Characteristic,
        /// Encoder message.
        message: String,
    },
    /// An operation failed.
    Failed {
        /// Category.
        kind: FailureKind,
        /// Human-readable detail.
        message: String,
    },
    /// The peripheral dropped the link without being asked to.
    LinkLost(PeripheralId),
}

/// Where engine events are delivered.
pub type EventSink = mpsc::UnboundedSender<EngineEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peripheral_id_normalises_case() {
        let id = PeripheralId::parse("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(id, "AA:BB:CC:DD:EE:FF".parse().unwrap());
    }

    #[test]
    fn test_peripheral_id_rejects_garbage() {
        assert!(PeripheralId::parse("not-a-mac").is_err());
        assert!(PeripheralId::parse("AA:BB:CC:DD:EE").is_err());
        assert!(serde_json::from_str::<PeripheralId>(r#""zz:zz:zz:zz:zz:zz""#).is_err());
    }

    #[test]
    fn test_connection_state_serialization() {
        let json = serde_json::to_string(&ConnectionState::DiscoveringServices).unwrap();
        assert_eq!(json, "\"discovering_services\"");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(ConnectionState::Disconnecting.is_active());
    }
}
