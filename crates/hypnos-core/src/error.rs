//! Unified error types for the hypnos core library.
//!
//! This module provides a unified error type [`HypnosError`] that covers all
//! failure modes across the engine. Each module also has its own specific
//! error types (`CodecError`, `ConfigError`, `BluetoothError`,
//! `TimetableError`) for internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide users toward resolution
//! - **Context preservation**: Wrapped errors maintain their original context
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use hypnos_core::error::{HypnosError, Result};
//! use hypnos_core::ConnectionState;
//!
//! fn require_ready(state: ConnectionState) -> Result<()> {
//!     if state != ConnectionState::Ready {
//!         return Err(HypnosError::NotReady { state });
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::characteristics::Characteristic;
use crate::codec::CodecError;
use crate::platform::BluetoothError;
use crate::timetable::TimetableError;
use crate::types::{ConnectionState, FailureKind};

/// The unified error type for all hypnos operations.
#[derive(Debug, Error)]
pub enum HypnosError {
    // =========================================================================
    // PROTOCOL ERRORS
    // =========================================================================
    /// Discovery could not be started or continued. Scanning is stopped.
    #[error("Scan failed: {0}")]
    ScanFailure(String),

    /// The link could not be established or was lost before becoming ready.
    #[error("Connection failed: {0}. Reconnect to try again.")]
    ConnectionFailure(String),

    /// A byte buffer was malformed for its field.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The peripheral refused a characteristic write; the rest of the sync
    /// was abandoned.
    #[error("Write to {characteristic} rejected: {message}")]
    WriteRejected {
        /// Characteristic whose write failed.
        characteristic: Characteristic,
        /// Platform detail.
        message: String,
    },

    /// A link already exists or is being set up.
    #[error("A connection is already active (state: {state}). Disconnect first.")]
    AlreadyActive {
        /// State at the time of the request.
        state: ConnectionState,
    },

    /// The command requires a ready link.
    #[error("Peripheral is not ready (state: {state})")]
    NotReady {
        /// State at the time of the request.
        state: ConnectionState,
    },

    // =========================================================================
    // BLUETOOTH ADAPTER ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// The requested device is unknown to the platform.
    #[error("Device not found: '{0}'. Ensure the device is powered on and within range.")]
    DeviceNotFound(String),

    /// A string is not a valid Bluetooth address.
    #[error("Invalid Bluetooth address: '{0}'. Expected format XX:XX:XX:XX:XX:XX.")]
    InvalidAddress(String),

    // =========================================================================
    // TIMETABLE ERRORS
    // =========================================================================
    /// A timetable value violates its invariants.
    #[error("Invalid timetable: {0}")]
    InvalidTimetable(#[from] TimetableError),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    // =========================================================================
    // ENGINE ERRORS
    // =========================================================================
    /// The protocol engine task is no longer running.
    #[error("Protocol engine has stopped")]
    EngineStopped,
}

/// A specialized [`Result`] type for hypnos operations.
pub type Result<T> = std::result::Result<T, HypnosError>;

/// Short alias for [`HypnosError`].
pub type Error = HypnosError;

impl HypnosError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::ScanFailure(_)
                | Self::ConnectionFailure(_)
                | Self::WriteRejected { .. }
                | Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::DeviceNotFound(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if a fresh command from the caller may succeed.
    ///
    /// Nothing is retried automatically; this only tells the caller whether
    /// reconnecting or rescanning is worth offering.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ScanFailure(_)
                | Self::ConnectionFailure(_)
                | Self::WriteRejected { .. }
                | Self::DeviceNotFound(_)
        )
    }

    /// Category reported to the event sink, for the four protocol failures.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::ScanFailure(_) => Some(FailureKind::Scan),
            Self::ConnectionFailure(_) => Some(FailureKind::Connection),
            Self::Codec(_) => Some(FailureKind::Codec),
            Self::WriteRejected { .. } => Some(FailureKind::WriteRejected),
            _ => None,
        }
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidAddress(_) | Self::InvalidTimetable(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::DeviceNotFound(_) => 404,

            // 409 Conflict - wrong link state for the command
            Self::AlreadyActive { .. } | Self::NotReady { .. } => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) | Self::Codec(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 502 Bad Gateway - the peripheral misbehaved
            Self::ConnectionFailure(_) | Self::WriteRejected { .. } => 502,

            // 503 Service Unavailable - Bluetooth hardware or engine issues
            Self::BluetoothAdapterNotFound
            | Self::BluetoothAdapterPoweredOff
            | Self::ScanFailure(_)
            | Self::EngineStopped => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ScanFailure(_) => "SCAN_FAILURE",
            Self::ConnectionFailure(_) => "CONNECTION_FAILURE",
            Self::Codec(_) => "CODEC_ERROR",
            Self::WriteRejected { .. } => "WRITE_REJECTED",
            Self::AlreadyActive { .. } => "ALREADY_ACTIVE",
            Self::NotReady { .. } => "NOT_READY",
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::InvalidTimetable(_) => "INVALID_TIMETABLE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
            Self::EngineStopped => "ENGINE_STOPPED",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for HypnosError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<BluetoothError> for HypnosError {
    fn from(err: BluetoothError) -> Self {
        match err {
            BluetoothError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            BluetoothError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            BluetoothError::DeviceNotFound { address } => Self::DeviceNotFound(address),
            BluetoothError::InvalidAddress { address } => Self::InvalidAddress(address),
            other @ (BluetoothError::CharacteristicNotFound { .. }
            | BluetoothError::Timeout { .. }
            | BluetoothError::Platform { .. }) => Self::ConnectionFailure(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for HypnosError {
    fn from(err: serde_json::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_bluetooth_error_classification() {
        assert!(HypnosError::BluetoothAdapterNotFound.is_bluetooth_error());
        assert!(HypnosError::ScanFailure("busy".into()).is_bluetooth_error());
        assert!(HypnosError::DeviceNotFound("AA:BB:CC:DD:EE:FF".into()).is_bluetooth_error());

        assert!(!HypnosError::EngineStopped.is_bluetooth_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(HypnosError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(HypnosError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(HypnosError::ConfigValidationError("invalid value".into()).is_config_error());

        assert!(!HypnosError::BluetoothAdapterNotFound.is_config_error());
    }

    #[test]
    fn test_io_error_classification() {
        assert!(HypnosError::PersistenceError("disk full".into()).is_io_error());
        assert!(HypnosError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());

        assert!(!HypnosError::BluetoothAdapterNotFound.is_io_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(HypnosError::ConnectionFailure("timeout".into()).is_recoverable());
        assert!(HypnosError::WriteRejected {
            characteristic: Characteristic::TokensLeft,
            message: "nope".into()
        }
        .is_recoverable());
        assert!(!HypnosError::BluetoothAdapterNotFound.is_recoverable());
    }

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            HypnosError::ScanFailure(String::new()).failure_kind(),
            Some(FailureKind::Scan)
        );
        assert_eq!(
            HypnosError::Codec(CodecError::Misaligned { len: 9 }).failure_kind(),
            Some(FailureKind::Codec)
        );
        assert_eq!(HypnosError::EngineStopped.failure_kind(), None);
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            HypnosError::InvalidAddress("bad".into()).http_status_code(),
            400
        );
        assert_eq!(
            HypnosError::AlreadyActive {
                state: ConnectionState::Ready
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            HypnosError::ConfigNotFound(PathBuf::new()).http_status_code(),
            404
        );
        assert_eq!(
            HypnosError::ConfigParseError("error".into()).http_status_code(),
            422
        );
        assert_eq!(
            HypnosError::PersistenceError("error".into()).http_status_code(),
            500
        );
        assert_eq!(
            HypnosError::ConnectionFailure("lost".into()).http_status_code(),
            502
        );
        assert_eq!(
            HypnosError::BluetoothAdapterNotFound.http_status_code(),
            503
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            HypnosError::BluetoothAdapterNotFound.error_code(),
            "BLUETOOTH_ADAPTER_NOT_FOUND"
        );
        assert_eq!(
            HypnosError::NotReady {
                state: ConnectionState::Syncing
            }
            .error_code(),
            "NOT_READY"
        );
        assert_eq!(
            HypnosError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_bluetooth_error() {
        let err: HypnosError = BluetoothError::Timeout {
            operation: "connect",
            secs: 30,
        }
        .into();
        assert!(matches!(err, HypnosError::ConnectionFailure(_)));
        assert!(err.to_string().contains("timed out after 30s"));

        let err: HypnosError = BluetoothError::AdapterPoweredOff.into();
        assert!(matches!(err, HypnosError::BluetoothAdapterPoweredOff));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let hypnos_err: HypnosError = io_err.into();
        assert!(matches!(hypnos_err, HypnosError::IoError(_)));
        assert!(hypnos_err.is_io_error());
    }

    #[test]
    fn test_error_display_messages() {
        let err = HypnosError::BluetoothAdapterNotFound;
        assert!(format!("{err}").contains("No Bluetooth adapter found"));

        let err = HypnosError::AlreadyActive {
            state: ConnectionState::Connecting,
        };
        assert!(format!("{err}").contains("connecting"));

        let err = HypnosError::WriteRejected {
            characteristic: Characteristic::ActiveExceptions,
            message: "status 0x80".into(),
        };
        assert!(format!("{err}").contains("active_exceptions"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<HypnosError>();
        assert_sync::<HypnosError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn example_function() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(example_function().unwrap(), 42);

        fn failing_function() -> Result<i32> {
            Err(HypnosError::EngineStopped)
        }
        assert!(failing_function().is_err());
    }
}
