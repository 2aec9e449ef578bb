//! # hypnos-core
//!
//! Central-role protocol engine for the Hypnos timetable peripheral.
//!
//! This crate provides:
//! - Discovery of nearby peripherals with a deduplicated, periodically
//!   evicted result set
//! - A single-link connection state machine with stale-completion guards
//! - The ordered write/read sync of a timetable over GATT
//! - The binary codec for every characteristic
//! - Persistence of the configured timetable and device status
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`facade`] - [`ProtocolFacade`], the command surface hosts talk to
//! - [`scan`] - Discovery, result set and auto-connect policy
//! - [`connection`] - The link state machine
//! - [`sync`] - Write/read queue construction and execution
//! - [`codec`] - Characteristic value encoding and decoding
//! - [`characteristics`] - Service and characteristic identifiers
//! - [`platform`] - The [`BlePlatform`] seam to the Bluetooth stack
//! - [`timetable`] - Timetable domain types and validation
//! - [`config`] - Application configuration loading, saving, and validation
//! - [`storage`] - Key-value persistence of the timetable and status
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod characteristics;
pub mod codec;
pub mod config;
pub mod connection;
mod engine;
pub mod error;
pub mod facade;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod platform;
pub mod scan;
pub mod storage;
pub mod sync;
pub mod timetable;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerPlatform;
pub use characteristics::Characteristic;
pub use config::{
    is_valid_mac_address, is_valid_timezone_format, BluetoothConfig, Config, ConfigError,
    ConfigResult, ServerConfig, SystemConfig,
};
pub use engine::EngineOptions;
pub use error::{Error, HypnosError, Result};
pub use facade::ProtocolFacade;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use mock::{MockPeripheral, MockPlatform};
pub use platform::{BlePlatform, BluetoothError, BluetoothResult, DiscoveryReport};
pub use scan::AutoConnectPolicy;
pub use storage::{DeviceStatus, JsonFileStore, KeyValueStore, MemoryStore, StatusStore};
pub use timetable::{HourMinuteTime, TimeException, TimetableConfig, TimetableError};
pub use types::{
    ConnectionState, EngineEvent, EventSink, FailureKind, LinkStatus, PeripheralHandle,
    PeripheralId, PeripheralSnapshot,
};
