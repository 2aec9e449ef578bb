//! The radio adapter seam.
//!
//! The engine talks to the Bluetooth stack only through [`BlePlatform`].
//! Every method is one request with exactly one result; the engine spawns
//! each call and feeds its result back into its own mailbox, so
//! implementations are free to block inside the returned future.

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::PeripheralId;

/// Errors raised by a platform adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BluetoothError {
    /// No Bluetooth adapter found on the system.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// Adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// The platform does not know the requested device.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// MAC address that was requested.
        address: String,
    },

    /// The connected device does not expose the requested characteristic.
    #[error("Characteristic {uuid} not found")]
    CharacteristicNotFound {
        /// UUID that was requested.
        uuid: Uuid,
    },

    /// A string could not be parsed as a Bluetooth address.
    #[error("Invalid Bluetooth address: {address}")]
    InvalidAddress {
        /// Offending input.
        address: String,
    },

    /// The request did not complete within the operation timeout.
    #[error("{operation} timed out after {secs}s")]
    Timeout {
        /// Name of the request.
        operation: &'static str,
        /// Limit that was exceeded.
        secs: u64,
    },

    /// Any other failure reported by the stack.
    #[error("Bluetooth error: {message}")]
    Platform {
        /// Stack-provided description.
        message: String,
    },
}

/// Result type for platform requests.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// One advertisement seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Platform identifier.
    pub id: PeripheralId,
    /// Advertised local name.
    pub name: Option<String>,
    /// Received signal strength.
    pub rssi: Option<i16>,
    /// Whether the platform already holds a bond for this device.
    pub bonded: bool,
}

/// Channel discovery reports are pushed into.
pub type ReportSink = mpsc::UnboundedSender<DiscoveryReport>;

/// Channel an unsolicited link drop is announced on.
pub type LinkLossSink = mpsc::UnboundedSender<PeripheralId>;

/// Asynchronous central-role operations of a Bluetooth stack.
pub trait BlePlatform: Send + Sync + 'static {
    /// Begin discovery. Reports stream into `reports` until [`stop_scan`].
    ///
    /// [`stop_scan`]: BlePlatform::stop_scan
    fn start_scan(
        &self,
        reports: ReportSink,
    ) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// End discovery.
    fn stop_scan(&self) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// Establish a link. A later unsolicited drop pushes `id` into `link_loss`.
    fn connect(
        &self,
        id: &PeripheralId,
        link_loss: LinkLossSink,
    ) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// Resolve the GATT table and list every characteristic UUID it exposes.
    fn discover_services(
        &self,
        id: &PeripheralId,
    ) -> impl Future<Output = BluetoothResult<Vec<Uuid>>> + Send;

    /// Write with response. Completes once the peripheral acknowledges.
    fn write_characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        value: &[u8],
    ) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// Read a characteristic value.
    fn read_characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
    ) -> impl Future<Output = BluetoothResult<Vec<u8>>> + Send;

    /// Close the link.
    fn disconnect(&self, id: &PeripheralId) -> impl Future<Output = BluetoothResult<()>> + Send;

    /// Forget the bond with a device.
    fn remove_bond(&self, id: &PeripheralId) -> impl Future<Output = BluetoothResult<()>> + Send;
}
