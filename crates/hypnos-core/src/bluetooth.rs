//! BlueZ adapter for the protocol engine.
//!
//! [`BluerPlatform`] implements [`BlePlatform`] on top of `bluer`. Discovery
//! runs on a background task that holds the BlueZ discovery session; the
//! task is aborted on [`BlePlatform::stop_scan`]. Resolved characteristics
//! are cached per peripheral so reads and writes do not walk the GATT table.

use std::collections::HashMap;
use std::time::Duration;

use bluer::gatt::remote::Characteristic as RemoteCharacteristic;
use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, Session};
use futures::{pin_mut, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::platform::{
    BlePlatform, BluetoothError, BluetoothResult, DiscoveryReport, LinkLossSink, ReportSink,
};
use crate::types::PeripheralId;

/// How often devices still in range are re-announced during discovery.
const REANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

fn platform_error(error: bluer::Error) -> BluetoothError {
    BluetoothError::Platform {
        message: error.to_string(),
    }
}

fn address_of(id: &PeripheralId) -> BluetoothResult<Address> {
    id.as_str()
        .parse()
        .map_err(|_| BluetoothError::InvalidAddress {
            address: id.to_string(),
        })
}

#[derive(Default)]
struct Links {
    characteristics: HashMap<PeripheralId, HashMap<Uuid, RemoteCharacteristic>>,
    watchers: HashMap<PeripheralId, JoinHandle<()>>,
}

/// [`BlePlatform`] backed by the BlueZ daemon.
pub struct BluerPlatform {
    _session: Session,
    adapter: Adapter,
    discovery: Mutex<Option<JoinHandle<()>>>,
    links: Mutex<Links>,
}

impl std::fmt::Debug for BluerPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluerPlatform")
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

impl BluerPlatform {
    /// Open a BlueZ session and power on the adapter.
    ///
    /// Uses the default adapter unless `adapter_name` (e.g. `hci0`) is given.
    ///
    /// # Errors
    ///
    /// Returns [`BluetoothError::AdapterNotFound`] if no such adapter exists
    /// and [`BluetoothError::AdapterPoweredOff`] if it cannot be powered on.
    pub async fn new(adapter_name: Option<&str>) -> BluetoothResult<Self> {
        let session = Session::new().await.map_err(platform_error)?;
        let adapter = match adapter_name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|error| {
            warn!(%error, "Bluetooth adapter unavailable");
            BluetoothError::AdapterNotFound
        })?;
        info!(adapter = adapter.name(), "Using Bluetooth adapter");

        if !adapter.is_powered().await.map_err(platform_error)? {
            info!("Powering on Bluetooth adapter");
            adapter.set_powered(true).await.map_err(|error| {
                warn!(%error, "Could not power on adapter");
                BluetoothError::AdapterPoweredOff
            })?;
        }

        Ok(Self {
            _session: session,
            adapter,
            discovery: Mutex::new(None),
            links: Mutex::new(Links::default()),
        })
    }

    fn device(&self, id: &PeripheralId) -> BluetoothResult<Device> {
        self.adapter
            .device(address_of(id)?)
            .map_err(|_| BluetoothError::DeviceNotFound {
                address: id.to_string(),
            })
    }

    async fn characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
    ) -> BluetoothResult<RemoteCharacteristic> {
        self.links
            .lock()
            .await
            .characteristics
            .get(id)
            .and_then(|chars| chars.get(&uuid))
            .cloned()
            .ok_or(BluetoothError::CharacteristicNotFound { uuid })
    }

    async fn forget_link(&self, id: &PeripheralId) {
        let mut links = self.links.lock().await;
        links.characteristics.remove(id);
        if let Some(watcher) = links.watchers.remove(id) {
            watcher.abort();
        }
    }
}

async fn report_for(adapter: &Adapter, address: Address) -> Option<DiscoveryReport> {
    let device = adapter.device(address).ok()?;
    let id = PeripheralId::parse(&address.to_string()).ok()?;
    Some(DiscoveryReport {
        id,
        name: device.name().await.ok().flatten(),
        rssi: device.rssi().await.ok().flatten(),
        bonded: device.is_paired().await.unwrap_or(false),
    })
}

async fn run_discovery(adapter: Adapter, reports: ReportSink) {
    let events = match adapter.discover_devices().await {
        Ok(events) => events,
        Err(error) => {
            warn!(%error, "Discovery session ended");
            return;
        }
    };
    pin_mut!(events);
    let mut reannounce = tokio::time::interval(REANNOUNCE_INTERVAL);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(AdapterEvent::DeviceAdded(address)) => {
                    if let Some(report) = report_for(&adapter, address).await {
                        if reports.send(report).is_err() {
                            break;
                        }
                    }
                }
                Some(_) => {}
                None => break,
            },
            _ = reannounce.tick() => {
                let Ok(addresses) = adapter.device_addresses().await else {
                    continue;
                };
                for address in addresses {
                    // BlueZ only keeps an RSSI for devices heard recently.
                    if let Some(report) = report_for(&adapter, address).await {
                        if report.rssi.is_some() && reports.send(report).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
    debug!("Discovery task finished");
}

async fn watch_link(device: Device, id: PeripheralId, link_loss: LinkLossSink) {
    let Ok(events) = device.events().await else {
        return;
    };
    pin_mut!(events);
    while let Some(event) = events.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
            let _ = link_loss.send(id);
            return;
        }
    }
}

impl BlePlatform for BluerPlatform {
    async fn start_scan(&self, reports: ReportSink) -> BluetoothResult<()> {
        let mut discovery = self.discovery.lock().await;
        if let Some(task) = discovery.take() {
            task.abort();
        }
        if !self.adapter.is_powered().await.map_err(platform_error)? {
            return Err(BluetoothError::AdapterPoweredOff);
        }
        *discovery = Some(tokio::spawn(run_discovery(self.adapter.clone(), reports)));
        debug!("BlueZ discovery started");
        Ok(())
    }

    async fn stop_scan(&self) -> BluetoothResult<()> {
        if let Some(task) = self.discovery.lock().await.take() {
            task.abort();
            debug!("BlueZ discovery stopped");
        }
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId, link_loss: LinkLossSink) -> BluetoothResult<()> {
        let device = self.device(id)?;
        if !device.is_connected().await.map_err(platform_error)? {
            device.connect().await.map_err(platform_error)?;
        }
        let watcher = tokio::spawn(watch_link(device, id.clone(), link_loss));
        if let Some(previous) = self.links.lock().await.watchers.insert(id.clone(), watcher) {
            previous.abort();
        }
        Ok(())
    }

    async fn discover_services(&self, id: &PeripheralId) -> BluetoothResult<Vec<Uuid>> {
        let device = self.device(id)?;
        let mut resolved = HashMap::new();
        for service in device.services().await.map_err(platform_error)? {
            for characteristic in service.characteristics().await.map_err(platform_error)? {
                let uuid = characteristic.uuid().await.map_err(platform_error)?;
                resolved.insert(uuid, characteristic);
            }
        }

        let uuids = resolved.keys().copied().collect();
        self.links
            .lock()
            .await
            .characteristics
            .insert(id.clone(), resolved);
        Ok(uuids)
    }

    async fn write_characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        value: &[u8],
    ) -> BluetoothResult<()> {
        let characteristic = self.characteristic(id, uuid).await?;
        characteristic.write(value).await.map_err(platform_error)
    }

    async fn read_characteristic(&self, id: &PeripheralId, uuid: Uuid) -> BluetoothResult<Vec<u8>> {
        let characteristic = self.characteristic(id, uuid).await?;
        characteristic.read().await.map_err(platform_error)
    }

    async fn disconnect(&self, id: &PeripheralId) -> BluetoothResult<()> {
        self.forget_link(id).await;
        // Gone already if the bond was just removed.
        let Ok(device) = self.device(id) else {
            return Ok(());
        };
        if device.is_connected().await.map_err(platform_error)? {
            device.disconnect().await.map_err(platform_error)?;
        }
        Ok(())
    }

    async fn remove_bond(&self, id: &PeripheralId) -> BluetoothResult<()> {
        self.forget_link(id).await;
        self.adapter
            .remove_device(address_of(id)?)
            .await
            .map_err(platform_error)
    }
}
