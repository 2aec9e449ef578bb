//! Scripted in-memory peripheral.
//!
//! Used by the engine tests and by the daemon when built with
//! `mock-bluetooth`, so the whole stack runs without radio hardware.
//! Characteristic values live in a map that writes update, which makes
//! partial syncs observable.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::characteristics::{Characteristic, READ_ORDER, WRITE_ORDER};
use crate::platform::{
    BlePlatform, BluetoothError, BluetoothResult, DiscoveryReport, LinkLossSink, ReportSink,
};
use crate::types::PeripheralId;

/// A simulated peripheral.
#[derive(Debug, Clone, Default)]
pub struct MockPeripheral {
    /// Advertised name.
    pub name: Option<String>,
    /// Reported signal strength.
    pub rssi: Option<i16>,
    /// Whether a bond exists.
    pub bonded: bool,
    /// Exposed characteristics and their current values.
    pub values: BTreeMap<Uuid, Vec<u8>>,
}

impl MockPeripheral {
    /// A peripheral exposing every known characteristic with empty values
    /// and a full battery.
    #[must_use]
    pub fn hypnos(name: &str) -> Self {
        let mut values: BTreeMap<Uuid, Vec<u8>> = WRITE_ORDER
            .into_iter()
            .chain(READ_ORDER)
            .map(|c| (c.uuid(), Vec::new()))
            .collect();
        values.insert(Characteristic::BatteryLevel.uuid(), vec![100]);
        Self {
            name: Some(name.to_string()),
            rssi: Some(-55),
            bonded: false,
            values,
        }
    }

    /// A peripheral exposing only `characteristics`.
    #[must_use]
    pub fn with_characteristics(name: &str, characteristics: &[Characteristic]) -> Self {
        Self {
            name: Some(name.to_string()),
            rssi: Some(-55),
            bonded: false,
            values: characteristics
                .iter()
                .map(|c| (c.uuid(), Vec::new()))
                .collect(),
        }
    }
}

/// A platform request the mock received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `start_scan`
    StartScan,
    /// `stop_scan`
    StopScan,
    /// `connect`
    Connect(PeripheralId),
    /// `discover_services`
    DiscoverServices(PeripheralId),
    /// `write_characteristic`
    Write(Uuid, Vec<u8>),
    /// `read_characteristic`
    Read(Uuid),
    /// `disconnect`
    Disconnect(PeripheralId),
    /// `remove_bond`
    RemoveBond(PeripheralId),
}

#[derive(Debug, Default)]
struct MockState {
    peripherals: BTreeMap<PeripheralId, MockPeripheral>,
    reports: Option<ReportSink>,
    link_loss: Option<LinkLossSink>,
    connected: Option<PeripheralId>,
    calls: Vec<MockCall>,
    fail_scan: bool,
    fail_connect: bool,
    fail_discovery: bool,
    fail_unbond: bool,
    hold_connect: bool,
    hold_discovery: bool,
    hold_writes: bool,
    failing_writes: BTreeSet<Uuid>,
    failing_reads: BTreeSet<Uuid>,
}

/// In-memory [`BlePlatform`].
#[derive(Debug, Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
    connect_gate: Notify,
    discovery_gate: Notify,
    write_gate: Notify,
}

impl MockPlatform {
    /// Platform with no peripherals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a peripheral.
    pub fn add_peripheral(&self, id: PeripheralId, peripheral: MockPeripheral) {
        self.lock().peripherals.insert(id, peripheral);
    }

    /// Current value of a characteristic on a peripheral.
    #[must_use]
    pub fn value(&self, id: &PeripheralId, characteristic: Characteristic) -> Option<Vec<u8>> {
        self.lock()
            .peripherals
            .get(id)
            .and_then(|p| p.values.get(&characteristic.uuid()).cloned())
    }

    /// Overwrite a characteristic value.
    pub fn set_value(&self, id: &PeripheralId, characteristic: Characteristic, value: Vec<u8>) {
        if let Some(peripheral) = self.lock().peripherals.get_mut(id) {
            peripheral.values.insert(characteristic.uuid(), value);
        }
    }

    /// Whether a bond exists with the peripheral.
    #[must_use]
    pub fn is_bonded(&self, id: &PeripheralId) -> bool {
        self.lock().peripherals.get(id).is_some_and(|p| p.bonded)
    }

    /// Peripheral currently linked.
    #[must_use]
    pub fn connected(&self) -> Option<PeripheralId> {
        self.lock().connected.clone()
    }

    /// Every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Payloads written so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Write(uuid, value) => Some((*uuid, value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Make `start_scan` fail.
    pub fn fail_scan(&self, fail: bool) {
        self.lock().fail_scan = fail;
    }

    /// Make `connect` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Make `discover_services` fail.
    pub fn fail_discovery(&self, fail: bool) {
        self.lock().fail_discovery = fail;
    }

    /// Make `remove_bond` fail.
    pub fn fail_unbond(&self, fail: bool) {
        self.lock().fail_unbond = fail;
    }

    /// Reject writes to a characteristic.
    pub fn fail_writes_to(&self, characteristic: Characteristic) {
        self.lock().failing_writes.insert(characteristic.uuid());
    }

    /// Fail reads of a characteristic.
    pub fn fail_reads_of(&self, characteristic: Characteristic) {
        self.lock().failing_reads.insert(characteristic.uuid());
    }

    /// Keep `connect` pending until [`MockPlatform::release_connect`].
    pub fn hold_connect(&self, hold: bool) {
        self.lock().hold_connect = hold;
    }

    /// Let one held `connect` proceed.
    pub fn release_connect(&self) {
        self.connect_gate.notify_one();
    }

    /// Keep `discover_services` pending until
    /// [`MockPlatform::release_discovery`].
    pub fn hold_discovery(&self, hold: bool) {
        self.lock().hold_discovery = hold;
    }

    /// Let one held service discovery proceed.
    pub fn release_discovery(&self) {
        self.discovery_gate.notify_one();
    }

    /// Keep each write pending until [`MockPlatform::release_write`].
    pub fn hold_writes(&self, hold: bool) {
        self.lock().hold_writes = hold;
    }

    /// Let one held write proceed.
    pub fn release_write(&self) {
        self.write_gate.notify_one();
    }

    /// Push an advertisement as if it was just received.
    ///
    /// Returns `false` when no scan is running.
    pub fn emit_report(&self, report: DiscoveryReport) -> bool {
        self.lock()
            .reports
            .as_ref()
            .is_some_and(|reports| reports.send(report).is_ok())
    }

    /// Simulate the peripheral dropping the link.
    pub fn drop_link(&self, id: &PeripheralId) {
        let mut state = self.lock();
        if state.connected.as_ref() == Some(id) {
            state.connected = None;
            if let Some(link_loss) = &state.link_loss {
                let _ = link_loss.send(id.clone());
            }
        }
    }

    fn report_for(id: &PeripheralId, peripheral: &MockPeripheral) -> DiscoveryReport {
        DiscoveryReport {
            id: id.clone(),
            name: peripheral.name.clone(),
            rssi: peripheral.rssi,
            bonded: peripheral.bonded,
        }
    }

    fn device_not_found(id: &PeripheralId) -> BluetoothError {
        BluetoothError::DeviceNotFound {
            address: id.to_string(),
        }
    }
}

impl BlePlatform for MockPlatform {
    async fn start_scan(&self, reports: ReportSink) -> BluetoothResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::StartScan);
        if state.fail_scan {
            return Err(BluetoothError::Platform {
                message: "discovery refused".to_string(),
            });
        }
        for (id, peripheral) in &state.peripherals {
            let _ = reports.send(Self::report_for(id, peripheral));
        }
        state.reports = Some(reports);
        debug!("Mock scan started");
        Ok(())
    }

    async fn stop_scan(&self) -> BluetoothResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::StopScan);
        state.reports = None;
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId, link_loss: LinkLossSink) -> BluetoothResult<()> {
        let hold = {
            let mut state = self.lock();
            state.calls.push(MockCall::Connect(id.clone()));
            state.hold_connect
        };
        if hold {
            self.connect_gate.notified().await;
        }

        let mut state = self.lock();
        if state.fail_connect {
            return Err(BluetoothError::Platform {
                message: "connection refused".to_string(),
            });
        }
        if !state.peripherals.contains_key(id) {
            return Err(Self::device_not_found(id));
        }
        state.connected = Some(id.clone());
        state.link_loss = Some(link_loss);
        Ok(())
    }

    async fn discover_services(&self, id: &PeripheralId) -> BluetoothResult<Vec<Uuid>> {
        let hold = {
            let mut state = self.lock();
            state.calls.push(MockCall::DiscoverServices(id.clone()));
            state.hold_discovery
        };
        if hold {
            self.discovery_gate.notified().await;
        }

        let state = self.lock();
        if state.fail_discovery {
            return Err(BluetoothError::Platform {
                message: "GATT discovery failed".to_string(),
            });
        }
        state
            .peripherals
            .get(id)
            .map(|p| p.values.keys().copied().collect())
            .ok_or_else(|| Self::device_not_found(id))
    }

    async fn write_characteristic(
        &self,
        id: &PeripheralId,
        uuid: Uuid,
        value: &[u8],
    ) -> BluetoothResult<()> {
        let hold = {
            let mut state = self.lock();
            state.calls.push(MockCall::Write(uuid, value.to_vec()));
            state.hold_writes
        };
        if hold {
            self.write_gate.notified().await;
        }

        let mut state = self.lock();
        if state.failing_writes.contains(&uuid) {
            return Err(BluetoothError::Platform {
                message: "write not permitted (ATT 0x03)".to_string(),
            });
        }
        let peripheral = state
            .peripherals
            .get_mut(id)
            .ok_or_else(|| Self::device_not_found(id))?;
        let slot = peripheral
            .values
            .get_mut(&uuid)
            .ok_or(BluetoothError::CharacteristicNotFound { uuid })?;
        *slot = value.to_vec();
        Ok(())
    }

    async fn read_characteristic(&self, id: &PeripheralId, uuid: Uuid) -> BluetoothResult<Vec<u8>> {
        let mut state = self.lock();
        state.calls.push(MockCall::Read(uuid));
        if state.failing_reads.contains(&uuid) {
            return Err(BluetoothError::Platform {
                message: "read not permitted (ATT 0x02)".to_string(),
            });
        }
        state
            .peripherals
            .get(id)
            .ok_or_else(|| Self::device_not_found(id))?
            .values
            .get(&uuid)
            .cloned()
            .ok_or(BluetoothError::CharacteristicNotFound { uuid })
    }

    async fn disconnect(&self, id: &PeripheralId) -> BluetoothResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::Disconnect(id.clone()));
        if state.connected.as_ref() == Some(id) {
            state.connected = None;
            state.link_loss = None;
        }
        Ok(())
    }

    async fn remove_bond(&self, id: &PeripheralId) -> BluetoothResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::RemoveBond(id.clone()));
        if state.fail_unbond {
            return Err(BluetoothError::Platform {
                message: "bond removal not supported".to_string(),
            });
        }
        let peripheral = state
            .peripherals
            .get_mut(id)
            .ok_or_else(|| Self::device_not_found(id))?;
        peripheral.bonded = false;
        Ok(())
    }
}
