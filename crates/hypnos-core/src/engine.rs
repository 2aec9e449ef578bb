//! The serialized protocol engine.
//!
//! Commands from the facade and completions of platform requests arrive on
//! one mailbox and are handled one at a time by [`Engine::run`]. Platform
//! requests are never awaited inline: [`OpContext::spawn_op`] runs each one
//! on its own task, bounded by the operation timeout, and posts exactly one
//! completion event back.
//!
//! Completions carry the epoch (link) or generation (scan) they were issued
//! under, so results that arrive after a disconnect or a scan restart are
//! recognised as stale and dropped.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::characteristics::Characteristic;
use crate::config::offset_at;
use crate::connection::ConnectionManager;
use crate::error::{HypnosError, Result};
use crate::platform::{BlePlatform, BluetoothError, BluetoothResult, DiscoveryReport, LinkLossSink};
use crate::scan::{AutoConnectPolicy, ScanCoordinator};
use crate::storage::StatusStore;
use crate::sync::{build_queue, ReadValue, SyncOrchestrator};
use crate::timetable::TimetableConfig;
use crate::types::{
    ConnectionState, EngineEvent, EventSink, LinkStatus, PeripheralHandle, PeripheralId,
    PeripheralSnapshot,
};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Answer a command. The caller may have stopped waiting, which is fine.
pub(crate) fn respond<T>(reply: Reply<T>, result: Result<T>) {
    let _ = reply.send(result);
}

/// Requests from the facade.
pub(crate) enum Command {
    Init { sink: EventSink, reply: Reply<()> },
    Deinit { reply: Reply<()> },
    StartScan { reply: Reply<()> },
    StopScan { reply: Reply<()> },
    Connect { id: PeripheralId, reply: Reply<()> },
    Disconnect { unbond: bool, reply: Reply<()> },
    ConfigureTimetable { config: TimetableConfig, reply: Reply<()> },
    SyncTimetable { reply: Reply<()> },
    Devices { reply: Reply<Vec<PeripheralHandle>> },
    Status { reply: Reply<LinkStatus> },
}

/// Everything the engine reacts to.
pub(crate) enum Event {
    Command(Command),
    ScanStarted { generation: u64, result: BluetoothResult<()> },
    ScanStopped { result: BluetoothResult<()> },
    Discovered { generation: u64, report: DiscoveryReport },
    EvictTick { generation: u64 },
    Connected { epoch: u64, id: PeripheralId, result: BluetoothResult<()> },
    ServicesResolved { epoch: u64, result: BluetoothResult<Vec<Uuid>> },
    Written { epoch: u64, characteristic: Characteristic, result: BluetoothResult<()> },
    Read { epoch: u64, characteristic: Characteristic, result: BluetoothResult<Vec<u8>> },
    LinkClosed { epoch: u64, result: BluetoothResult<()> },
    TeardownDone { result: BluetoothResult<()> },
    LinkLost { id: PeripheralId },
}

pub(crate) type Mailbox = mpsc::UnboundedSender<Event>;
pub(crate) type WeakMailbox = mpsc::WeakUnboundedSender<Event>;

/// What components need to issue platform requests and report events.
pub(crate) struct OpContext<P> {
    platform: Arc<P>,
    mailbox: WeakMailbox,
    timeout: Duration,
    sink: Option<EventSink>,
}

impl<P: BlePlatform> OpContext<P> {
    pub(crate) fn new(platform: Arc<P>, mailbox: WeakMailbox, timeout: Duration) -> Self {
        Self {
            platform,
            mailbox,
            timeout,
            sink: None,
        }
    }

    pub(crate) fn mailbox(&self) -> WeakMailbox {
        self.mailbox.clone()
    }

    pub(crate) fn set_sink(&mut self, sink: Option<EventSink>) {
        self.sink = sink;
    }

    /// Push an event to the registered sink, if any.
    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }

    /// Run one platform request on its own task and post its completion.
    ///
    /// A request still pending after the operation timeout completes with
    /// [`BluetoothError::Timeout`].
    pub(crate) fn spawn_op<T, F, R, C>(&self, operation: &'static str, request: R, complete: C)
    where
        T: Send + 'static,
        F: Future<Output = BluetoothResult<T>> + Send + 'static,
        R: FnOnce(Arc<P>) -> F,
        C: FnOnce(BluetoothResult<T>) -> Event + Send + 'static,
    {
        let future = request(Arc::clone(&self.platform));
        let mailbox = self.mailbox.clone();
        let limit = self.timeout;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(limit, future).await {
                Ok(result) => result,
                Err(_) => Err(BluetoothError::Timeout {
                    operation,
                    secs: limit.as_secs(),
                }),
            };
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(complete(result));
            }
        });
    }
}

/// Tunables taken from configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on any single platform request.
    pub operation_timeout: Duration,
    /// Interval at which the result set is cleared while scanning.
    pub scan_eviction_interval: Duration,
    /// Zone the user enters curfews in.
    pub timezone: Tz,
    /// Which discovered peripherals are connected automatically.
    pub auto_connect: AutoConnectPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&crate::config::Config::default())
    }
}

impl EngineOptions {
    /// Derive options from the loaded configuration.
    ///
    /// Invalid known-device entries are skipped with a warning.
    #[must_use]
    pub fn from_config(config: &crate::config::Config) -> Self {
        let known = config
            .bluetooth
            .known_devices
            .iter()
            .filter_map(|address| match PeripheralId::parse(address) {
                Ok(id) => Some(id),
                Err(error) => {
                    warn!(%address, %error, "Ignoring invalid known device");
                    None
                }
            })
            .collect();

        Self {
            operation_timeout: config.bluetooth.operation_timeout(),
            scan_eviction_interval: config.bluetooth.scan_eviction_interval(),
            timezone: config.timezone(),
            auto_connect: AutoConnectPolicy::new(known, &config.bluetooth.bonded_name_filter),
        }
    }
}

/// The actor owning every piece of protocol state.
pub(crate) struct Engine<P> {
    ctx: OpContext<P>,
    scan: ScanCoordinator,
    connection: ConnectionManager,
    sync: SyncOrchestrator,
    store: StatusStore,
    auto_connect: AutoConnectPolicy,
    timezone: Tz,
    link_loss: LinkLossSink,
    snapshot: watch::Sender<PeripheralSnapshot>,
}

impl<P: BlePlatform> Engine<P> {
    pub(crate) fn new(
        ctx: OpContext<P>,
        store: StatusStore,
        options: EngineOptions,
        state: watch::Sender<ConnectionState>,
        snapshot: watch::Sender<PeripheralSnapshot>,
    ) -> Self {
        let link_loss = spawn_link_loss_forwarder(ctx.mailbox());
        Self {
            ctx,
            scan: ScanCoordinator::new(options.scan_eviction_interval),
            connection: ConnectionManager::new(state),
            sync: SyncOrchestrator::default(),
            store,
            auto_connect: options.auto_connect,
            timezone: options.timezone,
            link_loss,
            snapshot,
        }
    }

    /// Handle events until every facade handle is dropped.
    pub(crate) async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Event>) {
        debug!("Protocol engine started");
        while let Some(event) = mailbox.recv().await {
            self.handle(event);
        }
        self.scan.stop(&self.ctx);
        debug!("Protocol engine stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.on_command(command),
            Event::ScanStarted { generation, result } => {
                self.scan.on_started(generation, result, &self.ctx);
            }
            Event::ScanStopped { result } => {
                if let Err(error) = result {
                    warn!(%error, "Platform failed to stop scanning");
                }
            }
            Event::Discovered { generation, report } => self.on_discovered(generation, report),
            Event::EvictTick { generation } => self.scan.on_evict_tick(generation, &self.ctx),
            Event::Connected { epoch, id, result } => {
                if let Err(error) = self.connection.on_connected(epoch, id, result, &self.ctx) {
                    self.fail_link(error);
                }
            }
            Event::ServicesResolved { epoch, result } => {
                match self.connection.on_services_resolved(epoch, result, &self.ctx) {
                    Ok(Some(uuids)) => self.begin_sync(&uuids),
                    Ok(None) => {}
                    Err(error) => self.fail_link(error),
                }
            }
            Event::Written {
                epoch,
                characteristic,
                result,
            } => {
                if !self.connection.is_current(epoch) {
                    debug!(epoch, %characteristic, "Dropping stale write completion");
                    return;
                }
                match self.sync.on_written(characteristic, result) {
                    Ok(()) => self.advance_sync(),
                    Err(error) => self.fail_link(error),
                }
            }
            Event::Read {
                epoch,
                characteristic,
                result,
            } => {
                if !self.connection.is_current(epoch) {
                    debug!(epoch, %characteristic, "Dropping stale read completion");
                    return;
                }
                match self.sync.on_read(characteristic, result, &self.ctx) {
                    Ok(value) => {
                        if let Some(value) = value {
                            self.merge_read(value);
                        }
                        self.advance_sync();
                    }
                    Err(error) => self.fail_link(error),
                }
            }
            Event::LinkClosed { epoch, result } => {
                self.connection.on_link_closed(epoch, result, &self.ctx);
            }
            Event::TeardownDone { result } => {
                if let Err(error) = result {
                    warn!(%error, "Best-effort disconnect after failure did not complete");
                }
            }
            Event::LinkLost { id } => {
                if self.connection.on_link_lost(&id, &self.ctx) {
                    self.sync.clear();
                }
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Init { sink, reply } => {
                info!("Result sink registered");
                self.ctx.set_sink(Some(sink));
                respond(reply, Ok(()));
            }
            Command::Deinit { reply } => {
                self.scan.stop(&self.ctx);
                self.ctx.set_sink(None);
                info!("Result sink unregistered");
                respond(reply, Ok(()));
            }
            Command::StartScan { reply } => self.scan.start(reply, &self.ctx),
            Command::StopScan { reply } => {
                self.scan.stop(&self.ctx);
                respond(reply, Ok(()));
            }
            Command::Connect { id, reply } => self.begin_connect(id, Some(reply)),
            Command::Disconnect { unbond, reply } => {
                self.sync.clear();
                self.connection.disconnect(unbond, reply, &self.ctx);
            }
            Command::ConfigureTimetable { config, reply } => {
                respond(reply, self.configure_timetable(&config));
            }
            Command::SyncTimetable { reply } => match self.connection.begin_resync(&self.ctx) {
                Ok(()) => {
                    self.connection.await_ready(reply);
                    self.start_sync();
                }
                Err(error) => respond(reply, Err(error)),
            },
            Command::Devices { reply } => respond(reply, Ok(self.scan.results())),
            Command::Status { reply } => respond(
                reply,
                Ok(LinkStatus {
                    state: self.connection.state(),
                    peripheral: self.connection.peripheral().cloned(),
                    snapshot: self.snapshot.borrow().clone(),
                }),
            ),
        }
    }

    fn configure_timetable(&self, config: &TimetableConfig) -> Result<()> {
        config.validate()?;
        self.store.set_timetable_config(config)?;
        info!(
            exceptions = config.active_exceptions.len(),
            "Timetable stored; it is pushed on the next sync"
        );
        Ok(())
    }

    fn on_discovered(&mut self, generation: u64, report: DiscoveryReport) {
        if !self.scan.on_discovered(generation, &report, &self.ctx) {
            return;
        }
        if self.connection.state().is_active() {
            return;
        }

        let last_device = self.store.last_device().unwrap_or_else(|error| {
            warn!(%error, "Could not read last device");
            None
        });
        if self.auto_connect.is_known(&report, last_device.as_ref()) {
            info!(peripheral = %report.id, "Known peripheral discovered, connecting");
            self.begin_connect(report.id, None);
        }
    }

    fn begin_connect(&mut self, id: PeripheralId, reply: Option<Reply<()>>) {
        match self
            .connection
            .connect(id, self.link_loss.clone(), &self.ctx)
        {
            Ok(()) => {
                self.scan.stop(&self.ctx);
                if let Some(reply) = reply {
                    self.connection.await_ready(reply);
                }
            }
            Err(error) => {
                debug!(%error, "Connect rejected");
                if let Some(reply) = reply {
                    respond(reply, Err(error));
                }
            }
        }
    }

    fn begin_sync(&mut self, uuids: &[Uuid]) {
        let available: BTreeSet<Characteristic> = uuids
            .iter()
            .copied()
            .filter_map(Characteristic::from_uuid)
            .collect();
        debug!(
            exposed = uuids.len(),
            recognised = available.len(),
            "Services resolved"
        );
        self.connection.set_available(available);
        self.start_sync();
    }

    fn start_sync(&mut self) {
        let config = self.store.timetable_config().unwrap_or_else(|error| {
            warn!(%error, "Stored timetable unreadable; syncing status reads only");
            None
        });
        if config.is_none() {
            info!("No timetable configured; syncing status reads only");
        }

        let now = Utc::now();
        let plan = build_queue(
            config.as_ref(),
            self.connection.available(),
            offset_at(self.timezone, now),
            now,
        );
        for (characteristic, error) in plan.skipped {
            warn!(%characteristic, %error, "Field could not be encoded; left out of sync");
            self.ctx.emit(EngineEvent::FieldSkipped {
                characteristic,
                message: error.to_string(),
            });
        }

        self.sync.load(plan.steps);
        self.advance_sync();
    }

    fn advance_sync(&mut self) {
        let Some(id) = self.connection.peripheral().cloned() else {
            return;
        };
        if !self.sync.advance(&id, self.connection.epoch(), &self.ctx) {
            self.complete_sync(&id);
        }
    }

    fn merge_read(&mut self, value: ReadValue) {
        match value {
            ReadValue::Exceptions(exceptions) => {
                self.snapshot
                    .send_modify(|snapshot| snapshot.active_exceptions = Some(exceptions));
            }
            ReadValue::Battery(percent) => {
                self.snapshot
                    .send_modify(|snapshot| snapshot.battery_percent = Some(percent));
                if let Err(error) = self.store.set_battery(percent) {
                    warn!(%error, "Could not store battery level");
                }
            }
        }
    }

    fn complete_sync(&mut self, id: &PeripheralId) {
        let now = Utc::now();
        self.snapshot
            .send_modify(|snapshot| snapshot.last_sync_utc = Some(now));

        let local = now.with_timezone(&self.timezone).format("%H:%M").to_string();
        if let Err(error) = self.store.set_sync_time(&local) {
            warn!(%error, "Could not store sync time");
        }
        if let Err(error) = self.store.set_last_device(id) {
            warn!(%error, "Could not store last device");
        }

        self.connection.mark_ready(&self.ctx);
        info!(peripheral = %id, sync_time = %local, "Sync complete");
        self.ctx
            .emit(EngineEvent::SyncCompleted(self.snapshot.borrow().clone()));
    }

    fn fail_link(&mut self, error: HypnosError) {
        self.sync.clear();
        self.connection.fail(error, &self.ctx);
    }
}

/// Turn platform link-loss notifications into mailbox events.
fn spawn_link_loss_forwarder(mailbox: WeakMailbox) -> LinkLossSink {
    let (tx, mut rx) = mpsc::unbounded_channel::<PeripheralId>();
    tokio::spawn(async move {
        while let Some(id) = rx.recv().await {
            let Some(mailbox) = mailbox.upgrade() else {
                break;
            };
            let _ = mailbox.send(Event::LinkLost { id });
        }
    });
    tx
}
