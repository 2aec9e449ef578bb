//! Command surface of the protocol engine.
//!
//! [`ProtocolFacade`] is a cheap, cloneable handle. Each method posts one
//! command into the engine mailbox and waits for its reply; state and the
//! read-back snapshot are observable without a round trip through watch
//! channels. The engine task stops once the last handle is dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::engine::{Command, Engine, EngineOptions, Event, OpContext, Reply};
use crate::error::{HypnosError, Result};
use crate::platform::BlePlatform;
use crate::storage::StatusStore;
use crate::timetable::TimetableConfig;
use crate::types::{
    ConnectionState, EventSink, LinkStatus, PeripheralHandle, PeripheralId, PeripheralSnapshot,
};

/// Handle to a running protocol engine.
#[derive(Debug, Clone)]
pub struct ProtocolFacade {
    commands: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<ConnectionState>,
    snapshot: watch::Receiver<PeripheralSnapshot>,
}

impl ProtocolFacade {
    /// Start an engine on the current Tokio runtime.
    #[must_use]
    pub fn spawn<P: BlePlatform>(platform: P, store: StatusStore, options: EngineOptions) -> Self {
        Self::spawn_shared(Arc::new(platform), store, options)
    }

    /// Start an engine over a platform the caller keeps a handle to.
    #[must_use]
    pub fn spawn_shared<P: BlePlatform>(
        platform: Arc<P>,
        store: StatusStore,
        options: EngineOptions,
    ) -> Self {
        let (commands, mailbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let (snapshot_tx, snapshot) = watch::channel(PeripheralSnapshot::default());

        let ctx = OpContext::new(platform, commands.downgrade(), options.operation_timeout);
        let engine = Engine::new(ctx, store, options, state_tx, snapshot_tx);
        tokio::spawn(engine.run(mailbox));

        Self {
            commands,
            state,
            snapshot,
        }
    }

    /// Register where discovery and link events are reported.
    ///
    /// # Errors
    ///
    /// Returns [`HypnosError::EngineStopped`] if the engine is gone.
    pub async fn init(&self, sink: EventSink) -> Result<()> {
        self.request(|reply| Command::Init { sink, reply }).await
    }

    /// Unregister the sink and stop scanning.
    ///
    /// # Errors
    ///
    /// Returns [`HypnosError::EngineStopped`] if the engine is gone.
    pub async fn deinit(&self) -> Result<()> {
        self.request(|reply| Command::Deinit { reply }).await
    }

    /// Begin discovery. Returns once the platform confirms.
    ///
    /// # Errors
    ///
    /// Returns [`HypnosError::ScanFailure`] if discovery could not start.
    pub async fn start_scan(&self) -> Result<()> {
        self.request(|reply| Command::StartScan { reply }).await
    }

    /// Stop discovery and clear the result set.
    ///
    /// # Errors
    ///
    /// Returns [`HypnosError::EngineStopped`] if the engine is gone.
    pub async fn stop_scan(&self) -> Result<()> {
        self.request(|reply| Command::StopScan { reply }).await
    }

    /// Connect, resolve services and sync. Returns once the link is ready.
    ///
    /// # Errors
    ///
    /// [`HypnosError::AlreadyActive`] unless disconnected; otherwise the
    /// failure that ended the attempt.
    pub async fn connect(&self, id: PeripheralId) -> Result<()> {
        self.request(|reply| Command::Connect { id, reply }).await
    }

    /// Tear the link down, optionally removing the bond first.
    ///
    /// # Errors
    ///
    /// Returns [`HypnosError::EngineStopped`] if the engine is gone.
    pub async fn disconnect(&self, unbond: bool) -> Result<()> {
        self.request(|reply| Command::Disconnect { unbond, reply })
            .await
    }

    /// Validate and store a timetable. It is pushed on the next sync.
    ///
    /// # Errors
    ///
    /// Returns [`HypnosError::InvalidTimetable`] or a persistence error.
    pub async fn configure_timetable(&self, config: TimetableConfig) -> Result<()> {
        self.request(|reply| Command::ConfigureTimetable { config, reply })
            .await
    }

    /// Push the stored timetable to a ready peripheral again.
    ///
    /// # Errors
    ///
    /// [`HypnosError::NotReady`] unless ready; otherwise the sync failure.
    pub async fn sync_timetable(&self) -> Result<()> {
        self.request(|reply| Command::SyncTimetable { reply }).await
    }

    /// Current deduplicated discovery results.
    ///
    /// # Errors
    ///
    /// Returns [`HypnosError::EngineStopped`] if the engine is gone.
    pub async fn devices(&self) -> Result<Vec<PeripheralHandle>> {
        self.request(|reply| Command::Devices { reply }).await
    }

    /// State, peripheral and snapshot of the current link.
    ///
    /// # Errors
    ///
    /// Returns [`HypnosError::EngineStopped`] if the engine is gone.
    pub async fn link_status(&self) -> Result<LinkStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Latest link state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Latest read-back snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PeripheralSnapshot {
        self.snapshot.borrow().clone()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Event::Command(command(reply)))
            .map_err(|_| HypnosError::EngineStopped)?;
        response.await.map_err(|_| HypnosError::EngineStopped)?
    }
}
