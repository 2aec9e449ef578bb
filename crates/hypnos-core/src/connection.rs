//! The single peripheral link.
//!
//! ```text
//! Disconnected --connect--> Connecting --link up--> DiscoveringServices
//! DiscoveringServices --resolved--> Syncing --drained--> Ready
//! Connecting / DiscoveringServices / Syncing --failure--> Disconnected
//! any --disconnect--> Disconnecting --closed--> Disconnected
//! ```
//!
//! Every accepted connect and every teardown bumps the epoch; completions
//! tagged with an older epoch belong to an abandoned link and are ignored.
//! Nothing here retries: a dropped link stays down until the next connect.

use std::collections::BTreeSet;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::characteristics::Characteristic;
use crate::engine::{respond, Event, OpContext, Reply};
use crate::error::{HypnosError, Result};
use crate::platform::{BlePlatform, BluetoothResult, LinkLossSink};
use crate::types::{ConnectionState, EngineEvent, FailureKind, PeripheralId};

/// Owner of the link state machine.
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    peripheral: Option<PeripheralId>,
    epoch: u64,
    available: BTreeSet<Characteristic>,
    /// Answered when the link next reaches `Ready` or fails.
    waiter: Option<Reply<()>>,
    /// Answered when the link closes.
    closing: Vec<Reply<()>>,
}

impl ConnectionManager {
    pub(crate) fn new(state_tx: watch::Sender<ConnectionState>) -> Self {
        state_tx.send_replace(ConnectionState::Disconnected);
        Self {
            state: ConnectionState::Disconnected,
            state_tx,
            peripheral: None,
            epoch: 0,
            available: BTreeSet::new(),
            waiter: None,
            closing: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Peripheral of the current link.
    #[must_use]
    pub const fn peripheral(&self) -> Option<&PeripheralId> {
        self.peripheral.as_ref()
    }

    /// Epoch of the current link.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Known characteristics exposed by the connected peripheral.
    #[must_use]
    pub const fn available(&self) -> &BTreeSet<Characteristic> {
        &self.available
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.peripheral.is_some()
    }

    /// Whether a live link attempt or link to `id` exists.
    fn holds_link(&self, id: &PeripheralId) -> bool {
        self.peripheral.as_ref() == Some(id)
            && !matches!(
                self.state,
                ConnectionState::Disconnected | ConnectionState::Disconnecting
            )
    }

    pub(crate) fn set_available(&mut self, available: BTreeSet<Characteristic>) {
        self.available = available;
    }

    /// Start a link. Rejected unless disconnected.
    pub(crate) fn connect<P: BlePlatform>(
        &mut self,
        id: PeripheralId,
        link_loss: LinkLossSink,
        ctx: &OpContext<P>,
    ) -> Result<()> {
        if self.state.is_active() {
            return Err(HypnosError::AlreadyActive { state: self.state });
        }

        self.epoch += 1;
        self.available.clear();
        self.peripheral = Some(id.clone());
        self.set_state(ConnectionState::Connecting, ctx);
        info!(peripheral = %id, epoch = self.epoch, "Connecting");

        let epoch = self.epoch;
        let target = id.clone();
        ctx.spawn_op(
            "connect",
            move |platform| async move { platform.connect(&target, link_loss).await },
            move |result| Event::Connected { epoch, id, result },
        );
        Ok(())
    }

    /// Register the reply answered when the link reaches `Ready` or fails.
    pub(crate) fn await_ready(&mut self, reply: Reply<()>) {
        if let Some(previous) = self.waiter.replace(reply) {
            respond(
                previous,
                Err(HypnosError::ConnectionFailure("superseded".to_string())),
            );
        }
    }

    pub(crate) fn on_connected<P: BlePlatform>(
        &mut self,
        epoch: u64,
        id: PeripheralId,
        result: BluetoothResult<()>,
        ctx: &OpContext<P>,
    ) -> Result<()> {
        if !self.is_current(epoch) || self.state != ConnectionState::Connecting {
            // The link came up after it was abandoned. Close it unless a
            // newer link to the same peripheral is using it.
            if result.is_ok() && !self.holds_link(&id) {
                debug!(peripheral = %id, epoch, "Closing link that came up after teardown");
                ctx.spawn_op(
                    "disconnect",
                    move |platform| async move { platform.disconnect(&id).await },
                    |result| Event::TeardownDone { result },
                );
            } else {
                debug!(epoch, "Dropping stale connect completion");
            }
            return Ok(());
        }
        result.map_err(|error| HypnosError::ConnectionFailure(error.to_string()))?;

        let Some(id) = self.peripheral.clone() else {
            return Ok(());
        };
        self.set_state(ConnectionState::DiscoveringServices, ctx);
        ctx.spawn_op(
            "discover_services",
            move |platform| async move { platform.discover_services(&id).await },
            move |result| Event::ServicesResolved { epoch, result },
        );
        Ok(())
    }

    /// Returns the exposed UUIDs once the link may start syncing.
    pub(crate) fn on_services_resolved<P: BlePlatform>(
        &mut self,
        epoch: u64,
        result: BluetoothResult<Vec<Uuid>>,
        ctx: &OpContext<P>,
    ) -> Result<Option<Vec<Uuid>>> {
        if !self.is_current(epoch) || self.state != ConnectionState::DiscoveringServices {
            debug!(epoch, "Dropping stale service discovery completion");
            return Ok(None);
        }
        let uuids = result.map_err(|error| {
            HypnosError::ConnectionFailure(format!("service discovery failed: {error}"))
        })?;

        self.set_state(ConnectionState::Syncing, ctx);
        Ok(Some(uuids))
    }

    /// Re-enter `Syncing` from `Ready`.
    pub(crate) fn begin_resync<P: BlePlatform>(&mut self, ctx: &OpContext<P>) -> Result<()> {
        if self.state != ConnectionState::Ready {
            return Err(HypnosError::NotReady { state: self.state });
        }
        self.set_state(ConnectionState::Syncing, ctx);
        Ok(())
    }

    pub(crate) fn mark_ready<P: BlePlatform>(&mut self, ctx: &OpContext<P>) {
        self.set_state(ConnectionState::Ready, ctx);
        if let Some(waiter) = self.waiter.take() {
            respond(waiter, Ok(()));
        }
    }

    /// Abandon the link after a failure and land in `Disconnected`.
    ///
    /// The platform link is closed on a best-effort basis.
    pub(crate) fn fail<P: BlePlatform>(&mut self, error: HypnosError, ctx: &OpContext<P>) {
        if !self.state.is_active() {
            return;
        }
        let kind = error.failure_kind().unwrap_or(FailureKind::Connection);
        warn!(
            peripheral = ?self.peripheral,
            state = %self.state,
            %error,
            "Link failed"
        );

        self.epoch += 1;
        if let Some(id) = self.peripheral.take() {
            ctx.spawn_op(
                "disconnect",
                move |platform| async move { platform.disconnect(&id).await },
                |result| Event::TeardownDone { result },
            );
        }
        self.set_state(ConnectionState::Disconnected, ctx);
        ctx.emit(EngineEvent::Failed {
            kind,
            message: error.to_string(),
        });
        if let Some(waiter) = self.waiter.take() {
            respond(waiter, Err(error));
        }
    }

    /// Tear the link down from any state.
    ///
    /// With `unbond`, bond removal is attempted first; its failure is only
    /// logged.
    pub(crate) fn disconnect<P: BlePlatform>(
        &mut self,
        unbond: bool,
        reply: Reply<()>,
        ctx: &OpContext<P>,
    ) {
        match self.state {
            ConnectionState::Disconnected => respond(reply, Ok(())),
            ConnectionState::Disconnecting => self.closing.push(reply),
            _ => {
                self.epoch += 1;
                self.closing.push(reply);
                if let Some(waiter) = self.waiter.take() {
                    respond(
                        waiter,
                        Err(HypnosError::ConnectionFailure(
                            "disconnect requested".to_string(),
                        )),
                    );
                }

                let Some(id) = self.peripheral.clone() else {
                    self.close(ctx);
                    return;
                };
                info!(peripheral = %id, unbond, "Disconnecting");
                self.set_state(ConnectionState::Disconnecting, ctx);

                let epoch = self.epoch;
                ctx.spawn_op(
                    "disconnect",
                    move |platform| async move {
                        if unbond {
                            if let Err(error) = platform.remove_bond(&id).await {
                                warn!(peripheral = %id, %error, "Bond removal failed, disconnecting anyway");
                            }
                        }
                        platform.disconnect(&id).await
                    },
                    move |result| Event::LinkClosed { epoch, result },
                );
            }
        }
    }

    pub(crate) fn on_link_closed<P: BlePlatform>(
        &mut self,
        epoch: u64,
        result: BluetoothResult<()>,
        ctx: &OpContext<P>,
    ) {
        if epoch != self.epoch || self.state != ConnectionState::Disconnecting {
            debug!(epoch, "Dropping stale disconnect completion");
            return;
        }
        if let Err(error) = result {
            warn!(%error, "Platform disconnect failed, treating link as closed");
        }
        self.close(ctx);
    }

    /// Handle an unsolicited drop. Returns `true` if it ended the current link.
    pub(crate) fn on_link_lost<P: BlePlatform>(
        &mut self,
        id: &PeripheralId,
        ctx: &OpContext<P>,
    ) -> bool {
        if self.peripheral.as_ref() != Some(id)
            || matches!(
                self.state,
                ConnectionState::Disconnected | ConnectionState::Disconnecting
            )
        {
            return false;
        }

        let was_ready = self.state == ConnectionState::Ready;
        warn!(peripheral = %id, state = %self.state, "Link lost");
        self.epoch += 1;
        self.peripheral = None;
        self.available.clear();
        self.set_state(ConnectionState::Disconnected, ctx);
        ctx.emit(EngineEvent::LinkLost(id.clone()));

        if !was_ready {
            let error = HypnosError::ConnectionFailure(
                "link lost before the peripheral became ready".to_string(),
            );
            ctx.emit(EngineEvent::Failed {
                kind: FailureKind::Connection,
                message: error.to_string(),
            });
            if let Some(waiter) = self.waiter.take() {
                respond(waiter, Err(error));
            }
        }
        true
    }

    fn close<P: BlePlatform>(&mut self, ctx: &OpContext<P>) {
        self.peripheral = None;
        self.available.clear();
        self.set_state(ConnectionState::Disconnected, ctx);
        for reply in self.closing.drain(..) {
            respond(reply, Ok(()));
        }
    }

    fn set_state<P: BlePlatform>(&mut self, state: ConnectionState, ctx: &OpContext<P>) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, epoch = self.epoch, "Connection state");
        self.state = state;
        self.state_tx.send_replace(state);
        ctx.emit(EngineEvent::StateChanged(state));
    }
}
