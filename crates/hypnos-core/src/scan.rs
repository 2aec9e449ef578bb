//! Peripheral discovery.
//!
//! [`ScanCoordinator`] owns the deduplicated result set. While scanning, a
//! forwarder task turns platform reports into mailbox events and an
//! eviction timer periodically empties the set so peripherals that went out
//! of range disappear and everything in range is re-reported.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{respond, Event, OpContext, Reply, WeakMailbox};
use crate::error::HypnosError;
use crate::platform::{BlePlatform, BluetoothResult, DiscoveryReport};
use crate::types::{EngineEvent, FailureKind, PeripheralHandle, PeripheralId};

/// Decides which discovered peripherals are connected without user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoConnectPolicy {
    known: BTreeSet<PeripheralId>,
    bonded_name_filter: String,
}

impl AutoConnectPolicy {
    /// Build a policy from explicit addresses and a bonded-name filter.
    ///
    /// An empty filter disables name matching.
    #[must_use]
    pub fn new(known: BTreeSet<PeripheralId>, bonded_name_filter: &str) -> Self {
        Self {
            known,
            bonded_name_filter: bonded_name_filter.to_string(),
        }
    }

    /// A report is known if it is listed, was the last ready peripheral, or
    /// is bonded and advertises a name containing the filter.
    #[must_use]
    pub fn is_known(&self, report: &DiscoveryReport, last_device: Option<&PeripheralId>) -> bool {
        if self.known.contains(&report.id) || last_device == Some(&report.id) {
            return true;
        }
        report.bonded
            && !self.bonded_name_filter.is_empty()
            && report
                .name
                .as_deref()
                .is_some_and(|name| name.contains(&self.bonded_name_filter))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanPhase {
    Idle,
    Starting,
    Active,
}

/// Discovery state and the deduplicated result set.
#[derive(Debug)]
pub struct ScanCoordinator {
    phase: ScanPhase,
    generation: u64,
    eviction_interval: Duration,
    results: BTreeMap<PeripheralId, PeripheralHandle>,
    waiting: Vec<Reply<()>>,
    forwarder: Option<JoinHandle<()>>,
    eviction: Option<JoinHandle<()>>,
}

impl ScanCoordinator {
    pub(crate) fn new(eviction_interval: Duration) -> Self {
        Self {
            phase: ScanPhase::Idle,
            generation: 0,
            eviction_interval,
            results: BTreeMap::new(),
            waiting: Vec::new(),
            forwarder: None,
            eviction: None,
        }
    }

    /// Whether the platform confirmed that discovery is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.phase == ScanPhase::Active
    }

    /// Current result set, ordered by identifier.
    #[must_use]
    pub fn results(&self) -> Vec<PeripheralHandle> {
        self.results.values().cloned().collect()
    }

    /// Begin discovery. Replies once the platform confirms; a no-op reply
    /// if already scanning.
    pub(crate) fn start<P: BlePlatform>(&mut self, reply: Reply<()>, ctx: &OpContext<P>) {
        match self.phase {
            ScanPhase::Active => respond(reply, Ok(())),
            ScanPhase::Starting => self.waiting.push(reply),
            ScanPhase::Idle => {
                self.generation += 1;
                self.phase = ScanPhase::Starting;
                self.waiting.push(reply);

                let generation = self.generation;
                let (reports, rx) = mpsc::unbounded_channel();
                self.forwarder = Some(spawn_forwarder(rx, generation, ctx.mailbox()));

                debug!(generation, "Starting scan");
                ctx.spawn_op(
                    "start_scan",
                    move |platform| async move { platform.start_scan(reports).await },
                    move |result| Event::ScanStarted { generation, result },
                );
            }
        }
    }

    pub(crate) fn on_started<P: BlePlatform>(
        &mut self,
        generation: u64,
        result: BluetoothResult<()>,
        ctx: &OpContext<P>,
    ) {
        if generation != self.generation || self.phase != ScanPhase::Starting {
            // Stopped before the platform answered.
            if result.is_ok() {
                debug!(generation, "Late scan start after stop, stopping again");
                spawn_stop(ctx);
            }
            return;
        }

        match result {
            Ok(()) => {
                info!(generation, "Scanning");
                self.phase = ScanPhase::Active;
                self.eviction = Some(spawn_eviction(
                    self.eviction_interval,
                    generation,
                    ctx.mailbox(),
                ));
                for reply in self.waiting.drain(..) {
                    respond(reply, Ok(()));
                }
            }
            Err(error) => {
                warn!(%error, "Scan failed to start");
                self.phase = ScanPhase::Idle;
                self.abort_tasks();
                let message = error.to_string();
                ctx.emit(EngineEvent::Failed {
                    kind: FailureKind::Scan,
                    message: message.clone(),
                });
                for reply in self.waiting.drain(..) {
                    respond(reply, Err(HypnosError::ScanFailure(message.clone())));
                }
            }
        }
    }

    /// Stop discovery, cancel the eviction timer and clear the result set.
    /// Idempotent.
    pub(crate) fn stop<P: BlePlatform>(&mut self, ctx: &OpContext<P>) {
        let phase = self.phase;
        if phase != ScanPhase::Idle {
            self.generation += 1;
            self.phase = ScanPhase::Idle;
            self.abort_tasks();
            for reply in self.waiting.drain(..) {
                respond(
                    reply,
                    Err(HypnosError::ScanFailure(
                        "scan stopped before it started".to_string(),
                    )),
                );
            }
            if phase == ScanPhase::Active {
                info!("Stopping scan");
                spawn_stop(ctx);
            }
        }
        self.clear(ctx);
    }

    /// Merge a report. Returns `false` for reports from an older scan.
    pub(crate) fn on_discovered<P: BlePlatform>(
        &mut self,
        generation: u64,
        report: &DiscoveryReport,
        ctx: &OpContext<P>,
    ) -> bool {
        if generation != self.generation || self.phase == ScanPhase::Idle {
            return false;
        }

        let handle = PeripheralHandle {
            id: report.id.clone(),
            name: report.name.clone(),
            rssi_dbm: report.rssi,
            last_seen_utc: Utc::now(),
        };
        let previous = self.results.insert(report.id.clone(), handle.clone());
        if previous.is_none() {
            debug!(peripheral = %report.id, rssi = ?report.rssi, "Peripheral discovered");
        }
        ctx.emit(EngineEvent::PeripheralDiscovered(handle));
        true
    }

    pub(crate) fn on_evict_tick<P: BlePlatform>(&mut self, generation: u64, ctx: &OpContext<P>) {
        if generation == self.generation && self.phase == ScanPhase::Active {
            self.clear(ctx);
        }
    }

    fn clear<P: BlePlatform>(&mut self, ctx: &OpContext<P>) {
        if !self.results.is_empty() {
            debug!(evicted = self.results.len(), "Clearing scan results");
            self.results.clear();
            ctx.emit(EngineEvent::ResultsCleared);
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
        if let Some(task) = self.eviction.take() {
            task.abort();
        }
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

fn spawn_stop<P: BlePlatform>(ctx: &OpContext<P>) {
    ctx.spawn_op(
        "stop_scan",
        |platform| async move { platform.stop_scan().await },
        |result| Event::ScanStopped { result },
    );
}

fn spawn_forwarder(
    mut reports: mpsc::UnboundedReceiver<DiscoveryReport>,
    generation: u64,
    mailbox: WeakMailbox,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            let Some(mailbox) = mailbox.upgrade() else {
                break;
            };
            let _ = mailbox.send(Event::Discovered { generation, report });
        }
    })
}

fn spawn_eviction(period: Duration, generation: u64, mailbox: WeakMailbox) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let Some(mailbox) = mailbox.upgrade() else {
                break;
            };
            if mailbox.send(Event::EvictTick { generation }).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(address: &str, name: Option<&str>, bonded: bool) -> DiscoveryReport {
        DiscoveryReport {
            id: PeripheralId::parse(address).unwrap(),
            name: name.map(str::to_string),
            rssi: Some(-60),
            bonded,
        }
    }

    #[test]
    fn test_listed_device_is_known() {
        let listed = PeripheralId::parse("AA:BB:CC:DD:EE:01").unwrap();
        let policy = AutoConnectPolicy::new(BTreeSet::from([listed]), "Hypnos");
        assert!(policy.is_known(&report("AA:BB:CC:DD:EE:01", None, false), None));
        assert!(!policy.is_known(&report("AA:BB:CC:DD:EE:02", None, false), None));
    }

    #[test]
    fn test_bonded_name_filter() {
        let policy = AutoConnectPolicy::new(BTreeSet::new(), "Hypnos");
        assert!(policy.is_known(&report("AA:BB:CC:DD:EE:01", Some("Hypnos-7F"), true), None));
        // Name matches but no bond
        assert!(!policy.is_known(&report("AA:BB:CC:DD:EE:01", Some("Hypnos-7F"), false), None));
        assert!(!policy.is_known(&report("AA:BB:CC:DD:EE:01", Some("Headphones"), true), None));
        assert!(!policy.is_known(&report("AA:BB:CC:DD:EE:01", None, true), None));
    }

    #[test]
    fn test_empty_filter_disables_name_match() {
        let policy = AutoConnectPolicy::new(BTreeSet::new(), "");
        assert!(!policy.is_known(&report("AA:BB:CC:DD:EE:01", Some("Hypnos"), true), None));
    }

    #[test]
    fn test_last_device_is_known() {
        let policy = AutoConnectPolicy::new(BTreeSet::new(), "Hypnos");
        let last = PeripheralId::parse("AA:BB:CC:DD:EE:03").unwrap();
        assert!(policy.is_known(&report("aa:bb:cc:dd:ee:03", None, false), Some(&last)));
    }
}
