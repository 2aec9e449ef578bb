//! Ordered write/read queue run once services are resolved.
//!
//! [`build_queue`] turns the stored timetable into characteristic writes
//! (only for characteristics the peripheral exposes) followed by feedback
//! reads. [`SyncOrchestrator`] drains the queue one request at a time; the
//! next request is issued only after the previous one completed.
//!
//! The queue is not atomic. The first failed write abandons the rest, and
//! writes that already landed stay on the peripheral.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, warn};

use crate::characteristics::{Characteristic, READ_ORDER, WRITE_ORDER};
use crate::codec::{
    decode_battery_level, decode_time_exceptions, encode_hour_minute, encode_time_exceptions,
    encode_u32, encode_unix_time, CodecError, CodecResult,
};
use crate::engine::{Event, OpContext};
use crate::error::{HypnosError, Result};
use crate::platform::{BlePlatform, BluetoothResult};
use crate::timetable::{TimeException, TimetableConfig};
use crate::types::{EngineEvent, FailureKind, PeripheralId};

/// One queued platform request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStep {
    /// Write `value` to the characteristic.
    Write {
        /// Target.
        characteristic: Characteristic,
        /// Encoded bytes.
        value: Vec<u8>,
    },
    /// Read the characteristic back.
    Read {
        /// Source.
        characteristic: Characteristic,
    },
}

impl SyncStep {
    /// Characteristic the step touches.
    #[must_use]
    pub const fn characteristic(&self) -> Characteristic {
        match self {
            Self::Write { characteristic, .. } | Self::Read { characteristic } => *characteristic,
        }
    }
}

/// Output of [`build_queue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Requests in the order they are issued.
    pub steps: VecDeque<SyncStep>,
    /// Fields left out because they failed to encode.
    pub skipped: Vec<(Characteristic, CodecError)>,
}

/// Build the write/read queue for one sync.
///
/// Writes follow [`WRITE_ORDER`] and reads follow [`READ_ORDER`], both
/// filtered to `available`. Without a stored timetable only the clock is
/// written. A field that fails to encode is recorded in
/// [`SyncPlan::skipped`] and the rest of the queue is unaffected.
#[must_use]
pub fn build_queue(
    config: Option<&TimetableConfig>,
    available: &BTreeSet<Characteristic>,
    local_offset: FixedOffset,
    now: DateTime<Utc>,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for characteristic in WRITE_ORDER {
        if !available.contains(&characteristic) {
            continue;
        }
        match encode_field(characteristic, config, local_offset, now) {
            Ok(Some(value)) => plan.steps.push_back(SyncStep::Write {
                characteristic,
                value,
            }),
            Ok(None) => {}
            Err(error) => plan.skipped.push((characteristic, error)),
        }
    }

    for characteristic in READ_ORDER {
        if available.contains(&characteristic) {
            plan.steps.push_back(SyncStep::Read { characteristic });
        }
    }

    plan
}

fn encode_field(
    characteristic: Characteristic,
    config: Option<&TimetableConfig>,
    local_offset: FixedOffset,
    now: DateTime<Utc>,
) -> CodecResult<Option<Vec<u8>>> {
    if characteristic == Characteristic::CurrentTime {
        return encode_unix_time(now).map(|bytes| Some(bytes.to_vec()));
    }
    let Some(config) = config else {
        return Ok(None);
    };

    let value = match characteristic {
        Characteristic::MorningCurfew => {
            encode_hour_minute(config.morning_curfew, local_offset).to_vec()
        }
        Characteristic::NightCurfew => encode_hour_minute(config.night_curfew, local_offset).to_vec(),
        Characteristic::WorkDuration => encode_u32(config.work_duration_minutes).to_vec(),
        Characteristic::BreakDuration => encode_u32(config.break_duration_minutes).to_vec(),
        Characteristic::ActiveExceptions => encode_time_exceptions(&config.active_exceptions)?,
        Characteristic::TokensLeft => encode_u32(config.tokens_left).to_vec(),
        Characteristic::CurrentTime | Characteristic::BatteryLevel => return Ok(None),
    };
    Ok(Some(value))
}

/// A decoded feedback value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadValue {
    /// Exceptions echoed back by the peripheral.
    Exceptions(Vec<TimeException>),
    /// Battery percentage.
    Battery(u8),
}

/// Drains a [`SyncPlan`] one request at a time.
#[derive(Debug, Default)]
pub struct SyncOrchestrator {
    queue: VecDeque<SyncStep>,
    in_flight: Option<Characteristic>,
}

impl SyncOrchestrator {
    /// Requests not yet issued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn load(&mut self, steps: VecDeque<SyncStep>) {
        debug!(steps = steps.len(), "Sync queue built");
        self.queue = steps;
        self.in_flight = None;
    }

    /// Discard everything still queued.
    pub(crate) fn clear(&mut self) {
        if !self.queue.is_empty() {
            debug!(discarded = self.queue.len(), "Sync queue discarded");
        }
        self.queue.clear();
        self.in_flight = None;
    }

    /// Issue the next request. Returns `false` once the queue is drained.
    pub(crate) fn advance<P: BlePlatform>(
        &mut self,
        id: &PeripheralId,
        epoch: u64,
        ctx: &OpContext<P>,
    ) -> bool {
        if self.in_flight.is_some() {
            return true;
        }
        let Some(step) = self.queue.pop_front() else {
            return false;
        };

        let characteristic = step.characteristic();
        let uuid = characteristic.uuid();
        let id = id.clone();
        self.in_flight = Some(characteristic);

        match step {
            SyncStep::Write { value, .. } => {
                debug!(%characteristic, len = value.len(), "Writing");
                ctx.spawn_op(
                    "write_characteristic",
                    move |platform| async move {
                        platform.write_characteristic(&id, uuid, &value).await
                    },
                    move |result| Event::Written {
                        epoch,
                        characteristic,
                        result,
                    },
                );
            }
            SyncStep::Read { .. } => {
                debug!(%characteristic, "Reading");
                ctx.spawn_op(
                    "read_characteristic",
                    move |platform| async move { platform.read_characteristic(&id, uuid).await },
                    move |result| Event::Read {
                        epoch,
                        characteristic,
                        result,
                    },
                );
            }
        }
        true
    }

    /// A write completed. A failure aborts the remaining queue.
    pub(crate) fn on_written(
        &mut self,
        characteristic: Characteristic,
        result: BluetoothResult<()>,
    ) -> Result<()> {
        if self.in_flight != Some(characteristic) {
            debug!(%characteristic, "Ignoring unexpected write completion");
            return Ok(());
        }
        self.in_flight = None;

        result.map_err(|error| {
            self.clear();
            HypnosError::WriteRejected {
                characteristic,
                message: error.to_string(),
            }
        })
    }

    /// A read completed.
    ///
    /// A platform failure aborts the remaining queue. A value that fails to
    /// decode is dropped and reported; the queue continues.
    pub(crate) fn on_read<P: BlePlatform>(
        &mut self,
        characteristic: Characteristic,
        result: BluetoothResult<Vec<u8>>,
        ctx: &OpContext<P>,
    ) -> Result<Option<ReadValue>> {
        if self.in_flight != Some(characteristic) {
            debug!(%characteristic, "Ignoring unexpected read completion");
            return Ok(None);
        }
        self.in_flight = None;

        let bytes = result.map_err(|error| {
            self.clear();
            HypnosError::ConnectionFailure(format!("read of {characteristic} failed: {error}"))
        })?;

        match decode_read(characteristic, &bytes) {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(%characteristic, %error, len = bytes.len(), "Dropping undecodable read");
                ctx.emit(EngineEvent::Failed {
                    kind: FailureKind::Codec,
                    message: format!("{characteristic}: {error}"),
                });
                Ok(None)
            }
        }
    }
}

fn decode_read(characteristic: Characteristic, bytes: &[u8]) -> CodecResult<Option<ReadValue>> {
    match characteristic {
        Characteristic::ActiveExceptions => {
            decode_time_exceptions(bytes).map(|list| Some(ReadValue::Exceptions(list)))
        }
        Characteristic::BatteryLevel => {
            decode_battery_level(bytes).map(|percent| Some(ReadValue::Battery(percent)))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::characteristics::TIMETABLE_FIELDS;
    use crate::timetable::HourMinuteTime;
    use chrono::TimeZone;

    fn sample_config() -> TimetableConfig {
        TimetableConfig {
            morning_curfew: HourMinuteTime::new(7, 30).unwrap(),
            night_curfew: HourMinuteTime::new(22, 0).unwrap(),
            work_duration_minutes: 50,
            break_duration_minutes: 10,
            active_exceptions: vec![TimeException::new(
                Utc.timestamp_opt(1000, 0).unwrap(),
                Utc.timestamp_opt(2000, 0).unwrap(),
            )
            .unwrap()],
            tokens_left: 3,
        }
    }

    fn utc_plus_2() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn order(plan: &SyncPlan) -> Vec<Characteristic> {
        plan.steps.iter().map(SyncStep::characteristic).collect()
    }

    #[test]
    fn test_full_service_order() {
        let available: BTreeSet<_> = WRITE_ORDER.into_iter().chain(READ_ORDER).collect();
        let plan = build_queue(Some(&sample_config()), &available, utc_plus_2(), now());

        let mut expected = WRITE_ORDER.to_vec();
        expected.extend(READ_ORDER);
        assert_eq!(order(&plan), expected);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_subset_queue_contains_only_exposed_fields() {
        let available =
            BTreeSet::from([Characteristic::ActiveExceptions, Characteristic::MorningCurfew]);
        let plan = build_queue(Some(&sample_config()), &available, utc_plus_2(), now());

        assert_eq!(
            plan.steps,
            VecDeque::from([
                SyncStep::Write {
                    characteristic: Characteristic::MorningCurfew,
                    value: vec![0x5E, 0x01],
                },
                SyncStep::Write {
                    characteristic: Characteristic::ActiveExceptions,
                    value: vec![0xE8, 0x03, 0x00, 0x00, 0xD0, 0x07, 0x00, 0x00],
                },
                SyncStep::Read {
                    characteristic: Characteristic::ActiveExceptions,
                },
            ])
        );
    }

    #[test]
    fn test_scalar_fields_are_u32_le() {
        let available = BTreeSet::from([Characteristic::WorkDuration, Characteristic::TokensLeft]);
        let plan = build_queue(Some(&sample_config()), &available, utc_plus_2(), now());
        assert_eq!(
            plan.steps,
            VecDeque::from([
                SyncStep::Write {
                    characteristic: Characteristic::WorkDuration,
                    value: vec![50, 0, 0, 0],
                },
                SyncStep::Write {
                    characteristic: Characteristic::TokensLeft,
                    value: vec![3, 0, 0, 0],
                },
            ])
        );
    }

    #[test]
    fn test_clock_written_first() {
        let available: BTreeSet<_> = TIMETABLE_FIELDS
            .into_iter()
            .chain([Characteristic::CurrentTime])
            .collect();
        let plan = build_queue(Some(&sample_config()), &available, utc_plus_2(), now());
        assert_eq!(
            plan.steps.front(),
            Some(&SyncStep::Write {
                characteristic: Characteristic::CurrentTime,
                value: 1_700_000_000_u32.to_le_bytes().to_vec(),
            })
        );
    }

    #[test]
    fn test_without_config_only_clock_and_reads() {
        let available: BTreeSet<_> = WRITE_ORDER.into_iter().chain(READ_ORDER).collect();
        let plan = build_queue(None, &available, utc_plus_2(), now());

        let mut expected = vec![Characteristic::CurrentTime];
        expected.extend(READ_ORDER);
        assert_eq!(order(&plan), expected);
    }

    #[test]
    fn test_unencodable_field_is_skipped() {
        let mut config = sample_config();
        // Past the u32 epoch range
        config.active_exceptions = vec![TimeException::new(
            Utc.timestamp_opt(5_000_000_000, 0).unwrap(),
            Utc.timestamp_opt(5_000_000_100, 0).unwrap(),
        )
        .unwrap()];
        let available: BTreeSet<_> = TIMETABLE_FIELDS.into_iter().collect();
        let plan = build_queue(Some(&config), &available, utc_plus_2(), now());

        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].0, Characteristic::ActiveExceptions);
        assert!(!order(&plan).contains(&Characteristic::ActiveExceptions));
        assert_eq!(plan.steps.len(), TIMETABLE_FIELDS.len() - 1);
    }

    #[test]
    fn test_empty_service_builds_empty_queue() {
        let plan = build_queue(Some(&sample_config()), &BTreeSet::new(), utc_plus_2(), now());
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_decode_read() {
        assert_eq!(
            decode_read(Characteristic::BatteryLevel, &[87]).unwrap(),
            Some(ReadValue::Battery(87))
        );
        assert_eq!(
            decode_read(Characteristic::ActiveExceptions, &[]).unwrap(),
            Some(ReadValue::Exceptions(Vec::new()))
        );
        assert!(decode_read(Characteristic::ActiveExceptions, &[0; 9]).is_err());
    }
}
