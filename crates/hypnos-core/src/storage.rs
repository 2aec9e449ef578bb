//! Persistent key-value storage for the timetable and status fields.
//!
//! The engine only needs a blob holder: JSON values under fixed keys.
//! [`JsonFileStore`] keeps them in a single pretty-printed JSON file that is
//! rewritten on every put; [`MemoryStore`] is used by tests and by the
//! mock daemon.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{HypnosError, Result};
use crate::timetable::TimetableConfig;
use crate::types::PeripheralId;

/// Key of the serialized [`TimetableConfig`] blob.
pub const KEY_TIMETABLE_CONFIG: &str = "timetableConfig";
/// Key of the break-phase flag.
pub const KEY_IS_BREAK_PHASE: &str = "isBreakPhase";
/// Key of the minutes left in the current phase.
pub const KEY_TIME_LEFT: &str = "timeLeft";
/// Key of the battery percentage.
pub const KEY_BATTERY: &str = "battery";
/// Key of the local `HH:MM` time of the last sync.
pub const KEY_SYNC_TIME: &str = "syncTime";
/// Key of the last peripheral that reached ready.
pub const KEY_LAST_DEVICE: &str = "lastDevice";

/// Integer sentinel for an absent status field.
pub const MISSING_INT: i64 = -1;
/// String sentinel for an absent sync time.
pub const MISSING_SYNC_TIME: &str = "None";

/// Name of the file [`JsonFileStore`] writes in its directory.
pub const STORE_FILE_NAME: &str = "status.json";

/// A blob holder keyed by string.
pub trait KeyValueStore: Send + Sync {
    /// Value under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn put(&self, key: &str, value: Value) -> Result<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(lock(&self.values)?.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        lock(&self.values)?.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by one JSON object file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store file inside `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let path = data_dir.as_ref().join(STORE_FILE_NAME);
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                HypnosError::PersistenceError(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                ))
            })?;
            serde_json::from_str(&content)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, content).map_err(|e| {
            HypnosError::PersistenceError(format!(
                "Failed to write {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(lock(&self.values)?.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut values = lock(&self.values)?;
        // Only a value that reached the disk becomes visible.
        let mut updated = values.clone();
        updated.insert(key.to_string(), value);
        self.flush(&updated)?;
        *values = updated;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| HypnosError::PersistenceError("store lock poisoned".to_string()))
}

/// Status fields with their absent-value sentinels applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "isBreakPhase": false,
    "timeLeft": 23,
    "battery": 87,
    "syncTime": "21:04",
    "lastDevice": "F1:E2:D3:C4:B5:A6"
}))]
pub struct DeviceStatus {
    /// Whether the peripheral is in a break phase.
    pub is_break_phase: bool,
    /// Minutes left in the current phase, `-1` when unknown.
    pub time_left: i64,
    /// Battery percentage, `-1` when unknown.
    pub battery: i64,
    /// Local `HH:MM` of the last sync, `"None"` when never synced.
    pub sync_time: String,
    /// Last peripheral that reached ready.
    pub last_device: Option<PeripheralId>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            is_break_phase: false,
            time_left: MISSING_INT,
            battery: MISSING_INT,
            sync_time: MISSING_SYNC_TIME.to_string(),
            last_device: None,
        }
    }
}

/// Typed view over a [`KeyValueStore`].
#[derive(Clone)]
pub struct StatusStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStore").finish_non_exhaustive()
    }
}

impl StatusStore {
    /// Wrap a store.
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// A store that lives only as long as the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// The stored timetable, if one was ever configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the blob no longer parses.
    pub fn timetable_config(&self) -> Result<Option<TimetableConfig>> {
        self.store
            .get(KEY_TIMETABLE_CONFIG)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// Replace the stored timetable.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set_timetable_config(&self, config: &TimetableConfig) -> Result<()> {
        self.store
            .put(KEY_TIMETABLE_CONFIG, serde_json::to_value(config)?)
    }

    /// Every status field, defaulted to its sentinel when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn status(&self) -> Result<DeviceStatus> {
        let defaults = DeviceStatus::default();
        Ok(DeviceStatus {
            is_break_phase: self
                .store
                .get(KEY_IS_BREAK_PHASE)?
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.is_break_phase),
            time_left: self.int_or_sentinel(KEY_TIME_LEFT)?,
            battery: self.int_or_sentinel(KEY_BATTERY)?,
            sync_time: self
                .store
                .get(KEY_SYNC_TIME)?
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or(defaults.sync_time),
            last_device: self.last_device()?,
        })
    }

    /// Overwrite the phase fields reported by the peripheral.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set_phase(&self, is_break_phase: bool, time_left_minutes: i64) -> Result<()> {
        self.store.put(KEY_IS_BREAK_PHASE, Value::Bool(is_break_phase))?;
        self.store.put(KEY_TIME_LEFT, Value::from(time_left_minutes))
    }

    /// Record the battery percentage.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set_battery(&self, percent: u8) -> Result<()> {
        self.store.put(KEY_BATTERY, Value::from(percent))
    }

    /// Record the local `HH:MM` of the last sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set_sync_time(&self, hh_mm: &str) -> Result<()> {
        self.store.put(KEY_SYNC_TIME, Value::from(hh_mm))
    }

    /// The last peripheral that reached ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn last_device(&self) -> Result<Option<PeripheralId>> {
        Ok(self
            .store
            .get(KEY_LAST_DEVICE)?
            .and_then(|v| v.as_str().and_then(|s| PeripheralId::parse(s).ok())))
    }

    /// Remember the last peripheral that reached ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set_last_device(&self, id: &PeripheralId) -> Result<()> {
        self.store.put(KEY_LAST_DEVICE, Value::from(id.as_str()))
    }

    fn int_or_sentinel(&self, key: &str) -> Result<i64> {
        Ok(self
            .store
            .get(key)?
            .and_then(|v| v.as_i64())
            .unwrap_or(MISSING_INT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::HourMinuteTime;
    use tempfile::TempDir;

    fn sample_config() -> TimetableConfig {
        TimetableConfig {
            morning_curfew: HourMinuteTime::new(7, 0).unwrap(),
            night_curfew: HourMinuteTime::new(22, 30).unwrap(),
            work_duration_minutes: 50,
            break_duration_minutes: 10,
            active_exceptions: Vec::new(),
            tokens_left: 3,
        }
    }

    #[test]
    fn test_sentinels_when_empty() {
        let store = StatusStore::in_memory();
        let status = store.status().unwrap();
        assert!(!status.is_break_phase);
        assert_eq!(status.time_left, -1);
        assert_eq!(status.battery, -1);
        assert_eq!(status.sync_time, "None");
        assert_eq!(status.last_device, None);
        assert_eq!(store.timetable_config().unwrap(), None);
    }

    #[test]
    fn test_status_updates() {
        let store = StatusStore::in_memory();
        store.set_battery(87).unwrap();
        store.set_sync_time("21:04").unwrap();
        store.set_phase(true, 12).unwrap();
        let id = PeripheralId::parse("f1:e2:d3:c4:b5:a6").unwrap();
        store.set_last_device(&id).unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.battery, 87);
        assert_eq!(status.sync_time, "21:04");
        assert!(status.is_break_phase);
        assert_eq!(status.time_left, 12);
        assert_eq!(status.last_device, Some(id));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let json = serde_json::to_value(DeviceStatus::default()).unwrap();
        assert_eq!(json["syncTime"], "None");
        assert_eq!(json["isBreakPhase"], false);
        assert_eq!(json["timeLeft"], -1);
    }

    #[test]
    fn test_timetable_replace() {
        let store = StatusStore::in_memory();
        let mut config = sample_config();
        store.set_timetable_config(&config).unwrap();
        config.tokens_left = 0;
        store.set_timetable_config(&config).unwrap();
        assert_eq!(store.timetable_config().unwrap(), Some(config));
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = StatusStore::new(JsonFileStore::open(dir.path()).unwrap());
            store.set_timetable_config(&sample_config()).unwrap();
            store.set_battery(42).unwrap();
        }

        let file = JsonFileStore::open(dir.path()).unwrap();
        assert!(file.path().ends_with(STORE_FILE_NAME));
        let store = StatusStore::new(file);
        assert_eq!(store.timetable_config().unwrap(), Some(sample_config()));
        assert_eq!(store.status().unwrap().battery, 42);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STORE_FILE_NAME), "{not json").unwrap();
        assert!(JsonFileStore::open(dir.path()).is_err());
    }

    #[test]
    fn test_failed_write_keeps_previous_value() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = StatusStore::new(JsonFileStore::open(&blocker).unwrap());

        assert!(store.set_timetable_config(&sample_config()).is_err());
        assert_eq!(store.timetable_config().unwrap(), None);
        assert_eq!(store.status().unwrap().battery, -1);
    }
}
