//! Application configuration management.
//!
//! Handles loading, saving, and validating hypnos configuration including:
//! - Bluetooth adapter and known peripherals for auto-connect
//! - Scan eviction interval and platform operation timeout
//! - Timezone used to convert curfews to UTC
//! - HTTP listen address for the daemon
//!
//! The TOML file is layered with `HYPNOS__SECTION__KEY` environment
//! overrides through the `config` crate.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "HYPNOS";

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("MAC address pattern compiles")
});

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The `config` crate failed to read or deserialize the sources.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Radio and peripheral selection.
    pub bluetooth: BluetoothConfig,
    /// Timezone and storage location.
    pub system: SystemConfig,
    /// HTTP surface.
    pub server: ServerConfig,
}

/// `[bluetooth]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter name such as `hci0`. The default adapter when absent.
    pub adapter: Option<String>,

    /// Addresses that are auto-connected when discovered.
    pub known_devices: Vec<String>,

    /// Bonded devices whose name contains this are auto-connected.
    pub bonded_name_filter: String,

    /// Interval at which the discovered-result set is cleared while scanning.
    pub scan_eviction_secs: u64,

    /// Upper bound on any single platform request.
    pub operation_timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            known_devices: Vec::new(),
            bonded_name_filter: "Hypnos".to_string(),
            scan_eviction_secs: 5,
            operation_timeout_secs: 30,
        }
    }
}

impl BluetoothConfig {
    /// Eviction interval as a [`Duration`].
    #[must_use]
    pub const fn scan_eviction_interval(&self) -> Duration {
        Duration::from_secs(self.scan_eviction_secs)
    }

    /// Operation timeout as a [`Duration`].
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// `[system]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// IANA timezone name; curfews are entered in this zone.
    pub timezone: String,

    /// Where the status store lives. Platform default when absent.
    pub data_dir: Option<PathBuf>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            data_dir: None,
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to.
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path` plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or a
    /// load/validation error if it cannot be used.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::build(path, true)
    }

    /// Like [`Config::load`], but falls back to defaults when the file is
    /// missing. Environment overrides still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be parsed or the result
    /// fails validation.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::build(path.as_ref(), false)
    }

    fn build(path: &Path, required: bool) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bluetooth.known_devices"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)?;
        Ok(())
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if let Some(adapter) = &self.bluetooth.adapter {
            if adapter.trim().is_empty() {
                errors.push(invalid("bluetooth.adapter", "must not be empty when set"));
            }
        }
        for address in &self.bluetooth.known_devices {
            if !is_valid_mac_address(address) {
                errors.push(invalid(
                    "bluetooth.known_devices",
                    format!("'{address}' is not in XX:XX:XX:XX:XX:XX format"),
                ));
            }
        }
        if self.bluetooth.scan_eviction_secs == 0 {
            errors.push(invalid("bluetooth.scan_eviction_secs", "must be positive"));
        }
        if self.bluetooth.operation_timeout_secs == 0 {
            errors.push(invalid("bluetooth.operation_timeout_secs", "must be positive"));
        }
        if !is_valid_timezone_format(&self.system.timezone) {
            errors.push(invalid(
                "system.timezone",
                format!("unknown IANA timezone '{}'", self.system.timezone),
            ));
        }
        if self.server.listen.parse::<SocketAddr>().is_err() {
            errors.push(invalid(
                "server.listen",
                format!("'{}' is not a socket address", self.server.listen),
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Parsed timezone. Falls back to UTC for an unvalidated bad name.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.system.timezone.parse().unwrap_or(Tz::UTC)
    }

    /// Directory holding the status store.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.system
            .data_dir
            .clone()
            .unwrap_or_else(default_data_dir)
    }

    /// Default configuration file location.
    ///
    /// On Linux: `/etc/hypnos/config.toml`
    /// Elsewhere: the platform config directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/hypnos/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "hypnos").map_or_else(
                || PathBuf::from("./config.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Default data directory.
///
/// On Linux: `/var/lib/hypnos`
/// Elsewhere: the platform data directory.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/hypnos")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "hypnos")
            .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
    }
}

/// Returns `true` for a `XX:XX:XX:XX:XX:XX` hex address.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Returns `true` for a known IANA timezone name.
#[must_use]
pub fn is_valid_timezone_format(timezone: &str) -> bool {
    timezone.parse::<Tz>().is_ok()
}

/// UTC offset of `tz` at instant `at`.
#[must_use]
pub fn offset_at(tz: Tz, at: DateTime<Utc>) -> FixedOffset {
    at.with_timezone(&tz).offset().fix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bluetooth.bonded_name_filter, "Hypnos");
        assert_eq!(config.bluetooth.scan_eviction_secs, 5);
        assert_eq!(config.bluetooth.operation_timeout(), Duration::from_secs(30));
        assert_eq!(config.timezone(), Tz::UTC);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac_address("aa:bb:cc:dd:ee:ff"));
        assert!(!is_valid_mac_address("AA:BB:CC:DD:EE"));
        assert!(!is_valid_mac_address("AA-BB-CC-DD-EE-FF"));
        assert!(!is_valid_mac_address("GG:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_timezone_validation() {
        assert!(is_valid_timezone_format("Europe/Berlin"));
        assert!(is_valid_timezone_format("UTC"));
        assert!(!is_valid_timezone_format("Mars/Olympus"));
    }

    #[test]
    fn test_offset_follows_dst() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let winter = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let summer = Utc.with_ymd_and_hms(2025, 7, 15, 12, 0, 0).unwrap();
        assert_eq!(offset_at(tz, winter).local_minus_utc(), 3600);
        assert_eq!(offset_at(tz, summer).local_minus_utc(), 7200);
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = Config::default();
        config.bluetooth.known_devices = vec!["nope".to_string()];
        config.system.timezone = "Nowhere/Land".to_string();
        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }

        let mut config = Config::default();
        config.bluetooth.operation_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
        assert!(Config::load_or_default(&path).is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.bluetooth.known_devices = vec!["F1:E2:D3:C4:B5:A6".to_string()];
        config.bluetooth.adapter = Some("hci1".to_string());
        config.system.timezone = "Asia/Kolkata".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.bluetooth.known_devices, config.bluetooth.known_devices);
        assert_eq!(loaded.bluetooth.adapter.as_deref(), Some("hci1"));
        assert_eq!(loaded.system.timezone, "Asia/Kolkata");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[system]\ntimezone = \"America/New_York\"\n").unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.system.timezone, "America/New_York");
        assert_eq!(loaded.bluetooth.scan_eviction_secs, 5);
        assert_eq!(loaded.server.listen, "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[bluetooth]\nscan_eviction_secs = 0\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
