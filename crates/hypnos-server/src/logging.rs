//! Logging set-up for the daemon.
//!
//! Two profiles, picked by `HYPNOS_ENV`:
//! - **Development**: pretty stdout. The engine logs at `debug`, so every
//!   connection state change and characteristic write is visible.
//! - **Production**: JSON lines in a daily rolling file plus compact stdout
//!   for the journal. Event fields are flattened so `peripheral`, `epoch`
//!   and `characteristic` are top-level keys that can be filtered on.
//!
//! `RUST_LOG` overrides everything. Otherwise `HYPNOS_LOG_LEVEL` sets the
//! level of the hypnos crates; other crates stay at `warn`.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prefix of the rolling log files, e.g. `hypnos-server.2026-10-19`.
const LOG_FILE_PREFIX: &str = "hypnos-server";

/// Keeps the non-blocking writers flushing until exit.
static GUARDS: OnceLock<[WorkerGuard; 2]> = OnceLock::new();

/// Which output set-up to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogProfile {
    /// Pretty stdout, engine at `debug`.
    Development,
    /// JSON file plus compact stdout, engine at `info`.
    Production,
}

impl LogProfile {
    /// Profile selected by `HYPNOS_ENV`. Anything but `production` means
    /// development.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("HYPNOS_ENV") {
            Ok(env) if env.eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Development,
        }
    }

    const fn engine_level(self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Production => "info",
        }
    }
}

/// Filter directives used when `RUST_LOG` is unset.
///
/// `level` overrides the level of the hypnos crates. Request traces from
/// `tower_http` follow the server level; BlueZ chatter stays at `warn`.
#[must_use]
pub fn default_directives(profile: LogProfile, level: Option<&str>) -> String {
    let engine = level.unwrap_or_else(|| profile.engine_level());
    let server = level.unwrap_or("info");
    format!("warn,hypnos_core={engine},hypnos_server={server},tower_http={server},bluer=warn")
}

/// Install the global subscriber for `profile`.
///
/// # Errors
///
/// Returns an error if the filter does not parse or, in production, the
/// log directory cannot be created.
pub fn init(profile: LogProfile) -> anyhow::Result<()> {
    let level = std::env::var("HYPNOS_LOG_LEVEL").ok();
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(profile, level.as_deref()))?,
    };

    match profile {
        LogProfile::Production => init_production(env_filter),
        LogProfile::Development => {
            init_development(env_filter);
            Ok(())
        }
    }
}

fn init_production(env_filter: EnvFilter) -> anyhow::Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_writer(file_writer)
        .with_target(true);

    // journald adds its own timestamps
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_writer(stdout_writer)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = GUARDS.set([file_guard, stdout_guard]);
    tracing::info!(dir = %log_dir.display(), "File logging enabled");
    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    // CLOSE shows how long each HTTP request span took.
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(false)
        .with_span_events(FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

/// `HYPNOS_LOG_DIR` if set, else the platform default.
fn log_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os("HYPNOS_LOG_DIR") {
        return PathBuf::from(dir);
    }
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/hypnos")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "hypnos")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_development_shows_engine_debug() {
        let directives = default_directives(LogProfile::Development, None);
        assert!(directives.contains("hypnos_core=debug"));
        assert!(directives.contains("hypnos_server=info"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_level_override_applies_to_hypnos_crates() {
        let directives = default_directives(LogProfile::Production, Some("trace"));
        assert!(directives.contains("hypnos_core=trace"));
        assert!(directives.contains("hypnos_server=trace"));
        assert!(directives.contains("bluer=warn"));
    }

    #[test]
    fn test_log_directory_is_named_for_hypnos() {
        let dir = log_directory();
        assert!(!dir.as_os_str().is_empty());
        assert!(dir.to_string_lossy().contains("hypnos") || dir.ends_with("logs"));
    }
}
