//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;

use hypnos_core::{Config, ProtocolFacade, StatusStore};
use tokio::sync::RwLock;

/// State handed to every handler.
pub type SharedState = Arc<RwLock<AppState>>;

/// Everything the HTTP layer needs to serve a request.
///
/// The facade and the store are cheap handles; clone them out of the lock
/// before awaiting a protocol command so a slow connect never blocks other
/// requests.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the protocol engine.
    pub facade: ProtocolFacade,
    /// Persisted timetable and device status.
    pub store: StatusStore,
    /// Loaded configuration.
    pub config: Config,
    /// Where the configuration was loaded from.
    pub config_path: PathBuf,
}

impl AppState {
    /// Bundle the running engine with its configuration.
    #[must_use]
    pub const fn new(
        facade: ProtocolFacade,
        store: StatusStore,
        config: Config,
        config_path: PathBuf,
    ) -> Self {
        Self {
            facade,
            store,
            config,
            config_path,
        }
    }

    /// Wrap into the handle the router is built with.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }
}
