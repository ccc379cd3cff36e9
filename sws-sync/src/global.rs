//! Optional process-wide engine.
//!
//! Applications that want a single ambient engine call [`initialize`] once
//! at startup and [`instance`] anywhere else. Everything else in the crate
//! works on explicit [`SyncEngine`] handles.

use std::sync::{Arc, OnceLock};

use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::transport::{Connector, WebSocketConnector};

static ENGINE: OnceLock<SyncEngine> = OnceLock::new();

/// Create and start the global engine.
///
/// Later calls ignore `config` and return the engine created by the first.
pub fn initialize(config: SyncConfig) -> Result<SyncEngine, SyncError> {
    initialize_with(config, Arc::new(WebSocketConnector))
}

/// [`initialize`] with a custom transport.
pub fn initialize_with(
    config: SyncConfig,
    connector: Arc<dyn Connector>,
) -> Result<SyncEngine, SyncError> {
    if let Some(engine) = ENGINE.get() {
        log::info!("Global sync engine already initialized");
        return Ok(engine.clone());
    }
    let created = SyncEngine::with_connector(config, connector)?;
    let engine = ENGINE.get_or_init(|| created).clone();
    engine.start()?;
    Ok(engine)
}

/// The global engine, if [`initialize`] has run.
pub fn instance() -> Option<SyncEngine> {
    ENGINE.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;

    // The only test in this crate that touches the global.
    #[tokio::test]
    async fn test_initialize_once() {
        assert!(instance().is_none());

        let (connector, _listener) = MemoryConnector::new();
        let first = initialize_with(SyncConfig::for_host("a.local"), Arc::new(connector)).unwrap();
        let (connector, _listener) = MemoryConnector::new();
        let second = initialize_with(SyncConfig::for_host("b.local"), Arc::new(connector)).unwrap();

        assert!(SyncEngine::ptr_eq(&first, &second));
        assert_eq!(second.config().server_url, "ws://a.local:50080");
        assert!(instance().is_some_and(|engine| SyncEngine::ptr_eq(&engine, &first)));
    }
}
