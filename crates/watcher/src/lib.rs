//! Wiring for the `chronicle-watcher` binary.

pub mod config;

use std::sync::Arc;

use chronicle_core::OperationKind;
use chronicle_couch::{CouchDb, StoreError};
use chronicle_dispatch::{CapabilityTable, Dispatcher, LoadSeriesHandler};

pub use config::{ConfigError, WatcherConfig};

/// Operations this binary can perform.
pub fn capabilities(config: &WatcherConfig) -> CapabilityTable {
    CapabilityTable::new().register(
        OperationKind::Load,
        LoadSeriesHandler::new(config.work_dir.clone()),
    )
}

/// Build an idle dispatcher talking to the configured CouchDB.
pub fn build_dispatcher(config: &WatcherConfig) -> Result<Dispatcher, StoreError> {
    let store = CouchDb::with_timeout(
        &config.couchdb_url,
        config.database.clone(),
        config.request_timeout(),
    )?;

    Ok(
        Dispatcher::new(Arc::new(store), capabilities(config), config.identity.clone())
            .with_shutdown_grace(config.shutdown_grace()),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use assert_matches::assert_matches;
    use chronicle_dispatch::DispatcherState;

    use super::*;

    fn config(url: &str) -> WatcherConfig {
        WatcherConfig::from_lookup(|var| match var {
            "COUCHDB_URL" => Some(url.to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn registers_load_only() {
        let table = capabilities(&config("http://localhost:5984"));
        assert_eq!(table.operations(), HashSet::from([OperationKind::Load]));
    }

    #[tokio::test]
    async fn dispatcher_starts_idle() {
        let dispatcher = build_dispatcher(&config("http://localhost:5984")).unwrap();
        assert_eq!(dispatcher.state().await, DispatcherState::Idle);
    }

    #[test]
    fn bad_url_is_rejected() {
        assert_matches!(
            build_dispatcher(&config("mailto:admin@example.com")).err(),
            Some(StoreError::InvalidUrl(_))
        );
    }
}
