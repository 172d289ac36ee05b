use std::path::PathBuf;
use std::time::Duration;

use chronicle_core::capability::{DEFAULT_APPLICATION, DEFAULT_VERSION};
use chronicle_core::AppIdentity;

/// Invalid value in the environment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// Watcher configuration loaded from environment variables.
///
/// Every field has a default suitable for a local CouchDB.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherConfig {
    /// CouchDB server root (default: `http://localhost:5984`).
    pub couchdb_url: String,
    /// Database holding steps, status documents and instances (default: `chronicle`).
    pub database: String,
    /// Application name and version matched against step provenance.
    pub identity: AppIdentity,
    /// Where the `Load` handler writes fetched series.
    pub work_dir: PathBuf,
    /// Timeout for document and view requests (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for an in-flight handler (default: `5`).
    pub shutdown_grace_secs: u64,
}

impl WatcherConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                  |
    /// |------------------------|--------------------------|
    /// | `COUCHDB_URL`          | `http://localhost:5984`  |
    /// | `COUCHDB_DATABASE`     | `chronicle`              |
    /// | `APP_NAME`             | `3D Slicer`              |
    /// | `APP_VERSION`          | `4.3.1`                  |
    /// | `WORK_DIR`             | `<temp dir>/chronicle`   |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                     |
    /// | `SHUTDOWN_GRACE_SECS`  | `5`                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |var: &'static str, default: &str| -> Result<String, ConfigError> {
            let value = lookup(var).unwrap_or_else(|| default.to_string());
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(ConfigError::Empty { var });
            }
            Ok(value)
        };
        let number = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { var, value }),
            }
        };

        let couchdb_url = text("COUCHDB_URL", "http://localhost:5984")?;
        let database = text("COUCHDB_DATABASE", "chronicle")?;
        let identity = AppIdentity::new(
            text("APP_NAME", DEFAULT_APPLICATION)?,
            text("APP_VERSION", DEFAULT_VERSION)?,
        );
        let work_dir = match lookup("WORK_DIR").filter(|dir| !dir.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir.trim()),
            None => std::env::temp_dir().join("chronicle"),
        };
        let request_timeout_secs = number("REQUEST_TIMEOUT_SECS", 30)?;
        let shutdown_grace_secs = number("SHUTDOWN_GRACE_SECS", 5)?;

        Ok(Self {
            couchdb_url,
            database,
            identity,
            work_dir,
            request_timeout_secs,
            shutdown_grace_secs,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WatcherConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WatcherConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.couchdb_url, "http://localhost:5984");
        assert_eq!(config.database, "chronicle");
        assert_eq!(config.identity, AppIdentity::default());
        assert_eq!(config.work_dir, std::env::temp_dir().join("chronicle"));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("COUCHDB_URL", "http://couch.internal:5984/"),
            ("COUCHDB_DATABASE", "trial-7"),
            ("APP_NAME", "Segmenter"),
            ("APP_VERSION", "5.0.0"),
            ("WORK_DIR", "/var/lib/chronicle"),
            ("REQUEST_TIMEOUT_SECS", " 10 "),
            ("SHUTDOWN_GRACE_SECS", "0"),
        ])
        .unwrap();

        assert_eq!(config.couchdb_url, "http://couch.internal:5984/");
        assert_eq!(config.database, "trial-7");
        assert_eq!(config.identity, AppIdentity::new("Segmenter", "5.0.0"));
        assert_eq!(config.work_dir, PathBuf::from("/var/lib/chronicle"));
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.shutdown_grace_secs, 0);
    }

    #[test]
    fn invalid_number_is_an_error() {
        assert_matches!(
            load(&[("REQUEST_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::InvalidNumber { var: "REQUEST_TIMEOUT_SECS", .. })
        );
        assert_matches!(
            load(&[("SHUTDOWN_GRACE_SECS", "-1")]),
            Err(ConfigError::InvalidNumber { var: "SHUTDOWN_GRACE_SECS", .. })
        );
    }

    #[test]
    fn blank_database_is_an_error() {
        assert_eq!(
            load(&[("COUCHDB_DATABASE", "  ")]),
            Err(ConfigError::Empty { var: "COUCHDB_DATABASE" })
        );
    }
}
