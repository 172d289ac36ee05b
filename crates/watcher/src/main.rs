//! `chronicle-watcher` -- headless step watcher for a Chronicle CouchDB.
//!
//! Follows the database's change feed, performs the `open` steps whose
//! desired provenance matches this watcher, and writes progress/result
//! status documents back. Runs until Ctrl-C.
//!
//! # Environment variables
//!
//! | Variable               | Default                 | Description                         |
//! |------------------------|-------------------------|-------------------------------------|
//! | `COUCHDB_URL`          | `http://localhost:5984` | CouchDB server root                 |
//! | `COUCHDB_DATABASE`     | `chronicle`             | Database to watch                   |
//! | `APP_NAME`             | `3D Slicer`             | Application name matched by steps   |
//! | `APP_VERSION`          | `4.3.1`                 | Application version matched by steps|
//! | `WORK_DIR`             | `<temp>/chronicle`      | Where loaded series are written     |
//! | `REQUEST_TIMEOUT_SECS` | `30`                    | Document/view request timeout       |
//! | `SHUTDOWN_GRACE_SECS`  | `5`                     | Wait for an in-flight step on exit  |

use chronicle_watcher::{build_dispatcher, WatcherConfig};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "chronicle_watcher=info,chronicle_dispatch=info,chronicle_couch=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WatcherConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        couchdb_url = %config.couchdb_url,
        database = %config.database,
        application = %config.identity.application,
        version = %config.identity.version,
        work_dir = %config.work_dir.display(),
        "Starting chronicle-watcher",
    );

    let mut dispatcher = build_dispatcher(&config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Could not create CouchDB client");
        std::process::exit(1);
    });

    if dispatcher.start().await.is_err() {
        // Already logged by the dispatcher.
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }

    tracing::info!("Shutting down");
    dispatcher.stop().await;
}
