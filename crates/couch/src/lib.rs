//! CouchDB access for the Chronicle step watcher.
//!
//! Provides the [`DocumentStore`] seam used by the dispatcher, an HTTP
//! implementation over [`reqwest`] ([`CouchDb`]), the continuous change
//! feed reader ([`ChangeFeed`]), the patient/study/series/instance view
//! helpers ([`ChronicleContext`]), and an in-memory store
//! ([`MemoryStore`]) for tests and offline runs.

pub mod changes;
pub mod client;
pub mod context;
pub mod error;
pub mod memory;
pub mod store;

pub use changes::ChangeFeed;
pub use client::CouchDb;
pub use context::ChronicleContext;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{ChangeLines, DatabaseInfo, DocumentStore, ViewQuery, ViewRow};
