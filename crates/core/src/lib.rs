//! Domain types and pure logic for the Chronicle step watcher.
//!
//! Nothing in this crate performs I/O. The CouchDB client lives in
//! `chronicle-couch` and the dispatcher in `chronicle-dispatch`.

pub mod capability;
pub mod error;
pub mod types;
pub mod wildcard;

pub use capability::{can_perform_step, AppIdentity};
pub use error::ChronicleError;
pub use types::{
    ChangeEvent, DocumentRef, OperationKind, ProvenanceSpec, Sequence, StatusDocument, StatusKind,
    StepDocument, StepStatus,
};
