//! Step dispatching for the Chronicle watcher.
//!
//! - [`Dispatcher`] follows the change feed and runs one step at a time.
//! - [`CapabilityTable`] maps each [`OperationKind`](chronicle_core::OperationKind)
//!   this watcher can perform to a [`StepHandler`].
//! - [`StatusReporter`] appends progress/result documents, best-effort.
//! - [`LoadSeriesHandler`] is the built-in `Load` operation.

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod load;
pub mod status;

pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherState, IgnoreReason};
pub use error::{DispatchError, HandlerError};
pub use handler::{CapabilityTable, StepContext, StepHandler};
pub use load::LoadSeriesHandler;
pub use status::{ActiveRequest, StatusReporter};
