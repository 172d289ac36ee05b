//! The operation handler contract and the capability table.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::{DocumentRef, OperationKind, StatusKind, StepDocument};
use chronicle_couch::DocumentStore;

use crate::error::HandlerError;
use crate::status::{ActiveRequest, StatusReporter};

/// Everything a handler may touch while working on one step.
///
/// Each dispatched step gets its own context, so status documents are
/// tagged with that step's id even if the handler outlives the dispatch.
#[derive(Clone)]
pub struct StepContext {
    pub request_id: String,
    pub reporter: StatusReporter,
    pub store: Arc<dyn DocumentStore>,
}

impl StepContext {
    pub fn new(request_id: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        let request_id = request_id.into();
        let reporter = StatusReporter::new(
            Arc::clone(&store),
            ActiveRequest::with_id(request_id.clone()),
        );
        Self {
            request_id,
            reporter,
            store,
        }
    }

    /// Post a `progress` status.
    pub async fn progress(&self, message: impl Into<String>) -> Option<DocumentRef> {
        self.reporter.post_status(StatusKind::Progress, message).await
    }

    /// Post the `result` status. Handlers call this exactly once.
    pub async fn result(&self, message: impl Into<String>) -> Option<DocumentRef> {
        self.reporter.post_status(StatusKind::Result, message).await
    }
}

/// An operation this watcher can perform.
///
/// Handlers report progress through [`StepContext`] and finish with one
/// `result` status carrying either the outcome or the failure reason.
/// Returning `Err` (or panicking) is caught and logged by the dispatcher.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, step: StepDocument, ctx: StepContext) -> Result<(), HandlerError>;
}

/// Handlers keyed by operation. Fixed once handed to the dispatcher.
#[derive(Clone, Default)]
pub struct CapabilityTable {
    handlers: HashMap<OperationKind, Arc<dyn StepHandler>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the handler for `kind`.
    pub fn register<H>(mut self, kind: OperationKind, handler: H) -> Self
    where
        H: StepHandler + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn get(&self, kind: OperationKind) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// The set of operations with a registered handler.
    pub fn operations(&self) -> HashSet<OperationKind> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("CapabilityTable")
            .field("operations", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StepHandler for Noop {
        async fn execute(&self, _step: StepDocument, _ctx: StepContext) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn register_builds_operation_set() {
        let table = CapabilityTable::new()
            .register(OperationKind::Load, Noop)
            .register(OperationKind::Segment, Noop);

        assert_eq!(table.len(), 2);
        assert!(table.get(OperationKind::Load).is_some());
        assert!(table.get(OperationKind::ChronicleStudyRender).is_none());
        assert_eq!(
            table.operations(),
            HashSet::from([OperationKind::Load, OperationKind::Segment])
        );
        assert_eq!(
            format!("{table:?}"),
            r#"CapabilityTable { operations: ["Load", "Segment"] }"#
        );
    }

    #[test]
    fn empty_table() {
        let table = CapabilityTable::new();
        assert!(table.is_empty());
        assert!(table.operations().is_empty());
    }
}
