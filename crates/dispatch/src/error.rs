use chronicle_core::ChronicleError;
use chronicle_couch::StoreError;

/// Failure of a step handler. Caught and logged at the dispatch boundary.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The step document lacks a field the operation needs.
    #[error("Malformed step: {0}")]
    MalformedStep(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

impl From<ChronicleError> for HandlerError {
    fn from(err: ChronicleError) -> Self {
        match err {
            ChronicleError::MalformedDocument(msg) => HandlerError::MalformedStep(msg),
            ChronicleError::Io(e) => HandlerError::Io(e),
            other => HandlerError::Failed(other.to_string()),
        }
    }
}

/// Errors surfaced by [`Dispatcher`](crate::Dispatcher) lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The change feed could not be opened; the dispatcher stays idle.
    #[error("Failed to open change feed: {0}")]
    Feed(#[from] StoreError),
}
