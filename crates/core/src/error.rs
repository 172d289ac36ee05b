#[derive(Debug, thiserror::Error)]
pub enum ChronicleError {
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
