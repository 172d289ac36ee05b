use chronicle_core::ChronicleError;

/// Errors from the document store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// CouchDB returned a non-2xx status code other than 404/409.
    #[error("CouchDB error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The document or attachment does not exist (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The write carried a stale `_rev` (HTTP 409).
    #[error("Document update conflict: {0}")]
    Conflict(String),

    /// The configured server URL cannot address documents.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A response or document body did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for ChronicleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ChronicleError::NotFound(what),
            StoreError::Conflict(what) => ChronicleError::Conflict(what),
            other => ChronicleError::Store(other.to_string()),
        }
    }
}
