//! Best-effort progress and result reporting.
//!
//! Status documents are diagnostics for the requester, not part of a
//! handler's result: a failed write is logged and swallowed so that an
//! unreachable database never aborts the work itself.

use std::sync::Arc;

use chronicle_core::{DocumentRef, StatusDocument, StatusKind};
use chronicle_couch::DocumentStore;
use tokio::sync::RwLock;

/// Shared handle on the id of the step currently being worked on.
#[derive(Debug, Clone, Default)]
pub struct ActiveRequest {
    inner: Arc<RwLock<Option<String>>>,
}

impl ActiveRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle already set to `request_id`.
    pub fn with_id(request_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(request_id.into()))),
        }
    }

    pub async fn get(&self) -> Option<String> {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, request_id: impl Into<String>) {
        *self.inner.write().await = Some(request_id.into());
    }

    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }

    /// Clear only if `request_id` is still the active one.
    pub async fn clear_if(&self, request_id: &str) {
        let mut active = self.inner.write().await;
        if active.as_deref() == Some(request_id) {
            *active = None;
        }
    }
}

/// Appends [`StatusDocument`]s tagged with the active request.
#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn DocumentStore>,
    active: ActiveRequest,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn DocumentStore>, active: ActiveRequest) -> Self {
        Self { store, active }
    }

    /// The request handle whose value tags every written document.
    pub fn active_request(&self) -> &ActiveRequest {
        &self.active
    }

    /// Write a status document. Returns its id and revision, or `None`
    /// if the write failed (the failure is logged).
    pub async fn post_status(
        &self,
        kind: StatusKind,
        message: impl Into<String>,
    ) -> Option<DocumentRef> {
        let request_id = self.active.get().await;
        let doc = StatusDocument::new(request_id.clone(), kind, message);

        let body = match serde_json::to_value(&doc) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode status document");
                return None;
            }
        };

        match self.store.create_document(&body).await {
            Ok(written) => {
                tracing::debug!(
                    request_id = ?request_id,
                    status_id = %written.id,
                    kind = ?kind,
                    "Status posted",
                );
                Some(written)
            }
            Err(e) => {
                tracing::warn!(
                    request_id = ?request_id,
                    kind = ?kind,
                    error = %e,
                    "Failed to post status",
                );
                None
            }
        }
    }

    /// Write a status document and attach `data` to it.
    ///
    /// If only the attachment upload fails, the reference to the bare
    /// status document is returned.
    pub async fn post_status_with_attachment(
        &self,
        kind: StatusKind,
        message: impl Into<String>,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Option<DocumentRef> {
        let written = self.post_status(kind, message).await?;
        match self
            .store
            .put_attachment(&written, name, content_type, data)
            .await
        {
            Ok(updated) => Some(updated),
            Err(e) => {
                tracing::warn!(
                    status_id = %written.id,
                    attachment = name,
                    error = %e,
                    "Failed to attach to status document",
                );
                Some(written)
            }
        }
    }
}
