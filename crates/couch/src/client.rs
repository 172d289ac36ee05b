//! HTTP client for a single CouchDB database.
//!
//! Wraps the CouchDB document, attachment, view and `_changes`
//! endpoints using [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use chronicle_core::{DocumentRef, Sequence};
use futures::TryStreamExt;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tokio_util::io::StreamReader;

use crate::error::StoreError;
use crate::store::{
    ChangeLines, DatabaseInfo, DocumentStore, ViewQuery, ViewResponse, ViewRow, HEARTBEAT_MS,
};

/// Default timeout for document, attachment and view requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for one database on a CouchDB server.
pub struct CouchDb {
    /// Client for bounded requests.
    client: reqwest::Client,
    /// Client for the continuous feed, which has no overall deadline.
    feed_client: reqwest::Client,
    server_url: Url,
    database: String,
}

impl CouchDb {
    /// Create a client for `database` on the server at `server_url`
    /// (e.g. `http://localhost:5984`).
    pub fn new(server_url: &str, database: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_timeout(server_url, database, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Like [`new`](Self::new) with a custom per-request timeout.
    pub fn with_timeout(
        server_url: &str,
        database: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let server_url =
            Url::parse(server_url).map_err(|e| StoreError::InvalidUrl(format!("{server_url}: {e}")))?;
        if server_url.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(server_url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let feed_client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            feed_client,
            server_url,
            database: database.into(),
        })
    }

    /// Name of the database this client addresses.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Database URL, e.g. `http://localhost:5984/chronicle`.
    pub fn database_url(&self) -> String {
        // A base URL was validated in the constructor.
        self.url(&[]).map(|u| u.to_string()).unwrap_or_default()
    }

    // ---- private helpers ----

    /// Build `<server>/<db>/<segments...>`, percent-encoding each segment.
    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.server_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidUrl(self.server_url.to_string()))?;
            path.pop_if_empty().push(&self.database);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    /// Map non-2xx responses onto [`StoreError`] variants.
    async fn ensure_success(
        response: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(what.to_string()),
            StatusCode::CONFLICT => StoreError::Conflict(what.to_string()),
            _ => StoreError::Api {
                status: status.as_u16(),
                body,
            },
        })
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, StoreError> {
        let response = Self::ensure_success(response, what).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl DocumentStore for CouchDb {
    async fn info(&self) -> Result<DatabaseInfo, StoreError> {
        let response = self.client.get(self.url(&[])?).send().await?;
        Self::parse_response(response, &self.database).await
    }

    async fn get_document(&self, id: &str) -> Result<Value, StoreError> {
        let response = self.client.get(self.url(&[id])?).send().await?;
        Self::parse_response(response, id).await
    }

    async fn put_document(&self, id: &str, doc: &Value) -> Result<DocumentRef, StoreError> {
        let response = self.client.put(self.url(&[id])?).json(doc).send().await?;
        Self::parse_response(response, id).await
    }

    async fn create_document(&self, doc: &Value) -> Result<DocumentRef, StoreError> {
        let response = self.client.post(self.url(&[])?).json(doc).send().await?;
        Self::parse_response(response, &self.database).await
    }

    async fn put_attachment(
        &self,
        doc: &DocumentRef,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<DocumentRef, StoreError> {
        let response = self
            .client
            .put(self.url(&[doc.id.as_str(), name])?)
            .query(&[("rev", doc.rev.as_str())])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;
        Self::parse_response(response, &doc.id).await
    }

    async fn get_attachment(&self, id: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.client.get(self.url(&[id, name])?).send().await?;
        let response = Self::ensure_success(response, &format!("{id}/{name}")).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn query_view(&self, query: &ViewQuery) -> Result<Vec<ViewRow>, StoreError> {
        let response = self
            .client
            .get(self.url(&query.path_segments())?)
            .query(&query.query_pairs())
            .send()
            .await?;
        let view: ViewResponse =
            Self::parse_response(response, &format!("{}/{}", query.design, query.view)).await?;
        Ok(view.rows)
    }

    async fn open_changes(&self, since: &Sequence) -> Result<ChangeLines, StoreError> {
        let since = since.to_string();
        let heartbeat = HEARTBEAT_MS.to_string();
        let response = self
            .feed_client
            .get(self.url(&["_changes"])?)
            .query(&[
                ("feed", "continuous"),
                ("since", since.as_str()),
                ("heartbeat", heartbeat.as_str()),
            ])
            .send()
            .await?;
        let response = Self::ensure_success(response, "_changes").await?;

        let body = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_document_urls() {
        let db = CouchDb::new("http://localhost:5984", "chronicle").unwrap();
        assert_eq!(db.database_url(), "http://localhost:5984/chronicle");
        assert_eq!(
            db.url(&["1.2.840.113619"]).unwrap().as_str(),
            "http://localhost:5984/chronicle/1.2.840.113619"
        );
    }

    #[test]
    fn trailing_slash_on_server_url_is_ignored() {
        let db = CouchDb::new("http://couch.example:5984/", "chronicle").unwrap();
        assert_eq!(
            db.url(&["doc", "object.dcm"]).unwrap().as_str(),
            "http://couch.example:5984/chronicle/doc/object.dcm"
        );
    }

    #[test]
    fn view_path_segments_are_kept_separate() {
        let db = CouchDb::new("http://localhost:5984", "chronicle").unwrap();
        let query = ViewQuery::new("instances", "context");
        assert_eq!(
            db.url(&query.path_segments()).unwrap().as_str(),
            "http://localhost:5984/chronicle/_design/instances/_view/context"
        );
    }

    #[test]
    fn invalid_server_url_is_rejected() {
        assert!(matches!(
            CouchDb::new("not a url", "chronicle"),
            Err(StoreError::InvalidUrl(_))
        ));
        assert!(matches!(
            CouchDb::new("mailto:someone@example.com", "chronicle"),
            Err(StoreError::InvalidUrl(_))
        ));
    }
}
