//! The document store seam and its request/response types.

use std::pin::Pin;

use async_trait::async_trait;
use chronicle_core::{DocumentRef, Sequence};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncBufRead;

use crate::error::StoreError;

/// Heartbeat interval requested from the continuous change feed.
pub const HEARTBEAT_MS: u64 = 5000;

/// Body of a continuous change feed, read line by line.
pub type ChangeLines = Pin<Box<dyn AsyncBufRead + Send>>;

/// Subset of `GET /<db>` used by the watcher.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseInfo {
    pub db_name: String,
    pub update_seq: Sequence,
}

/// One row of a map/reduce view result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewRow {
    /// Source document id; absent for reduced rows.
    #[serde(default)]
    pub id: Option<String>,
    pub key: Value,
    pub value: Value,
}

/// View response envelope. A response without `rows` means no rows.
#[derive(Debug, Deserialize)]
pub(crate) struct ViewResponse {
    #[serde(default)]
    pub rows: Vec<ViewRow>,
}

/// A `_design/<group>/_view/<name>` query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewQuery {
    pub design: String,
    pub view: String,
    pub reduce: Option<bool>,
    pub group_level: Option<u32>,
    pub key: Option<Value>,
    pub startkey: Option<Value>,
    pub endkey: Option<Value>,
    pub stale: Option<String>,
}

impl ViewQuery {
    pub fn new(design: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            design: design.into(),
            view: view.into(),
            ..Default::default()
        }
    }

    pub fn reduce(mut self, reduce: bool) -> Self {
        self.reduce = Some(reduce);
        self
    }

    pub fn group_level(mut self, level: u32) -> Self {
        self.group_level = Some(level);
        self
    }

    pub fn key(mut self, key: Value) -> Self {
        self.key = Some(key);
        self
    }

    /// Restrict to keys that start with the `prefix` array.
    ///
    /// CouchDB collates objects after every other type, so appending `{}`
    /// to the prefix gives an end key past all of its children.
    pub fn prefix(mut self, prefix: &Value) -> Self {
        let mut end = match prefix {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        end.push(Value::Object(Default::default()));
        self.startkey = Some(prefix.clone());
        self.endkey = Some(Value::Array(end));
        self
    }

    pub fn stale(mut self, stale: impl Into<String>) -> Self {
        self.stale = Some(stale.into());
        self
    }

    /// Path below the database URL.
    pub fn path_segments(&self) -> [&str; 4] {
        ["_design", &self.design, "_view", &self.view]
    }

    /// Query string parameters; JSON keys are JSON-encoded.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(reduce) = self.reduce {
            pairs.push(("reduce", reduce.to_string()));
        }
        if let Some(level) = self.group_level {
            pairs.push(("group_level", level.to_string()));
        }
        if let Some(key) = &self.key {
            pairs.push(("key", key.to_string()));
        }
        if let Some(start) = &self.startkey {
            pairs.push(("startkey", start.to_string()));
        }
        if let Some(end) = &self.endkey {
            pairs.push(("endkey", end.to_string()));
        }
        if let Some(stale) = &self.stale {
            pairs.push(("stale", stale.clone()));
        }
        pairs
    }
}

/// Document database operations needed by the watcher.
///
/// Implementations must be `Send + Sync + 'static` so a single store can
/// be shared by the change feed, the dispatcher, and running handlers.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Database name and current update sequence.
    async fn info(&self) -> Result<DatabaseInfo, StoreError>;

    /// Fetch a document, including `_id` and `_rev`.
    ///
    /// Returns `Err(StoreError::NotFound)` for missing or deleted documents.
    async fn get_document(&self, id: &str) -> Result<Value, StoreError>;

    /// Create or update a document under `id`.
    ///
    /// Updates must carry the current `_rev`; a stale revision yields
    /// `Err(StoreError::Conflict)`.
    async fn put_document(&self, id: &str, doc: &Value) -> Result<DocumentRef, StoreError>;

    /// Create a document with a server-assigned id.
    async fn create_document(&self, doc: &Value) -> Result<DocumentRef, StoreError>;

    /// Upload a binary attachment to an existing document revision.
    async fn put_attachment(
        &self,
        doc: &DocumentRef,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<DocumentRef, StoreError>;

    /// Download a binary attachment.
    async fn get_attachment(&self, id: &str, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Run a map/reduce view query.
    async fn query_view(&self, query: &ViewQuery) -> Result<Vec<ViewRow>, StoreError>;

    /// Open the continuous change feed starting after `since`.
    async fn open_changes(&self, since: &Sequence) -> Result<ChangeLines, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefix_appends_object_to_end_key() {
        let query = ViewQuery::new("instances", "context").prefix(&json!(["Inst", "MRN"]));
        assert_eq!(query.startkey, Some(json!(["Inst", "MRN"])));
        assert_eq!(query.endkey, Some(json!(["Inst", "MRN", {}])));
    }

    #[test]
    fn query_pairs_encode_json_keys() {
        let query = ViewQuery::new("instances", "seriesInstances")
            .reduce(false)
            .key(json!("1.2.3"));
        assert_eq!(
            query.query_pairs(),
            vec![("reduce", "false".to_string()), ("key", "\"1.2.3\"".to_string())]
        );
    }

    #[test]
    fn query_pairs_for_grouped_range() {
        let query = ViewQuery::new("instances", "context")
            .reduce(true)
            .group_level(2)
            .prefix(&json!([["Inst", "MRN"]]))
            .stale("update_after");
        let pairs = query.query_pairs();
        assert_eq!(pairs[0], ("reduce", "true".to_string()));
        assert_eq!(pairs[1], ("group_level", "2".to_string()));
        assert_eq!(pairs[2], ("startkey", r#"[["Inst","MRN"]]"#.to_string()));
        assert_eq!(pairs[3], ("endkey", r#"[["Inst","MRN"],{}]"#.to_string()));
        assert_eq!(pairs[4], ("stale", "update_after".to_string()));
    }

    #[test]
    fn view_response_without_rows_is_empty() {
        let response: ViewResponse = serde_json::from_str(r#"{"error":"x"}"#).unwrap();
        assert!(response.rows.is_empty());
    }
}
