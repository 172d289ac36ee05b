//! In-memory [`DocumentStore`] for tests and offline runs.
//!
//! Mirrors the CouchDB behaviour the watcher relies on: revision
//! checking with 409 conflicts, a monotonically increasing update
//! sequence, attachments, and a continuous feed that emits one JSON line
//! per mutation made after the feed was opened. Views serve canned map
//! rows per `(design, view)`, sorted by CouchDB key collation and
//! filtered by `key` or the `startkey`/`endkey` range. A `reduce=true`
//! query groups rows by `group_level` and counts them, like `_count`.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chronicle_core::{DocumentRef, Sequence};
use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::{ChangeLines, DatabaseInfo, DocumentStore, ViewQuery, ViewRow};

/// Buffer size of each in-memory feed pipe.
const FEED_BUFFER_BYTES: usize = 1 << 20;

struct StoredDocument {
    body: Value,
    generation: u64,
    attachments: HashMap<String, (String, Vec<u8>)>,
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, StoredDocument>,
    update_seq: u64,
    views: HashMap<(String, String), Vec<ViewRow>>,
    feeds: Vec<DuplexStream>,
    offline: bool,
}

/// A single in-memory database.
pub struct MemoryStore {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Make every operation fail as if the server were unreachable.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Register the rows returned for a view.
    pub async fn register_view(&self, design: &str, view: &str, rows: Vec<ViewRow>) {
        self.state
            .lock()
            .await
            .views
            .insert((design.to_string(), view.to_string()), rows);
    }

    /// Write a heartbeat (empty line) to every open feed.
    pub async fn heartbeat(&self) {
        let mut state = self.state.lock().await;
        broadcast_line(&mut state.feeds, "").await;
    }

    /// Write a raw line to every open feed.
    pub async fn push_feed_line(&self, line: &str) {
        let mut state = self.state.lock().await;
        broadcast_line(&mut state.feeds, line).await;
    }

    /// Close every open feed, as a server restart would.
    pub async fn close_feeds(&self) {
        self.state.lock().await.feeds.clear();
    }

    /// All documents whose `type` field equals `doc_type`.
    pub async fn documents_of_type(&self, doc_type: &str) -> Vec<Value> {
        self.state
            .lock()
            .await
            .documents
            .values()
            .filter(|doc| doc.body.get("type").and_then(Value::as_str) == Some(doc_type))
            .map(|doc| doc.body.clone())
            .collect()
    }

    pub async fn document_count(&self) -> usize {
        self.state.lock().await.documents.len()
    }

    /// Store a document, checking `_rev`, and announce it on the feeds.
    async fn write(&self, id: &str, doc: &Value) -> Result<DocumentRef, StoreError> {
        let mut state = self.state.lock().await;
        ensure_online(&state)?;

        let mut body = match doc {
            Value::Object(map) => map.clone(),
            _ => {
                return Err(StoreError::Api {
                    status: 400,
                    body: "Document must be a JSON object".into(),
                })
            }
        };
        let supplied_rev = body.get("_rev").and_then(Value::as_str).map(str::to_string);

        let (generation, attachments) = match state.documents.remove(id) {
            Some(existing) => {
                let current_rev = existing.body.get("_rev").and_then(Value::as_str);
                if supplied_rev.as_deref() != current_rev {
                    state.documents.insert(id.to_string(), existing);
                    return Err(StoreError::Conflict(id.to_string()));
                }
                (existing.generation + 1, existing.attachments)
            }
            None if supplied_rev.is_some() => return Err(StoreError::Conflict(id.to_string())),
            None => (1, HashMap::new()),
        };

        let rev = new_revision(generation);
        body.insert("_id".into(), Value::String(id.to_string()));
        body.insert("_rev".into(), Value::String(rev.clone()));
        state.documents.insert(
            id.to_string(),
            StoredDocument {
                body: Value::Object(body),
                generation,
                attachments,
            },
        );

        announce(&mut state, id, &rev).await;
        Ok(DocumentRef {
            id: id.to_string(),
            rev,
        })
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn info(&self) -> Result<DatabaseInfo, StoreError> {
        let state = self.state.lock().await;
        ensure_online(&state)?;
        Ok(DatabaseInfo {
            db_name: self.name.clone(),
            update_seq: Sequence::Number(state.update_seq),
        })
    }

    async fn get_document(&self, id: &str) -> Result<Value, StoreError> {
        let state = self.state.lock().await;
        ensure_online(&state)?;
        state
            .documents
            .get(id)
            .map(|doc| doc.body.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn put_document(&self, id: &str, doc: &Value) -> Result<DocumentRef, StoreError> {
        self.write(id, doc).await
    }

    async fn create_document(&self, doc: &Value) -> Result<DocumentRef, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.write(&id, doc).await
    }

    async fn put_attachment(
        &self,
        doc: &DocumentRef,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<DocumentRef, StoreError> {
        let mut state = self.state.lock().await;
        ensure_online(&state)?;

        let stored = state
            .documents
            .get_mut(&doc.id)
            .ok_or_else(|| StoreError::NotFound(doc.id.clone()))?;
        if stored.body.get("_rev").and_then(Value::as_str) != Some(doc.rev.as_str()) {
            return Err(StoreError::Conflict(doc.id.clone()));
        }

        stored.generation += 1;
        let rev = new_revision(stored.generation);
        stored
            .attachments
            .insert(name.to_string(), (content_type.to_string(), data));
        if let Value::Object(body) = &mut stored.body {
            body.insert("_rev".into(), Value::String(rev.clone()));
        }

        announce(&mut state, &doc.id, &rev).await;
        Ok(DocumentRef {
            id: doc.id.clone(),
            rev,
        })
    }

    async fn get_attachment(&self, id: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.state.lock().await;
        ensure_online(&state)?;
        state
            .documents
            .get(id)
            .and_then(|doc| doc.attachments.get(name))
            .map(|(_, data)| data.clone())
            .ok_or_else(|| StoreError::NotFound(format!("{id}/{name}")))
    }

    async fn query_view(&self, query: &ViewQuery) -> Result<Vec<ViewRow>, StoreError> {
        let state = self.state.lock().await;
        ensure_online(&state)?;
        let rows = state
            .views
            .get(&(query.design.clone(), query.view.clone()))
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", query.design, query.view)))?;

        let mut matched: Vec<ViewRow> = rows
            .iter()
            .filter(|row| in_range(&row.key, query))
            .cloned()
            .collect();
        matched.sort_by(|a, b| collate(&a.key, &b.key));

        if query.reduce == Some(true) {
            return Ok(reduce_count(matched, query.group_level));
        }
        Ok(matched)
    }

    async fn open_changes(&self, _since: &Sequence) -> Result<ChangeLines, StoreError> {
        let mut state = self.state.lock().await;
        ensure_online(&state)?;
        let (writer, reader) = tokio::io::duplex(FEED_BUFFER_BYTES);
        state.feeds.push(writer);
        Ok(Box::pin(BufReader::new(reader)))
    }
}

// ---- private helpers ----

/// CouchDB view collation: null, false, true, numbers, strings, arrays
/// (element-wise), objects.
fn collate(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(false) => 1,
            Value::Bool(true) => 2,
            Value::Number(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| collate(l, r))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn in_range(key: &Value, query: &ViewQuery) -> bool {
    if let Some(exact) = &query.key {
        return key == exact;
    }
    let after_start = query
        .startkey
        .as_ref()
        .map_or(true, |start| collate(key, start).is_ge());
    let before_end = query
        .endkey
        .as_ref()
        .map_or(true, |end| collate(key, end).is_le());
    after_start && before_end
}

/// Group sorted rows by their key truncated to `group_level` and count
/// each group. Without a level everything reduces to one row.
fn reduce_count(rows: Vec<ViewRow>, group_level: Option<u32>) -> Vec<ViewRow> {
    let group_key = |key: &Value| match (group_level, key) {
        (None, _) => Value::Null,
        (Some(level), Value::Array(items)) => {
            Value::Array(items.iter().take(level as usize).cloned().collect())
        }
        (Some(_), other) => other.clone(),
    };

    let mut reduced: Vec<ViewRow> = Vec::new();
    for row in rows {
        let key = group_key(&row.key);
        match reduced.last_mut() {
            Some(last) if last.key == key => {
                let count = last.value.as_u64().unwrap_or(0) + 1;
                last.value = json!(count);
            }
            _ => reduced.push(ViewRow {
                id: None,
                key,
                value: json!(1),
            }),
        }
    }
    reduced
}

fn ensure_online(state: &MemoryState) -> Result<(), StoreError> {
    if state.offline {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "store is offline",
        )));
    }
    Ok(())
}

fn new_revision(generation: u64) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{generation}-{}", &suffix[..16])
}

/// Bump the update sequence and write a change line to open feeds.
async fn announce(state: &mut MemoryState, id: &str, rev: &str) {
    state.update_seq += 1;
    let line = json!({
        "seq": state.update_seq,
        "id": id,
        "changes": [{ "rev": rev }],
    })
    .to_string();
    broadcast_line(&mut state.feeds, &line).await;
}

/// Write `line` to every feed, dropping feeds whose reader has gone away.
async fn broadcast_line(feeds: &mut Vec<DuplexStream>, line: &str) {
    let mut open = Vec::with_capacity(feeds.len());
    for mut feed in feeds.drain(..) {
        let written = feed.write_all(format!("{line}\n").as_bytes()).await;
        if written.is_ok() {
            open.push(feed);
        }
    }
    *feeds = open;
}
