//! Documents and records exchanged with the Chronicle database.
//!
//! Field names follow the JSON written by Chronicle requesters
//! (`desiredProvenance`, `requestID`, ...), so most structs carry serde
//! renames. Unknown fields are kept in flattened `extra` maps where a
//! round trip back to the database must not lose them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChronicleError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Document type tag of a work request.
pub const STEP_DOCUMENT_TYPE: &str = "step";

/// Type tag used by older requesters for the same document shape.
pub const LEGACY_STEP_DOCUMENT_TYPE: &str = "ch.step";

/// Whether a document `type` value denotes a step document.
pub fn is_step_type(doc_type: &str) -> bool {
    doc_type == STEP_DOCUMENT_TYPE || doc_type == LEGACY_STEP_DOCUMENT_TYPE
}

// ---------------------------------------------------------------------------
// Change feed
// ---------------------------------------------------------------------------

/// Database sequence marker.
///
/// CouchDB 1.x uses plain integers, 2.x and later an opaque string token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sequence {
    Number(u64),
    Token(String),
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sequence::Number(n) => write!(f, "{n}"),
            Sequence::Token(t) => f.write_str(t),
        }
    }
}

/// One line of the continuous change feed.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    pub id: String,
    pub seq: Sequence,
    /// Set when the change is a deletion; the document can no longer be fetched.
    #[serde(default)]
    pub deleted: bool,
}

impl ChangeEvent {
    /// Parse a single feed line.
    ///
    /// Fails for heartbeats, malformed JSON and the `{"last_seq": ...}`
    /// record CouchDB writes when it closes the feed.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

// ---------------------------------------------------------------------------
// Step documents
// ---------------------------------------------------------------------------

/// Lifecycle of a step: `open` -> `working` -> `closed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Older requesters never wrote a status; such steps are open.
    #[default]
    Open,
    Working,
    Closed,
}

/// What kind of result a step asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceSpec {
    /// Application name pattern, e.g. `"3D Slicer"` or `"*"`.
    pub application: String,
    /// Version pattern, e.g. `"4.*"`.
    pub version: String,
    /// Operation name; must name an [`OperationKind`] to be performable.
    pub operation: String,
    /// Operation-specific fields (e.g. `seriesUID`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProvenanceSpec {
    /// Fetch an operation-specific string field.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// A work request authored by a requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(rename = "desiredProvenance")]
    pub desired_provenance: ProvenanceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<Value>,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StepDocument {
    /// Decode a fetched document, checking the type tag.
    pub fn from_value(value: Value) -> Result<Self, ChronicleError> {
        let step: StepDocument = serde_json::from_value(value)
            .map_err(|e| ChronicleError::MalformedDocument(e.to_string()))?;
        if !is_step_type(&step.doc_type) {
            return Err(ChronicleError::MalformedDocument(format!(
                "document {} has type {:?}, expected {STEP_DOCUMENT_TYPE:?}",
                step.id, step.doc_type
            )));
        }
        Ok(step)
    }

    /// The requested operation, if it names a known kind.
    pub fn operation(&self) -> Result<OperationKind, ChronicleError> {
        self.desired_provenance.operation.parse()
    }

    /// Encode for a PUT back to the database (keeps `_rev` and unknown fields).
    pub fn to_value(&self) -> Result<Value, ChronicleError> {
        serde_json::to_value(self).map_err(|e| ChronicleError::MalformedDocument(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Operations a watcher may be able to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Fetch one series' image instances.
    Load,
    /// Render secondary captures for each input study (host-provided).
    ChronicleStudyRender,
    /// Fetch and segment a series (host-provided).
    Segment,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::Load,
        OperationKind::ChronicleStudyRender,
        OperationKind::Segment,
    ];

    /// Wire name as written in `desiredProvenance.operation`.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Load => "Load",
            OperationKind::ChronicleStudyRender => "ChronicleStudyRender",
            OperationKind::Segment => "Segment",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ChronicleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ChronicleError::UnknownOperation(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Status documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Progress,
    Result,
}

/// Progress or result entry appended while a step is worked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    /// Id of the step being worked on when the entry was written.
    #[serde(rename = "requestID")]
    pub request_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: StatusKind,
    /// Plain text or an HTML fragment.
    pub progress: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusDocument {
    pub fn new(request_id: Option<String>, kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            request_id,
            kind,
            progress: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Identity of a stored document revision, as returned by every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,
    pub rev: String,
}
