use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded record from the event stream.
///
/// Frames have no identity beyond arrival order; they are applied to a
/// [`ReplyState`] once and discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    pub payload: FramePayload,
}

/// Event name assumed when the server never names one for a record.
pub const DEFAULT_EVENT: &str = "chunk";

impl Frame {
    pub fn new(event: impl Into<String>, payload: FramePayload) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// A frame carrying a JSON payload.
    pub fn json(event: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(event, FramePayload::Json(value))
    }

    /// A frame carrying an opaque text payload.
    pub fn text(event: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(event, FramePayload::Text(text.into()))
    }
}

/// Payload of a frame: parsed JSON when the data line parses cleanly,
/// otherwise the raw text. A data line that is not valid JSON is a local,
/// recoverable anomaly, never a stream failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Json(serde_json::Value),
    Text(String),
}

impl FramePayload {
    /// The payload as a JSON value, wrapping raw text in a JSON string.
    pub fn as_value(&self) -> serde_json::Value {
        match self {
            FramePayload::Json(v) => v.clone(),
            FramePayload::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Borrow the JSON object payload, if that is what this is.
    pub fn as_object(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match self {
            FramePayload::Json(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// Terminal condition of an in-flight assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Streaming,
    Done,
    Error,
}

/// Accumulator for exactly one in-flight assistant turn.
///
/// Created when the user submits input, advanced exclusively by frame
/// application in [`crate::reducer`], frozen into a [`ChatMessage`] once the
/// status leaves `Streaming`. Never shared across turns.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyState {
    pub conversation_id: Option<String>,
    pub accumulated_text: String,
    pub active_tool: Option<String>,
    pub tool_results: Vec<serde_json::Value>,
    /// Documents surfaced eagerly by `document` frames, ahead of the
    /// post-completion extraction pass.
    pub documents: Vec<DocumentArtifact>,
    pub tools_used: Vec<String>,
    pub status: ReplyStatus,
    pub error_text: Option<String>,
}

impl ReplyState {
    pub fn new(conversation_id: Option<String>) -> Self {
        Self {
            conversation_id,
            accumulated_text: String::new(),
            active_tool: None,
            tool_results: Vec::new(),
            documents: Vec::new(),
            tools_used: Vec::new(),
            status: ReplyStatus::Streaming,
            error_text: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ReplyStatus::Streaming
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Persisted and rendered unit of conversation.
///
/// Immutable after creation, except that during live streaming the
/// `raw_content` of the pending assistant message is replaced wholesale on
/// each applied chunk (the assembler owns the running total; see
/// [`crate::reducer`]).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    /// Narrative text as rendered. For assistant messages this is the
    /// cleaned text left after artifact extraction; the pre-extraction
    /// accumulated text lives on the [`ReplyState`] (and in the persisted
    /// transcript).
    pub raw_content: String,
    #[serde(default)]
    pub tool_results: Vec<serde_json::Value>,
    #[serde(default)]
    pub media: Vec<MediaArtifact>,
    #[serde(default)]
    pub documents: Vec<DocumentArtifact>,
    #[serde(default)]
    pub attachments: Vec<UploadedAttachment>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// An extracted image or video reference.
///
/// Identity is the raw source link: two artifacts with the same source link
/// are the same artifact regardless of whether a tool result or narrative
/// text produced them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MediaArtifact {
    /// The raw source link, used as the dedup identity.
    pub id: String,
    pub kind: MediaKind,
    /// Directly embeddable URL (see [`crate::links::normalize_share_link`]).
    pub display_url: String,
    pub title: String,
    /// Title carried by the structured tool result, when one existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
}

/// An extracted document reference.
///
/// Identity is the externally supplied id when structured tool output
/// provided one, falling back to the link for narrative-only references.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DocumentArtifact {
    pub id: String,
    /// Free-form tag from the producing tool, e.g. "campaign", "research",
    /// "plan". Defaults to "generic".
    pub kind: String,
    pub title: String,
    pub source_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Reference to an attachment already uploaded by the external asset
/// collaborator. The pipeline only consumes the returned URL.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UploadedAttachment {
    pub url: String,
    pub name: String,
}

/// Transport-level errors, mapped from HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
