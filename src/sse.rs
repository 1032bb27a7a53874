//! Event frame decoder for the line-oriented streaming protocol.
//!
//! The transport may split one logical record across many chunks or deliver
//! several records in a single chunk; the decoder carries the trailing
//! incomplete line between calls so the emitted frame sequence is invariant
//! under chunk boundaries.

use crate::types::{Frame, FramePayload, DEFAULT_EVENT};
use tracing::debug;

const EVENT_MARKER: &str = "event:";
const DATA_MARKER: &str = "data:";

/// Incremental decoder turning raw text chunks into [`Frame`]s.
///
/// Known deviation from strict SSE: the current event name persists across
/// records until an `event:` line changes it, rather than resetting per
/// block. The upstream framing behaves this way and downstream consumers
/// depend on it, so it is preserved here deliberately.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    current_event: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk, returning every frame completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(frame) = self.decode_line(line.trim_end_matches(['\n', '\r'])) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush the held-back final fragment at stream end. A stream that ends
    /// without a trailing newline still yields its last record.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(line.trim_end_matches('\r'))
    }

    fn decode_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return None;
        }
        // Comment lines per the framing protocol.
        if line.starts_with(':') {
            return None;
        }
        if let Some(name) = line.strip_prefix(EVENT_MARKER) {
            self.current_event = Some(name.trim().to_string());
            return None;
        }
        if let Some(data) = line.strip_prefix(DATA_MARKER) {
            let data = data.strip_prefix(' ').unwrap_or(data);
            let event = self
                .current_event
                .clone()
                .unwrap_or_else(|| DEFAULT_EVENT.to_string());
            debug!("Decoded frame: event={} data={}", event, data);
            let payload = match serde_json::from_str(data) {
                Ok(value) => FramePayload::Json(value),
                // Not valid JSON: recover locally as opaque text.
                Err(_) => FramePayload::Text(data.to_string()),
            };
            return Some(Frame::new(event, payload));
        }
        None
    }
}

/// Synthesize the three-frame sequence for the degraded non-streaming mode,
/// where the whole response body is a single JSON document. Downstream
/// consumers never special-case the fallback transport.
pub fn frames_from_json_body(body: &serde_json::Value) -> Vec<Frame> {
    let mut frames = Vec::with_capacity(3);

    let mut start = serde_json::Map::new();
    if let Some(id) = body
        .get("conversationId")
        .or_else(|| body.get("conversation_id"))
        .and_then(|v| v.as_str())
    {
        start.insert(
            "conversationId".to_string(),
            serde_json::Value::String(id.to_string()),
        );
    }
    frames.push(Frame::json("start", serde_json::Value::Object(start)));

    let text = body
        .get("response")
        .or_else(|| body.get("message"))
        .or_else(|| body.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    frames.push(Frame::text("chunk", text));

    frames.push(Frame::json(
        "done",
        serde_json::Value::Object(serde_json::Map::new()),
    ));
    frames
}

/// A transport-level failure surfaced as a single terminal `error` frame.
pub fn error_frame(message: impl Into<String>) -> Frame {
    Frame::json("error", serde_json::json!({ "error": message.into() }))
}
