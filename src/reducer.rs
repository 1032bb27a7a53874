//! Streaming reply assembler.
//!
//! Frames are applied in strict arrival order through the pure reducer
//! [`apply`], so the interactive layer only ever re-renders a state it was
//! handed back, and the whole assembly path is testable without a live
//! transport.

use crate::extract;
use crate::types::{
    ChatMessage, DocumentArtifact, Frame, FramePayload, ReplyState, ReplyStatus, Role,
};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

/// User-facing substitute when a stream completes with no text and no error.
/// A UX fallback, not a protocol requirement.
pub const EMPTY_REPLY_PLACEHOLDER: &str =
    "Não foi possível obter uma resposta. Tente novamente.";

/// Wrapper around the server-reported error message shown to the user.
pub fn error_display_text(detail: &str) -> String {
    format!("Ocorreu um erro: {detail}")
}

/// Ordered list of chunk-text extractors.
///
/// The event producer is loose about the shape of chunk payloads; these
/// encode the known shapes, tried in priority order until one yields
/// non-empty text. Kept centralized because this is a real (if informal)
/// contract with the upstream producer.
const TEXT_EXTRACTORS: &[fn(&Value) -> Option<&str>] = &[
    |v| v.as_str(),
    |v| v.get("content").and_then(Value::as_str),
    |v| v.get("text").and_then(Value::as_str),
    |v| extract_delta(v),
];

fn extract_delta(v: &Value) -> Option<&str> {
    let delta = v.get("delta")?;
    delta
        .as_str()
        .or_else(|| delta.get("content").and_then(Value::as_str))
        .or_else(|| delta.get("text").and_then(Value::as_str))
}

/// Text carried by a chunk-like payload, per the extractor priority list.
pub fn chunk_text(payload: &FramePayload) -> Option<String> {
    let value = match payload {
        FramePayload::Text(s) => return Some(s.clone()),
        FramePayload::Json(v) => v,
    };
    TEXT_EXTRACTORS
        .iter()
        .find_map(|extractor| extractor(value).filter(|s| !s.is_empty()))
        .map(str::to_string)
}

/// Apply one frame to the reply state, returning the successor state.
///
/// Frames arriving after the state went terminal are ignored; the state is
/// frozen once `done` or `error` has been seen.
pub fn apply(mut state: ReplyState, frame: &Frame) -> ReplyState {
    if state.is_terminal() {
        debug!("Ignoring {} frame after terminal state", frame.event);
        return state;
    }

    match frame.event.as_str() {
        "start" => {
            if let Some(id) = frame
                .payload
                .as_object()
                .and_then(|o| o.get("conversationId").or_else(|| o.get("conversation_id")))
                .and_then(Value::as_str)
            {
                state.conversation_id = Some(id.to_string());
            }
        }
        "chunk" | "token" => {
            if let Some(text) = chunk_text(&frame.payload) {
                state.accumulated_text.push_str(&text);
            }
        }
        "tool_call" => {
            state.active_tool = frame
                .payload
                .as_object()
                .and_then(|o| o.get("name").or_else(|| o.get("tool")))
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        "tool_result" => {
            state.active_tool = None;
            state.tool_results.push(frame.payload.as_value());
        }
        "document" => {
            // Structured document artifacts are surfaced immediately, not
            // deferred to post-completion extraction.
            match document_from_payload(&frame.payload) {
                Some(doc) => state.documents.push(doc),
                None => warn!("Unusable document frame payload: {:?}", frame.payload),
            }
        }
        "done" => {
            if let Some(tools) = frame
                .payload
                .as_object()
                .and_then(|o| o.get("toolsUsed").or_else(|| o.get("tools_used")))
                .and_then(Value::as_array)
            {
                state.tools_used = tools
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
            }
            state.status = ReplyStatus::Done;
        }
        "error" => {
            let detail = frame
                .payload
                .as_object()
                .and_then(|o| o.get("error").or_else(|| o.get("message")))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| match &frame.payload {
                    FramePayload::Text(s) => s.clone(),
                    FramePayload::Json(v) => v.to_string(),
                });
            state.error_text = Some(detail);
            state.status = ReplyStatus::Error;
        }
        other => {
            debug!("Ignoring unknown frame event: {other}");
        }
    }
    state
}

fn document_from_payload(payload: &FramePayload) -> Option<DocumentArtifact> {
    let obj = payload.as_object()?;
    let link = obj
        .get("link")
        .or_else(|| obj.get("driveLink"))
        .or_else(|| obj.get("url"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| (!link.is_empty()).then(|| link.clone()))?;
    Some(DocumentArtifact {
        id,
        kind: obj
            .get("kind")
            .or_else(|| obj.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("generic")
            .to_string(),
        title: obj
            .get("title")
            .or_else(|| obj.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("Documento")
            .to_string(),
        source_link: link,
        content: obj
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Pre-extraction text a reply state renders as: the localized wrapper for
/// failed turns, the placeholder for empty ones, otherwise the accumulated
/// text as streamed. Persisted transcripts store this same text so a
/// replayed turn renders exactly like the live one did.
pub fn display_text(state: &ReplyState) -> String {
    match state.status {
        ReplyStatus::Error => {
            let detail = state.error_text.as_deref().unwrap_or("erro desconhecido");
            error_display_text(detail)
        }
        _ if state.accumulated_text.is_empty() => EMPTY_REPLY_PLACEHOLDER.to_string(),
        _ => state.accumulated_text.clone(),
    }
}

/// Freeze a terminal (or snapshot) reply state into a renderable message,
/// running the extraction engine over the accumulated text and tool results.
pub fn finalize(state: &ReplyState, message_id: impl Into<String>) -> ChatMessage {
    let raw_content = display_text(state);

    let extracted = extract::extract_artifacts(&raw_content, &state.tool_results, &state.documents);

    ChatMessage {
        id: message_id.into(),
        role: Role::Assistant,
        raw_content: extracted.cleaned_text,
        tool_results: state.tool_results.clone(),
        media: extracted.media,
        documents: extracted.documents,
        attachments: Vec::new(),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Frame;
    use serde_json::json;

    fn run(frames: &[Frame]) -> ReplyState {
        frames
            .iter()
            .fold(ReplyState::new(None), |state, frame| apply(state, frame))
    }

    #[test]
    fn start_chunk_chunk_done() {
        let state = run(&[
            Frame::json("start", json!({"conversationId": "c1"})),
            Frame::text("chunk", "Hello"),
            Frame::text("chunk", " world"),
            Frame::json("done", json!({})),
        ]);

        assert_eq!(state.conversation_id.as_deref(), Some("c1"));
        assert_eq!(state.accumulated_text, "Hello world");
        assert_eq!(state.status, ReplyStatus::Done);
    }

    #[test]
    fn chunk_payload_shapes_checked_in_priority_order() {
        assert_eq!(
            chunk_text(&FramePayload::Json(json!("plain"))),
            Some("plain".to_string())
        );
        assert_eq!(
            chunk_text(&FramePayload::Json(json!({"content": "a", "text": "b"}))),
            Some("a".to_string())
        );
        assert_eq!(
            chunk_text(&FramePayload::Json(json!({"text": "b"}))),
            Some("b".to_string())
        );
        assert_eq!(
            chunk_text(&FramePayload::Json(json!({"delta": "d"}))),
            Some("d".to_string())
        );
        assert_eq!(
            chunk_text(&FramePayload::Json(json!({"delta": {"content": "dc"}}))),
            Some("dc".to_string())
        );
        assert_eq!(chunk_text(&FramePayload::Json(json!({"other": 1}))), None);
        // An empty candidate falls through to the next shape in the list.
        assert_eq!(
            chunk_text(&FramePayload::Json(json!({"content": "", "text": "b"}))),
            Some("b".to_string())
        );
    }

    #[test]
    fn tool_call_and_result_manage_active_tool() {
        let mut state = ReplyState::new(None);
        state = apply(state, &Frame::json("tool_call", json!({"name": "image_gen"})));
        assert_eq!(state.active_tool.as_deref(), Some("image_gen"));

        state = apply(
            state,
            &Frame::json("tool_result", json!({"contents": [{"type": "image"}]})),
        );
        assert!(state.active_tool.is_none());
        assert_eq!(state.tool_results.len(), 1);
    }

    #[test]
    fn document_frame_surfaces_immediately() {
        let state = run(&[Frame::json(
            "document",
            json!({"id": "doc-1", "kind": "campaign", "title": "Plano Q3",
                   "link": "https://docs.google.com/document/d/doc-1"}),
        )]);
        assert_eq!(state.documents.len(), 1);
        assert_eq!(state.documents[0].kind, "campaign");
        assert_eq!(state.documents[0].title, "Plano Q3");
    }

    #[test]
    fn done_records_tools_used() {
        let state = run(&[Frame::json("done", json!({"toolsUsed": ["a", "b"]}))]);
        assert_eq!(state.tools_used, vec!["a", "b"]);
        assert_eq!(state.status, ReplyStatus::Done);
    }

    #[test]
    fn error_frame_is_terminal() {
        let mut state = run(&[Frame::json("error", json!({"error": "timeout"}))]);
        assert_eq!(state.status, ReplyStatus::Error);
        assert_eq!(state.error_text.as_deref(), Some("timeout"));

        // Frames after a terminal state are ignored, no rollback and no revival.
        state = apply(state, &Frame::text("chunk", "late"));
        assert_eq!(state.accumulated_text, "");
    }

    #[test]
    fn reducer_is_deterministic() {
        let frames = vec![
            Frame::json("start", json!({"conversationId": "c2"})),
            Frame::json("chunk", json!({"content": "Oi"})),
            Frame::json("tool_call", json!({"tool": "video_gen"})),
            Frame::json("tool_result", json!({"ok": true})),
            Frame::json("done", json!({})),
        ];
        assert_eq!(run(&frames), run(&frames));
    }

    #[test]
    fn finalize_substitutes_placeholder_for_empty_reply() {
        let state = run(&[Frame::json("done", json!({}))]);
        let message = finalize(&state, "m1");
        assert_eq!(message.raw_content, EMPTY_REPLY_PLACEHOLDER);
        assert_eq!(message.role, Role::Assistant);
    }

    #[test]
    fn finalize_wraps_error_text() {
        let state = run(&[Frame::json("error", json!({"error": "timeout"}))]);
        let message = finalize(&state, "m2");
        assert_eq!(message.raw_content, "Ocorreu um erro: timeout");
    }
}
