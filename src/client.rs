//! Transport boundary: streaming HTTP client for the assistant backend.
//!
//! The response is either the line-oriented event-frame format (decoded
//! incrementally) or a single JSON document in the degraded non-streaming
//! mode; both feed the same reducer. Transport failures never escape the
//! per-turn boundary: they become one synthetic terminal `error` frame in
//! the returned state.

use crate::reducer;
use crate::sse::{self, FrameDecoder};
use crate::types::{ApiError, Frame, ReplyState};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Observes every applied frame together with the state it produced.
/// Returning an error cancels the stream; the state keeps whatever partial
/// condition it had reached, with no rollback.
pub type StreamingCallback = Box<dyn Fn(&ReplyState, &Frame) -> Result<()> + Send + Sync>;

/// Supplies the bearer token attached to every request. Session storage is
/// owned by an external collaborator, not this subsystem.
#[async_trait]
pub trait SessionTokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
}

/// Token provider backed by a fixed string.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl SessionTokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Chunk source abstraction so stream processing is testable without a live
/// HTTP response.
#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

pub struct HttpChunkStream {
    response: Response,
}

impl HttpChunkStream {
    pub fn new(response: Response) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.response.chunk().await {
            Ok(Some(chunk)) => Ok(Some(chunk.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("HTTP chunk error: {}", e)),
        }
    }
}

/// One user turn submitted to the backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
}

pub struct ChatClient {
    client: Client,
    base_url: String,
    token_provider: Arc<dyn SessionTokenProvider>,
    /// Conversations with a live turn. At most one in-flight reply per
    /// conversation; re-submission is rejected without touching the live one.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, token_provider: Arc<dyn SessionTokenProvider>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            token_provider,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat", self.base_url.trim_end_matches('/'))
    }

    /// Submit one turn and drive it to a terminal state.
    ///
    /// Returns the final [`ReplyState`]; transport and stream failures are
    /// folded into it as a terminal `error` frame rather than surfaced as
    /// `Err`. `Err` is reserved for pre-flight rejection (a turn already in
    /// flight for this conversation, or no token available).
    pub async fn send_message(
        &self,
        request: &ChatRequest,
        callback: Option<&StreamingCallback>,
    ) -> Result<ReplyState> {
        let _guard = self.acquire_turn(request.conversation_id.as_deref())?;

        let token = self.token_provider.bearer_token().await?;
        let mut state = ReplyState::new(request.conversation_id.clone());

        let mut body = serde_json::json!({ "message": request.message });
        if let Some(id) = &request.conversation_id {
            body["conversationId"] = serde_json::Value::String(id.clone());
        }

        let response = match self
            .client
            .post(self.chat_url())
            .bearer_auth(token)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let error = ApiError::NetworkError(e.to_string());
                return Ok(apply_error(state, &error.to_string(), callback));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let error = map_status_error(status, text);
            return Ok(apply_error(state, &error.to_string(), callback));
        }

        let streaming = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        if streaming {
            let mut chunk_stream = HttpChunkStream::new(response);
            state = self
                .process_chunk_stream(&mut chunk_stream, state, callback)
                .await;
        } else {
            // Degraded non-streaming mode: one JSON document for the whole
            // reply, normalized into the same frame sequence.
            state = match response.text().await {
                Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(json) => {
                        let mut state = state;
                        for frame in sse::frames_from_json_body(&json) {
                            state = reducer::apply(state, &frame);
                            if notify(callback, &state, &frame).is_err() {
                                return Ok(state);
                            }
                        }
                        state
                    }
                    Err(e) => {
                        warn!("Non-streaming body is not JSON: {e}");
                        apply_error(state, &format!("resposta inválida: {e}"), callback)
                    }
                },
                Err(e) => {
                    let error = ApiError::NetworkError(e.to_string());
                    apply_error(state, &error.to_string(), callback)
                }
            };
        }

        Ok(state)
    }

    /// Drive a chunk stream through the decoder and reducer. Public within
    /// the crate so tests can feed scripted chunk sources.
    pub(crate) async fn process_chunk_stream(
        &self,
        chunk_stream: &mut dyn ChunkStream,
        mut state: ReplyState,
        callback: Option<&StreamingCallback>,
    ) -> ReplyState {
        let mut decoder = FrameDecoder::new();
        // Raw bytes may split a multi-byte character across chunks; carry
        // the incomplete tail between reads.
        let mut pending: Vec<u8> = Vec::new();

        loop {
            match chunk_stream.next_chunk().await {
                Ok(Some(chunk)) => {
                    pending.extend_from_slice(&chunk);
                    let text = take_valid_utf8(&mut pending);
                    for frame in decoder.feed(&text) {
                        state = reducer::apply(state, &frame);
                        if notify(callback, &state, &frame).is_err() {
                            debug!("Streaming cancelled by callback");
                            return state;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    return apply_error(state, &e.to_string(), callback);
                }
            }
        }

        if !pending.is_empty() {
            let tail = String::from_utf8_lossy(&pending).into_owned();
            for frame in decoder.feed(&tail) {
                state = reducer::apply(state, &frame);
                if notify(callback, &state, &frame).is_err() {
                    return state;
                }
            }
        }
        if let Some(frame) = decoder.finish() {
            state = reducer::apply(state, &frame);
            let _ = notify(callback, &state, &frame);
        }
        state
    }

    fn acquire_turn(&self, conversation_id: Option<&str>) -> Result<TurnGuard> {
        if let Some(id) = conversation_id {
            let mut live = self
                .in_flight
                .lock()
                .map_err(|_| anyhow::anyhow!("in-flight set poisoned"))?;
            if !live.insert(id.to_string()) {
                return Err(ApiError::InvalidRequest(format!(
                    "a reply is already in flight for conversation {id}"
                ))
                .into());
            }
        }
        Ok(TurnGuard {
            set: Arc::clone(&self.in_flight),
            id: conversation_id.map(str::to_string),
        })
    }
}

struct TurnGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: Option<String>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if let (Some(id), Ok(mut live)) = (self.id.take(), self.set.lock()) {
            live.remove(&id);
        }
    }
}

fn notify(callback: Option<&StreamingCallback>, state: &ReplyState, frame: &Frame) -> Result<()> {
    match callback {
        Some(cb) => cb(state, frame),
        None => Ok(()),
    }
}

fn apply_error(
    state: ReplyState,
    message: &str,
    callback: Option<&StreamingCallback>,
) -> ReplyState {
    warn!("Turn failed: {message}");
    let frame = sse::error_frame(message);
    let state = reducer::apply(state, &frame);
    let _ = notify(callback, &state, &frame);
    state
}

fn map_status_error(status: StatusCode, body: String) -> ApiError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimit(body),
        StatusCode::UNAUTHORIZED => ApiError::Authentication(body),
        StatusCode::BAD_REQUEST => ApiError::InvalidRequest(body),
        status if status.is_server_error() => ApiError::ServiceError(body),
        status => ApiError::Unknown(format!("Status {status}: {body}")),
    }
}

/// Take the longest valid UTF-8 prefix of `pending`, leaving any split
/// multi-byte tail behind for the next chunk.
fn take_valid_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(s) => {
            let text = s.to_string();
            pending.clear();
            text
        }
        Err(e) => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            let tail = pending.split_off(valid);
            *pending = tail;
            text
        }
    }
}
