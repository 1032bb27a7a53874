use crate::client::{ChatClient, ChatRequest, StaticTokenProvider, StreamingCallback};
use crate::reducer;
use crate::types::{Frame, MediaKind, ReplyState, ReplyStatus};
use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    addr
}

fn sse_response(chunks: Vec<&'static str>) -> Response {
    let body = Body::from_stream(stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok::<Bytes, Infallible>(Bytes::from(c))),
    ));
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(body)
        .expect("response")
}

fn client_for(addr: SocketAddr, token: &str) -> ChatClient {
    ChatClient::new(
        format!("http://{addr}"),
        Arc::new(StaticTokenProvider::new(token)),
    )
}

/// Collects per-frame snapshots, in the style of a re-rendering UI layer.
#[derive(Clone, Default)]
struct FrameCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl FrameCollector {
    fn callback(&self) -> StreamingCallback {
        let events = self.events.clone();
        Box::new(move |_state: &ReplyState, frame: &Frame| {
            events
                .lock()
                .expect("collector lock")
                .push(frame.event.clone());
            Ok(())
        })
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().expect("collector lock").clone()
    }
}

#[tokio::test]
async fn full_streaming_turn_with_artifact_extraction() {
    // A full turn whose records are split across transport chunks at hostile
    // boundaries, including mid-record and mid-multibyte-label.
    let router = Router::new().route(
        "/chat",
        post(|| async {
            sse_response(vec![
                "event: start\ndata: {\"conversationId\"",
                ": \"c1\"}\nevent: chunk\ndata: {\"content\":\"Ficou pronto!\\n[Assistir v",
                "ídeo](https://host/file/d/XYZ/view)\"}\n",
                "event: tool_call\ndata: {\"name\": \"video_gen\"}\n",
                "event: tool_result\ndata: {\"contents\": [{\"type\": \"video\", ",
                "\"driveLink\": \"https://host/file/d/XYZ/view\", \"title\": \"Promo\"}]}\n",
                "event: done\ndata: {\"toolsUsed\": [\"video_gen\"]}\n",
            ])
        }),
    );
    let addr = serve(router).await;

    let client = client_for(addr, "tok");
    let collector = FrameCollector::default();
    let callback = collector.callback();
    let state = client
        .send_message(
            &ChatRequest {
                message: "Gere um vídeo promo".to_string(),
                conversation_id: None,
            },
            Some(&callback),
        )
        .await
        .expect("turn");

    assert_eq!(state.conversation_id.as_deref(), Some("c1"));
    assert_eq!(state.status, ReplyStatus::Done);
    assert_eq!(state.tools_used, vec!["video_gen"]);
    assert_eq!(state.tool_results.len(), 1);
    assert_eq!(
        collector.events(),
        vec!["start", "chunk", "tool_call", "tool_result", "done"]
    );

    // The tool result and the narrative link collapse into one artifact,
    // with the tool-result title winning.
    let message = reducer::finalize(&state, "m1");
    assert_eq!(message.media.len(), 1);
    assert_eq!(message.media[0].kind, MediaKind::Video);
    assert_eq!(message.media[0].title, "Promo");
    assert_eq!(
        message.media[0].display_url,
        "https://drive.google.com/uc?export=view&id=XYZ"
    );
    assert_eq!(message.raw_content, "Ficou pronto!");
}

#[tokio::test]
async fn degraded_json_response_equals_streamed_turn() {
    let router = Router::new().route(
        "/chat",
        post(|| async { Json(json!({"response": "Hi", "conversationId": "c2"})) }),
    );
    let addr = serve(router).await;

    let client = client_for(addr, "tok");
    let collector = FrameCollector::default();
    let callback = collector.callback();
    let state = client
        .send_message(
            &ChatRequest {
                message: "oi".to_string(),
                conversation_id: None,
            },
            Some(&callback),
        )
        .await
        .expect("turn");

    assert_eq!(collector.events(), vec!["start", "chunk", "done"]);

    // Identical to a real stream carrying the same three frames.
    let expected = [
        Frame::json("start", json!({"conversationId": "c2"})),
        Frame::text("chunk", "Hi"),
        Frame::json("done", json!({})),
    ]
    .iter()
    .fold(ReplyState::new(None), reducer::apply);
    assert_eq!(state, expected);
    assert_eq!(state.accumulated_text, "Hi");
    assert_eq!(state.status, ReplyStatus::Done);
}

#[tokio::test]
async fn http_error_status_becomes_terminal_error_state() {
    let router = Router::new().route(
        "/chat",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response() }),
    );
    let addr = serve(router).await;

    let client = client_for(addr, "tok");
    let state = client
        .send_message(
            &ChatRequest {
                message: "oi".to_string(),
                conversation_id: None,
            },
            None,
        )
        .await
        .expect("turn resolves without Err");

    assert_eq!(state.status, ReplyStatus::Error);
    let detail = state.error_text.as_deref().expect("error text");
    assert!(detail.contains("boom"), "detail: {detail}");

    // The rendered message wraps the failure for the user.
    let message = reducer::finalize(&state, "m1");
    assert!(message.raw_content.starts_with("Ocorreu um erro: "));
}

#[tokio::test]
async fn error_only_stream_yields_localized_wrapper() {
    let router = Router::new().route(
        "/chat",
        post(|| async { sse_response(vec!["event: error\ndata: {\"error\": \"timeout\"}\n"]) }),
    );
    let addr = serve(router).await;

    let client = client_for(addr, "tok");
    let state = client
        .send_message(
            &ChatRequest {
                message: "oi".to_string(),
                conversation_id: None,
            },
            None,
        )
        .await
        .expect("turn");

    let message = reducer::finalize(&state, "m1");
    assert_eq!(message.raw_content, "Ocorreu um erro: timeout");
}

#[tokio::test]
async fn bearer_token_is_attached_to_the_request() {
    let seen = Arc::new(Mutex::new(None::<String>));
    let seen_in_handler = seen.clone();
    let router = Router::new().route(
        "/chat",
        post(move |headers: HeaderMap| async move {
            *seen_in_handler.lock().expect("lock") = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            sse_response(vec!["event: done\ndata: {}\n"])
        }),
    );
    let addr = serve(router).await;

    let client = client_for(addr, "tok-123");
    let state = client
        .send_message(
            &ChatRequest {
                message: "oi".to_string(),
                conversation_id: None,
            },
            None,
        )
        .await
        .expect("turn");

    assert_eq!(state.status, ReplyStatus::Done);
    assert_eq!(
        seen.lock().expect("lock").as_deref(),
        Some("Bearer tok-123")
    );
}

#[tokio::test]
async fn empty_stream_finalizes_to_placeholder() {
    let router = Router::new().route(
        "/chat",
        post(|| async { sse_response(vec!["event: done\ndata: {}\n"]) }),
    );
    let addr = serve(router).await;

    let client = client_for(addr, "tok");
    let state = client
        .send_message(
            &ChatRequest {
                message: "oi".to_string(),
                conversation_id: Some("c3".to_string()),
            },
            None,
        )
        .await
        .expect("turn");

    assert_eq!(state.conversation_id.as_deref(), Some("c3"));
    let message = reducer::finalize(&state, "m1");
    assert_eq!(message.raw_content, reducer::EMPTY_REPLY_PLACEHOLDER);
}
