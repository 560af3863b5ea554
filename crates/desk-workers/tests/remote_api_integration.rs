//! Network API worker against a one-shot local HTTP server.

use std::sync::Arc;

use desk_workers::events::{ChannelSink, WorkerEvent};
use desk_workers::message::Message;
use desk_workers::worker::{RemoteApiBackend, RemoteApiWorker, Worker, WorkerContext};
use desk_workers::WorkerError;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct Captured {
    head: String,
    body: Value,
}

/// Serve one request with `status` and `body`, returning what was received.
async fn serve_once(status: &'static str, content_type: &'static str, body: String) -> (String, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let (head, body_start) = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break (String::from_utf8_lossy(&buf[..pos]).into_owned(), pos + 4);
            }
        };
        let length: usize = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while buf.len() < body_start + length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let request_body = serde_json::from_slice(&buf[body_start..body_start + length]).unwrap_or(Value::Null);

        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        Captured {
            head,
            body: request_body,
        }
    });
    (url, task)
}

fn sse(events: &[&str]) -> String {
    events
        .iter()
        .map(|data| {
            let kind = serde_json::from_str::<Value>(data)
                .ok()
                .and_then(|v| v["type"].as_str().map(str::to_string))
                .unwrap_or_default();
            format!("event: {kind}\ndata: {data}\n\n")
        })
        .collect()
}

fn worker(base_url: String) -> (RemoteApiWorker, tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>) {
    let mut ctx = WorkerContext::new("api-session");
    ctx.credential = Some("test-key".into());
    ctx.base_url = base_url;
    ctx.model = Some("test-model".into());
    let worker = RemoteApiWorker::with_backend(ctx, RemoteApiBackend::new());
    let (sink, rx) = ChannelSink::new();
    worker.add_observer(sink);
    (worker, rx)
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

#[tokio::test]
async fn streams_answer_and_sends_full_history() {
    let body = sse(&[
        r#"{"type":"message_start","message":{"id":"msg_1"}}"#,
        r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        r#"{"type":"ping"}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":", world"}}"#,
        r#"{"type":"message_stop"}"#,
    ]);
    let (url, server) = serve_once("200 OK", "text/event-stream", body).await;
    let (worker, mut rx) = worker(url);
    worker.load_history(vec![Message::user("earlier"), Message::assistant("reply")]);

    worker.process_user_message("greet me".into()).await.unwrap();

    let captured = server.await.unwrap();
    let head = captured.head.to_ascii_lowercase();
    assert!(head.starts_with("post /v1/messages "));
    assert!(head.contains("x-api-key: test-key"));
    assert!(head.contains("anthropic-version:"));
    assert_eq!(captured.body["model"], "test-model");
    assert_eq!(captured.body["stream"], true);
    let messages = captured.body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3, "placeholder is not sent");
    assert_eq!(messages[2]["role"], "user");
    assert_eq!(messages[2]["content"], "greet me");

    let history = worker.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[3].text(), "Hello, world");

    let events = drain(&mut rx);
    let tokens: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::StreamToken(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, vec!["Hello", ", world"]);
    assert_eq!(events.last(), Some(&WorkerEvent::Complete));
}

#[tokio::test]
async fn api_error_status_is_shown_in_conversation() {
    let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
    let (url, server) = serve_once("401 Unauthorized", "application/json", body.to_string()).await;
    let (worker, mut rx) = worker(url);

    worker.process_user_message("hi".into()).await.unwrap();
    server.await.unwrap();

    let text = worker.history()[1].text();
    assert!(text.contains("401"), "got: {text}");
    assert!(text.contains("invalid x-api-key"), "got: {text}");
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, WorkerEvent::Error(_))));
    assert!(!worker.is_processing());
}

#[tokio::test]
async fn stream_error_event_is_reported() {
    let body = sse(&[
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Par"}}"#,
        r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
    ]);
    let (url, server) = serve_once("200 OK", "text/event-stream", body).await;
    let (worker, _rx) = worker(url);

    worker.process_user_message("hi".into()).await.unwrap();
    server.await.unwrap();

    assert_eq!(worker.history()[1].text(), "Par\n\noverloaded_error: Overloaded");
}

#[tokio::test]
async fn empty_stream_is_a_transport_error() {
    let (url, server) = serve_once("200 OK", "text/event-stream", String::new()).await;
    let (worker, _rx) = worker(url);

    let result = worker.process_user_message("hi".into()).await;
    server.await.unwrap();

    assert!(matches!(result, Err(WorkerError::Transport(_))));
    assert_eq!(worker.history().len(), 1);
}

#[tokio::test]
async fn missing_key_explains_without_request() {
    let mut ctx = WorkerContext::new("no-key");
    ctx.base_url = "http://127.0.0.1:9".into();
    let worker = Arc::new(RemoteApiWorker::with_backend(ctx, RemoteApiBackend::new()));

    assert!(worker.initialize().await.is_err());
    worker.process_user_message("hi".into()).await.unwrap();
    assert!(worker.history()[1].text().contains("No API key"));
}
