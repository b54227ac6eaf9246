use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use mycodex::metrics::Metrics;
use mycodex::rpc::{EventType, RunTaskEvent, RunTaskRequest, RunTaskStreamRequest};
use mycodex::runner::TaskRunner;
use mycodex::server::{self, AppState};
use mycodex::tools;
use mycodex::tools::fs::Filesystem;
use mycodex::tools::git::GitTool;
use mycodex::tools::terminal::Terminal;

/// Emits a message for the request, then a done event, then closes.
struct EchoRunner;

impl TaskRunner for EchoRunner {
    fn run(&self, _cancel: CancellationToken, req: RunTaskRequest) -> mpsc::Receiver<RunTaskEvent> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _ = tx
                .send(RunTaskEvent::message(
                    &req.session_id,
                    &req.correlation_id,
                    &format!("echo: {}", req.prompt),
                    1,
                ))
                .await;
            let _ = tx
                .send(RunTaskEvent::done(
                    &req.session_id,
                    &req.correlation_id,
                    "stop",
                    1,
                ))
                .await;
        });
        rx
    }
}

/// Emits one message, then waits for cancellation before terminating.
struct WaitForCancelRunner;

impl TaskRunner for WaitForCancelRunner {
    fn run(&self, cancel: CancellationToken, req: RunTaskRequest) -> mpsc::Receiver<RunTaskEvent> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let _ = tx
                .send(RunTaskEvent::message(
                    &req.session_id,
                    &req.correlation_id,
                    "working",
                    1,
                ))
                .await;
            cancel.cancelled().await;
            let _ = tx
                .send(RunTaskEvent::error(
                    &req.session_id,
                    &req.correlation_id,
                    "cancelled",
                ))
                .await;
        });
        rx
    }
}

fn tool_registry(dir: &str) -> Arc<tools::Registry> {
    Arc::new(tools::Registry::new(
        Filesystem::new(dir, false).expect("fs"),
        Terminal {
            working_dir: dir.to_string(),
            allowed: Vec::new(),
            denied: Vec::new(),
            timeout: Duration::from_secs(5),
            allow_execution: false,
        },
        GitTool::new(dir, false, true, ""),
        None,
    ))
}

struct TestServer {
    addr: String,
    metrics: Arc<Metrics>,
    _workdir: tempfile::TempDir,
}

async fn spawn_server(runner: Arc<dyn TaskRunner>, transport: &str) -> TestServer {
    let workdir = tempdir().expect("tempdir");
    let metrics = Arc::new(Metrics::new());
    let state = AppState {
        runner,
        tools: tool_registry(workdir.path().to_str().unwrap()),
        metrics: Arc::clone(&metrics),
        metrics_enabled: true,
    };
    let app = server::router(state, transport);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = format!("127.0.0.1:{}", listener.local_addr().expect("addr").port());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    TestServer {
        addr,
        metrics,
        _workdir: workdir,
    }
}

#[tokio::test]
async fn health_and_schemas_endpoints_respond() {
    let server = spawn_server(Arc::new(EchoRunner), "ws").await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("http://{}/health", server.addr))
        .send()
        .await
        .expect("health");
    assert!(health.status().is_success());
    assert_eq!(health.text().await.expect("body"), r#"{"status":"ok"}"#);

    let schemas: serde_json::Value = client
        .get(format!("http://{}/tools/schemas", server.addr))
        .send()
        .await
        .expect("schemas")
        .json()
        .await
        .expect("json");
    let names: Vec<&str> = schemas
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|s| s.get("name").and_then(|n| n.as_str()))
        .collect();
    assert!(names.contains(&"fs.read_file"));
    assert!(names.contains(&"git.apply_patch"));
    // Semantic engine is disabled in this registry.
    assert!(!names.contains(&"semantic.search"));
}

#[tokio::test]
async fn ndjson_run_streams_one_event_per_line() {
    let server = spawn_server(Arc::new(EchoRunner), "ndjson").await;

    let body = reqwest::Client::new()
        .post(format!("http://{}/agent/run", server.addr))
        .json(&RunTaskRequest {
            session_id: "s-ndjson".to_string(),
            correlation_id: "c-ndjson".to_string(),
            prompt: "hello".to_string(),
            ..Default::default()
        })
        .send()
        .await
        .expect("post");
    assert_eq!(
        body.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/x-ndjson")
    );

    let text = body.text().await.expect("body");
    let events: Vec<RunTaskEvent> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("event line"))
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::Message);
    assert_eq!(events[0].message.as_deref(), Some("echo: hello"));
    assert_eq!(events[1].event_type, EventType::Done);
    assert!(events.iter().all(|e| e.correlation_id == "c-ndjson"));
}

#[tokio::test]
async fn ndjson_assigns_ids_when_missing() {
    let server = spawn_server(Arc::new(EchoRunner), "ndjson").await;

    let text = reqwest::Client::new()
        .post(format!("http://{}/agent/run", server.addr))
        .json(&serde_json::json!({"prompt":"hi"}))
        .send()
        .await
        .expect("post")
        .text()
        .await
        .expect("body");
    let first: RunTaskEvent =
        serde_json::from_str(text.lines().next().expect("line")).expect("event");
    assert!(first.session_id.starts_with("session-"));
    assert!(first.correlation_id.ends_with("-corr"));
}

#[tokio::test]
async fn ndjson_rejects_malformed_body() {
    let server = spawn_server(Arc::new(EchoRunner), "ndjson").await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/agent/run", server.addr))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("post");
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(server.metrics.transport_error_count("ndjson", "decode"), 1);
}

#[tokio::test]
async fn ws_transport_streams_and_cancels() {
    let server = spawn_server(Arc::new(WaitForCancelRunner), "ws").await;

    let (socket, _) = connect_async(format!("ws://{}/agent/stream", server.addr))
        .await
        .expect("connect");
    let (mut sender, mut receiver) = socket.split();

    let first = RunTaskStreamRequest {
        run: Some(RunTaskRequest {
            session_id: "s-ws".to_string(),
            correlation_id: "c-ws".to_string(),
            prompt: "long task".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    sender
        .send(Message::Text(
            serde_json::to_string(&first).expect("encode").into(),
        ))
        .await
        .expect("send run");

    let msg = receiver.next().await.expect("first event").expect("frame");
    let ev: RunTaskEvent = serde_json::from_str(msg.to_text().expect("text")).expect("event");
    assert_eq!(ev.event_type, EventType::Message);
    assert_eq!(ev.session_id, "s-ws");

    let cancel = RunTaskStreamRequest {
        cancel: true,
        session_id: "s-ws".to_string(),
        correlation_id: "c-ws".to_string(),
        ..Default::default()
    };
    sender
        .send(Message::Text(
            serde_json::to_string(&cancel).expect("encode").into(),
        ))
        .await
        .expect("send cancel");

    let mut saw_cancelled = false;
    while let Some(Ok(msg)) = receiver.next().await {
        if let Ok(text) = msg.to_text() {
            if text.is_empty() {
                continue;
            }
            if let Ok(ev) = serde_json::from_str::<RunTaskEvent>(text) {
                if ev.event_type == EventType::Error {
                    assert_eq!(ev.error.as_deref(), Some("cancelled"));
                    saw_cancelled = true;
                    break;
                }
            }
        }
    }
    assert!(saw_cancelled, "expected a terminal cancelled error event");
}

#[tokio::test]
async fn ndjson_rejects_empty_prompt_before_starting_the_run() {
    let server = spawn_server(Arc::new(EchoRunner), "ndjson").await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/agent/run", server.addr))
        .json(&RunTaskRequest {
            prompt: "   ".to_string(),
            ..Default::default()
        })
        .send()
        .await
        .expect("post");
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(
        server.metrics.transport_error_count("ndjson", "empty_prompt"),
        1
    );
}

#[tokio::test]
async fn ws_first_frame_must_carry_run() {
    let server = spawn_server(Arc::new(EchoRunner), "ws").await;

    let (socket, _) = connect_async(format!("ws://{}/agent/stream", server.addr))
        .await
        .expect("connect");
    let (mut sender, mut receiver) = socket.split();

    sender
        .send(Message::Text(r#"{"cancel":true}"#.into()))
        .await
        .expect("send");

    let msg = receiver.next().await.expect("reply").expect("frame");
    let text = msg.to_text().expect("text");
    assert!(text.contains("first message must include run payload"));
    assert_eq!(server.metrics.transport_error_count("ws", "missing_run"), 1);
}

#[tokio::test]
async fn ndjson_transport_does_not_mount_ws_route() {
    let server = spawn_server(Arc::new(EchoRunner), "ndjson").await;
    let result = connect_async(format!("ws://{}/agent/stream", server.addr)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn metrics_endpoint_renders_counters() {
    let server = spawn_server(Arc::new(EchoRunner), "ws").await;
    server.metrics.record_model_usage("coder", "fast");

    let text = reqwest::Client::new()
        .get(format!("http://{}/metrics", server.addr))
        .send()
        .await
        .expect("metrics")
        .text()
        .await
        .expect("body");
    assert!(text.contains("mycodex_model_usage_total{role=\"coder\",model=\"fast\"} 1"));
}
