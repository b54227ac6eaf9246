use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::rpc::RunTaskStreamRequest;
use crate::server::ndjson::assign_ids;
use crate::server::AppState;

/// GET /agent/stream: bidirectional framed transport. The first client
/// frame must carry `{run: ...}`; later frames may set `{cancel: true}` to
/// abort. Server frames are RunTaskEvents.
pub async fn stream_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    state.metrics.inc_active_sessions("ws");
    run_stream(&state, socket).await;
    state.metrics.dec_active_sessions("ws");
}

async fn run_stream(state: &AppState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    let first = match receiver.next().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            state.metrics.record_transport_error("ws", "receive_first");
            return;
        }
    };
    let frame: RunTaskStreamRequest = match serde_json::from_str(&first) {
        Ok(frame) => frame,
        Err(e) => {
            state.metrics.record_transport_error("ws", "decode");
            warn!(error = %e, "invalid first stream frame");
            return;
        }
    };
    let Some(mut req) = frame.run else {
        state.metrics.record_transport_error("ws", "missing_run");
        let _ = sender
            .send(Message::Text(
                r#"{"type":"error","error":"first message must include run payload"}"#.into(),
            ))
            .await;
        return;
    };
    if req.prompt.trim().is_empty() {
        state.metrics.record_transport_error("ws", "empty_prompt");
        let _ = sender
            .send(Message::Text(
                r#"{"type":"error","error":"prompt is required"}"#.into(),
            ))
            .await;
        return;
    }
    assign_ids(&mut req);

    let cancel = CancellationToken::new();

    // Control-frame reader: cancels the run on a cancel message or any
    // receive failure (client gone).
    let reader_cancel = cancel.clone();
    let reader_metrics: Arc<Metrics> = Arc::clone(&state.metrics);
    let reader = tokio::spawn(async move {
        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<RunTaskStreamRequest>(&text) {
                        if frame.cancel {
                            debug!("client requested cancellation");
                            reader_cancel.cancel();
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    reader_cancel.cancel();
                    return;
                }
                Some(Err(_)) => {
                    reader_metrics.record_transport_error("ws", "receive_stream");
                    reader_cancel.cancel();
                    return;
                }
                Some(Ok(_)) => {}
            }
        }
    });

    let mut events = state.runner.run(cancel.clone(), req);
    while let Some(ev) = events.recv().await {
        let line = match serde_json::to_string(&ev) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode event");
                continue;
            }
        };
        if sender.send(Message::Text(line.into())).await.is_err() {
            state.metrics.record_transport_error("ws", "send");
            break;
        }
    }

    cancel.cancel();
    reader.abort();
    let _ = sender.close().await;
}
