use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::rpc::RunTaskRequest;
use crate::server::AppState;

/// Cancels the run and balances the active-session gauge when the response
/// stream is dropped (client disconnect included).
struct StreamGuard {
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
    transport: &'static str,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.metrics.dec_active_sessions(self.transport);
    }
}

pub fn assign_ids(req: &mut RunTaskRequest) {
    if req.session_id.is_empty() {
        req.session_id = format!("session-{}", Uuid::new_v4());
    }
    if req.correlation_id.is_empty() {
        req.correlation_id = format!("{}-corr", req.session_id);
    }
}

/// POST /agent/run: decodes a RunTaskRequest and streams RunTaskEvents as
/// NDJSON, one record per line, flushed per record.
pub async fn run_handler(
    State(state): State<AppState>,
    payload: Result<Json<RunTaskRequest>, JsonRejection>,
) -> Response {
    let Json(mut req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            state.metrics.record_transport_error("ndjson", "decode");
            return (
                StatusCode::BAD_REQUEST,
                format!("invalid request: {rejection}"),
            )
                .into_response();
        }
    };

    if req.prompt.trim().is_empty() {
        state.metrics.record_transport_error("ndjson", "empty_prompt");
        return (StatusCode::BAD_REQUEST, "prompt is required".to_string()).into_response();
    }

    assign_ids(&mut req);
    state.metrics.inc_active_sessions("ndjson");

    let cancel = CancellationToken::new();
    let guard = StreamGuard {
        cancel: cancel.clone(),
        metrics: Arc::clone(&state.metrics),
        transport: "ndjson",
    };

    let rx = state.runner.run(cancel, req);
    let stream = ReceiverStream::new(rx).map(move |ev| {
        let _hold = &guard;
        let mut line = serde_json::to_vec(&ev).unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode event");
            Vec::new()
        });
        line.push(b'\n');
        Ok::<_, Infallible>(Bytes::from(line))
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}
