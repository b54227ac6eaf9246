pub mod ndjson;
pub mod ws;

use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use crate::agent::strategy::StrategyEngine;
use crate::agent::Agent;
use crate::config::Config;
use crate::llm::builder::build_registry;
use crate::metrics::Metrics;
use crate::runner::{AgentRunner, TaskRunner};
use crate::semantic;
use crate::tools::git::GitTool;
use crate::tools::{sandbox, Registry};

/// Shared handler state for the daemon's routes.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<dyn TaskRunner>,
    pub tools: Arc<Registry>,
    pub metrics: Arc<Metrics>,
    pub metrics_enabled: bool,
}

/// Wires the model registry, agent core, tool registry, strategy engine and
/// runner from configuration.
pub fn build_state(cfg: &Config) -> anyhow::Result<AppState> {
    let registry = Arc::new(build_registry(cfg).context("build registry")?);
    let agent = Arc::new(Agent::new(Arc::clone(&registry), cfg.agent.clone()));

    let sandbox = sandbox::build(&cfg.sandbox.working_dir, &cfg.sandbox, &cfg.tools)
        .context("build sandbox")?;
    let git = GitTool::new(
        &cfg.sandbox.working_dir,
        cfg.tools.allow_git && cfg.sandbox.enabled,
        !cfg.sandbox.allow_write || !cfg.tools.allow_file_write,
        &cfg.tools.backup_dir,
    );
    let semantic_engine = cfg.tools.enable_semantic.then(|| {
        semantic::Engine::new(
            Arc::new(sandbox.fs.clone()),
            cfg.tools.semantic_max_files,
            cfg.tools.semantic_max_file_bytes,
        )
    });
    let tools = Arc::new(Registry::new(
        sandbox.fs,
        sandbox.terminal,
        git,
        semantic_engine,
    ));

    let strategy = Arc::new(StrategyEngine::new(registry, cfg.strategy.clone()));
    let metrics = Arc::new(Metrics::new());
    let runner = Arc::new(AgentRunner {
        agent: Some(agent),
        tools: Some(Arc::clone(&tools)),
        strategy: Some(strategy),
        metrics: Arc::clone(&metrics),
    });

    Ok(AppState {
        runner,
        tools,
        metrics,
        metrics_enabled: cfg.server.metrics_enabled,
    })
}

/// Builds the daemon router. The NDJSON route is always mounted; the
/// WebSocket bidi route only for the `ws` transport.
pub fn router(state: AppState, transport: &str) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/tools/schemas", get(schemas_handler))
        .route("/agent/run", post(ndjson::run_handler));
    if transport.trim().to_lowercase() != "ndjson" {
        app = app.route("/agent/stream", get(ws::stream_handler));
    }
    app.with_state(state)
}

/// Runs the HTTP server until ctrl-c.
pub async fn serve(cfg: Config) -> anyhow::Result<()> {
    let state = build_state(&cfg)?;
    let app = router(state, &cfg.server.transport);

    let listener = tokio::net::TcpListener::bind(&cfg.server.addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.addr))?;
    info!(addr = %cfg.server.addr, transport = %cfg.server.transport, "starting mycodex daemon");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down mycodex daemon");
}

async fn health_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"status":"ok"}"#,
    )
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if !state.metrics_enabled {
        return (StatusCode::NOT_FOUND, String::new()).into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

async fn schemas_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tools.schemas())
}
