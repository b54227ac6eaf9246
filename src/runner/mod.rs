pub mod context;
pub mod dispatch;
pub mod parse;
pub mod test_parser;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::strategy::StrategyEngine;
use crate::agent::types::{AgentRequest, ReflectionContext, TestObservation, ToolObservation};
use crate::agent::Agent;
use crate::metrics::Metrics;
use crate::rpc::{RunTaskEvent, RunTaskRequest};
use crate::tools::Registry;

/// Event channel depth per run; the producer blocks when the consumer lags.
const EVENT_BUFFER: usize = 16;

/// Executes a task and yields streamed events. The returned channel closes
/// after exactly one terminal `done` or `error` event.
pub trait TaskRunner: Send + Sync {
    fn run(&self, cancel: CancellationToken, req: RunTaskRequest) -> mpsc::Receiver<RunTaskEvent>;
}

/// Bridges the agent core, tool registry and strategy engine to the event
/// stream: prelude (context files, pre-task tools, plan), then the bounded
/// step loop with tool dispatch, test execution and reflection.
pub struct AgentRunner {
    pub agent: Option<Arc<Agent>>,
    pub tools: Option<Arc<Registry>>,
    pub strategy: Option<Arc<StrategyEngine>>,
    pub metrics: Arc<Metrics>,
}

impl TaskRunner for AgentRunner {
    fn run(&self, cancel: CancellationToken, req: RunTaskRequest) -> mpsc::Receiver<RunTaskEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let agent = self.agent.clone();
        let tools = self.tools.clone();
        let strategy = self.strategy.clone();
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            let corr = if req.correlation_id.is_empty() {
                req.session_id.clone()
            } else {
                req.correlation_id.clone()
            };
            let session = req.session_id.clone();

            let Some(agent) = agent else {
                let _ = tx
                    .send(RunTaskEvent::error(&session, &corr, "agent unavailable"))
                    .await;
                return;
            };

            let producer = Producer {
                agent,
                tools,
                strategy,
                metrics,
                cancel,
                tx,
                session,
                corr,
            };
            producer.produce(req).await;
        });

        rx
    }
}

struct Producer {
    agent: Arc<Agent>,
    tools: Option<Arc<Registry>>,
    strategy: Option<Arc<StrategyEngine>>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
    tx: mpsc::Sender<RunTaskEvent>,
    session: String,
    corr: String,
}

impl Producer {
    async fn emit(&self, ev: RunTaskEvent) -> bool {
        self.tx.send(ev).await.is_ok()
    }

    async fn emit_error(&self, message: &str) {
        let _ = self
            .emit(RunTaskEvent::error(&self.session, &self.corr, message))
            .await;
    }

    async fn produce(&self, req: RunTaskRequest) {
        let start = Instant::now();
        let mut expensive_used = 0usize;
        let mut token_count = 0usize;
        let mut forced_finish = String::new();

        let max_bytes = self.agent.max_context_bytes();
        let ctx_files = match &self.tools {
            Some(tools) => {
                match context::build_context_files(tools, &req.prompt, &req.context_paths, max_bytes)
                {
                    Ok(files) => files,
                    Err(e) => {
                        self.emit_error(&e.to_string()).await;
                        return;
                    }
                }
            }
            None => Vec::new(),
        };

        // Pre-task tool calls, in request order. The first failure ends the run.
        let mut initial_tools: Vec<ToolObservation> = Vec::new();
        if !req.tools.is_empty() {
            if let Some(tools) = &self.tools {
                for tc in &req.tools {
                    match dispatch::execute_tool(tools, &self.cancel, tc).await {
                        Ok(output) => {
                            initial_tools.push(ToolObservation {
                                name: tc.name.clone(),
                                output: output.clone(),
                                error: None,
                            });
                            if !self
                                .emit(RunTaskEvent::tool(
                                    &self.session,
                                    &self.corr,
                                    &tc.name,
                                    &output,
                                ))
                                .await
                            {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = self
                                .emit(RunTaskEvent::tool_error(
                                    &self.session,
                                    &self.corr,
                                    &tc.name,
                                    &e.to_string(),
                                ))
                                .await;
                            return;
                        }
                    }
                }
            }
        }

        if self.agent.planning_enabled() {
            let mut plan_model = self.select_model(
                "planner",
                first_non_empty(&[&req.planner_model, &req.model]),
                &mut expensive_used,
            );
            let mut plan = self
                .agent
                .plan(&AgentRequest {
                    session_id: req.session_id.clone(),
                    model: plan_model.clone(),
                    prompt: req.prompt.clone(),
                    context: ctx_files.clone(),
                })
                .await;
            if let Err(e) = &plan {
                self.metrics.record_model_failure("planner", &plan_model);
                warn!(model = %plan_model, error = %e, "planner model failed");
                let fallback = self.pick_fallback_model("planner", &plan_model, &mut expensive_used);
                if !fallback.is_empty() {
                    plan_model = fallback;
                    plan = self
                        .agent
                        .plan(&AgentRequest {
                            session_id: req.session_id.clone(),
                            model: plan_model.clone(),
                            prompt: req.prompt.clone(),
                            context: ctx_files.clone(),
                        })
                        .await;
                }
            }
            match plan {
                Ok(plan) => {
                    if !plan.trim().is_empty()
                        && !self
                            .emit(RunTaskEvent::plan(&self.session, &self.corr, &plan))
                            .await
                    {
                        return;
                    }
                }
                Err(e) => {
                    self.metrics.record_model_failure("planner", &plan_model);
                    self.emit_error(&e.to_string()).await;
                    return;
                }
            }
        }

        let max_steps = self.agent.max_steps();
        for step in 1..=max_steps {
            if self.cancel.is_cancelled() {
                self.emit_error("cancelled").await;
                return;
            }

            // Observations accumulated before this step (pre-task calls on
            // step 1, the previous step's tool calls afterwards).
            let mut step_tools = std::mem::take(&mut initial_tools);

            let mut coder_model =
                self.select_model("coder", first_non_empty(&[&req.model]), &mut expensive_used);
            let mut resp = self
                .agent
                .run(AgentRequest {
                    session_id: req.session_id.clone(),
                    model: coder_model.clone(),
                    prompt: req.prompt.clone(),
                    context: ctx_files.clone(),
                })
                .await;
            if let Err(e) = &resp {
                self.metrics.record_model_failure("coder", &coder_model);
                warn!(model = %coder_model, error = %e, "coder model failed");
                let fallback = self.pick_fallback_model("coder", &coder_model, &mut expensive_used);
                if !fallback.is_empty() {
                    coder_model = fallback;
                    resp = self
                        .agent
                        .run(AgentRequest {
                            session_id: req.session_id.clone(),
                            model: coder_model.clone(),
                            prompt: req.prompt.clone(),
                            context: ctx_files.clone(),
                        })
                        .await;
                }
            }
            let resp = match resp {
                Ok(resp) => resp,
                Err(e) => {
                    self.metrics.record_model_failure("coder", &coder_model);
                    self.emit_error(&e.to_string()).await;
                    return;
                }
            };
            let content = resp.message.content.clone();

            if !self
                .emit(RunTaskEvent::message(&self.session, &self.corr, &content, step))
                .await
            {
                return;
            }

            // Word tokens with monotonic step keys; each emission races the
            // cancellation signal.
            for (idx, token) in content.split_whitespace().enumerate() {
                let ev = RunTaskEvent::token(&self.session, &self.corr, token, step * 1000 + idx);
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.emit_error("cancelled").await;
                        return;
                    }
                    sent = self.tx.send(ev) => {
                        if sent.is_err() {
                            return;
                        }
                        token_count += 1;
                    }
                }
            }

            // Execute any tool calls emitted by the model before deciding
            // whether the step is done.
            if let Some(tools) = &self.tools {
                for tc in parse::extract_tool_calls(&content) {
                    match dispatch::execute_tool(tools, &self.cancel, &tc).await {
                        Ok(output) => {
                            step_tools.push(ToolObservation {
                                name: tc.name.clone(),
                                output: output.clone(),
                                error: None,
                            });
                            if !self
                                .emit(RunTaskEvent::tool(
                                    &self.session,
                                    &self.corr,
                                    &tc.name,
                                    &output,
                                ))
                                .await
                            {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = self
                                .emit(RunTaskEvent::tool_error(
                                    &self.session,
                                    &self.corr,
                                    &tc.name,
                                    &e.to_string(),
                                ))
                                .await;
                            return;
                        }
                    }
                }
            }

            let mut done = parse::is_response_done(&resp.finish_reason, &content);

            let mut test_obs: Option<TestObservation> = None;
            if done && self.agent.test_run_enabled() {
                let (output, exit_code, error, attempts) = self
                    .run_tests(
                        self.agent.test_command(),
                        self.agent.test_retries(),
                        self.agent.test_timeout_seconds(),
                    )
                    .await;
                let (summary, failing) = test_parser::parse_test_output(&output);
                test_obs = Some(TestObservation {
                    command: self.agent.test_command().to_string(),
                    output: output.clone(),
                    exit_code,
                    error: error.clone(),
                    summary: summary.clone(),
                    failing: failing.clone(),
                    attempts,
                });
                if !self
                    .emit(RunTaskEvent::test(
                        &self.session,
                        &self.corr,
                        &output,
                        step,
                        exit_code,
                        &summary,
                        failing,
                        attempts,
                        error,
                    ))
                    .await
                {
                    return;
                }
            }

            if self.agent.reflection_enabled() {
                let self_diff = if self.agent.enable_self_diff() {
                    parse::compute_self_diff(&resp.previous_assistant, &content)
                } else {
                    String::new()
                };
                let mut critic_model = self.select_model(
                    "critic",
                    first_non_empty(&[&req.critic_model, &req.model]),
                    &mut expensive_used,
                );
                let reflect_ctx = ReflectionContext {
                    tools: step_tools.clone(),
                    test: test_obs.clone(),
                    self_diff,
                };
                let reflect_req = |model: String| AgentRequest {
                    session_id: req.session_id.clone(),
                    model,
                    prompt: req.prompt.clone(),
                    context: Vec::new(),
                };
                let mut reflection = self
                    .agent
                    .reflect(&reflect_req(critic_model.clone()), &resp, reflect_ctx.clone())
                    .await;
                if let Err(e) = &reflection {
                    self.metrics.record_model_failure("critic", &critic_model);
                    warn!(model = %critic_model, error = %e, "critic model failed");
                    let fallback =
                        self.pick_fallback_model("critic", &critic_model, &mut expensive_used);
                    if !fallback.is_empty() {
                        critic_model = fallback;
                        reflection = self
                            .agent
                            .reflect(&reflect_req(critic_model.clone()), &resp, reflect_ctx)
                            .await;
                    }
                }
                let reflection = match reflection {
                    Ok(text) => text,
                    Err(e) => {
                        self.metrics.record_model_failure("critic", &critic_model);
                        self.emit_error(&e.to_string()).await;
                        return;
                    }
                };
                if !reflection.trim().is_empty() {
                    let critique = parse::parse_critique(&reflection);
                    let blocks = parse::critique_blocks_apply(critique.as_ref());
                    if !self
                        .emit(RunTaskEvent::reflect(
                            &self.session,
                            &self.corr,
                            &reflection,
                            critique.map(serde_json::Value::Object),
                            step,
                        ))
                        .await
                    {
                        return;
                    }
                    if blocks && parse::should_block_on_critique(&self.agent.reflection_policy()) {
                        done = true;
                        forced_finish = "blocked_by_reflect".to_string();
                    }
                }
            }

            if done {
                let mut finish_reason = resp.finish_reason.clone();
                if !forced_finish.is_empty() {
                    finish_reason = forced_finish.clone();
                    if !self
                        .emit(RunTaskEvent::message(
                            &self.session,
                            &self.corr,
                            &format!("Run halted by reflection policy ({finish_reason})"),
                            step,
                        ))
                        .await
                    {
                        return;
                    }
                }
                let _ = self
                    .emit(RunTaskEvent::done(
                        &self.session,
                        &self.corr,
                        &finish_reason,
                        step,
                    ))
                    .await;
                self.metrics
                    .record_agent_run(&finish_reason, start.elapsed(), token_count);
                return;
            }
        }

        let _ = self
            .emit(RunTaskEvent::done(
                &self.session,
                &self.corr,
                "max_steps",
                max_steps,
            ))
            .await;
        self.metrics
            .record_agent_run("max_steps", start.elapsed(), token_count);
    }

    /// Picks a model for the role, counting expensive selections and
    /// recording usage. Falls back to the requested name when no strategy
    /// engine is wired.
    fn select_model(&self, role: &str, requested: &str, expensive_used: &mut usize) -> String {
        let Some(strategy) = &self.strategy else {
            return requested.to_string();
        };
        match strategy.pick_with_budget(role, requested, *expensive_used) {
            Err(e) => {
                self.metrics.record_model_failure(role, requested);
                warn!(role, requested, error = %e, "model selection failed");
                requested.to_string()
            }
            Ok(sel) => {
                if sel.chosen.is_empty() {
                    return requested.to_string();
                }
                if sel.expensive {
                    *expensive_used += 1;
                }
                self.metrics.record_model_usage(role, &sel.chosen);
                if sel.chosen != requested {
                    info!(role, requested, chosen = %sel.chosen, "model chosen");
                }
                sel.chosen
            }
        }
    }

    /// Walks the fallback chain for the first resolvable model that differs
    /// from `current` and has not been tried yet.
    fn pick_fallback_model(
        &self,
        role: &str,
        current: &str,
        expensive_used: &mut usize,
    ) -> String {
        let Some(strategy) = &self.strategy else {
            return String::new();
        };
        let mut tried: HashSet<String> = HashSet::new();
        if !current.is_empty() {
            tried.insert(current.to_string());
        }

        let mut fb = strategy.next_fallback(current);
        while !fb.is_empty() {
            if !tried.insert(fb.clone()) {
                break;
            }
            match strategy.pick_with_budget(role, &fb, *expensive_used) {
                Err(e) => {
                    self.metrics.record_model_failure(role, &fb);
                    warn!(role, fallback = %fb, error = %e, "fallback selection failed");
                }
                Ok(sel) => {
                    if !sel.chosen.is_empty() && sel.chosen != current {
                        if sel.expensive {
                            *expensive_used += 1;
                        }
                        self.metrics.record_model_usage(role, &sel.chosen);
                        info!(role, from = current, to = %sel.chosen, "model falling back");
                        return sel.chosen;
                    }
                }
            }
            fb = strategy.next_fallback(&fb);
        }
        String::new()
    }

    /// Runs the configured test command, retrying on failure. Returns the
    /// combined output, last exit code, last error and attempt count.
    async fn run_tests(
        &self,
        command: &str,
        retries: usize,
        timeout_seconds: u64,
    ) -> (String, i32, Option<String>, usize) {
        let Some(tools) = &self.tools else {
            return (
                String::new(),
                -1,
                Some("terminal tool unavailable for tests".to_string()),
                0,
            );
        };
        let parts: Vec<String> = command.split_whitespace().map(ToString::to_string).collect();
        let Some((cmd, args)) = parts.split_first() else {
            return (String::new(), -1, Some("test command is empty".to_string()), 0);
        };

        let mut output = String::new();
        let mut exit_code = -1;
        let mut error: Option<String> = None;
        let mut attempts = 0usize;

        for attempt in 1..=retries + 1 {
            attempts = attempt;

            let attempt_cancel = self.cancel.child_token();
            let timer = if timeout_seconds > 0 {
                let token = attempt_cancel.clone();
                Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(timeout_seconds)).await;
                    token.cancel();
                }))
            } else {
                None
            };

            let result = tools.terminal.exec(&attempt_cancel, cmd, args).await;
            if let Some(timer) = timer {
                timer.abort();
            }

            match result {
                Ok(res) => {
                    output = res.stdout.clone();
                    if !res.stderr.is_empty() {
                        if !output.is_empty() {
                            output.push('\n');
                        }
                        output.push_str(&res.stderr);
                    }
                    exit_code = res.exit_code;
                    error = None;
                    if res.exit_code == 0 {
                        break;
                    }
                }
                Err(e) => {
                    output = String::new();
                    exit_code = -1;
                    error = Some(e.to_string());
                }
            }
        }

        (output, exit_code, error, attempts)
    }
}

fn first_non_empty<'a>(values: &[&'a str]) -> &'a str {
    values
        .iter()
        .find(|v| !v.trim().is_empty())
        .copied()
        .unwrap_or("")
}
