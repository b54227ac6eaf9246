use std::io::Write as _;

use anyhow::{anyhow, bail, Context};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::config::Config;
use crate::rpc::{EventType, RunTaskEvent, RunTaskRequest, RunTaskStreamRequest, ToolCallRequest};

/// Options for one `mycodex run` invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub prompt: String,
    pub model: String,
    pub planner_model: String,
    pub critic_model: String,
    pub tools_json: String,
    pub context_paths: Vec<String>,
    pub transport: String,
}

/// Streams a task against a running daemon, rendering events to stdout.
/// Returns an error when the run terminates with an `error` event.
pub async fn run(cfg: &Config, opts: RunOptions) -> anyhow::Result<()> {
    if opts.prompt.trim().is_empty() {
        bail!("prompt cannot be empty");
    }

    let session_id = format!("cli-{}", Uuid::new_v4());
    let req = RunTaskRequest {
        session_id: session_id.clone(),
        correlation_id: format!("{session_id}-corr"),
        model: opts.model.clone(),
        planner_model: opts.planner_model.clone(),
        critic_model: opts.critic_model.clone(),
        prompt: opts.prompt.clone(),
        tools: parse_tool_calls(&opts.tools_json),
        context_paths: opts.context_paths.clone(),
    };

    let base = daemon_url(&cfg.server.addr);
    let transport = if opts.transport.is_empty() {
        cfg.server.transport.clone()
    } else {
        opts.transport.clone()
    };
    match transport.trim().to_lowercase().as_str() {
        "ndjson" => run_ndjson(&base, req).await,
        _ => run_ws(&base, req).await,
    }
}

fn daemon_url(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        return addr.trim_end_matches('/').to_string();
    }
    if addr.starts_with(':') {
        return format!("http://localhost{addr}");
    }
    format!("http://{addr}")
}

/// Pre-task tool calls from a JSON array; malformed input means none.
fn parse_tool_calls(raw: &str) -> Vec<ToolCallRequest> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    serde_json::from_str(raw).unwrap_or_default()
}

async fn run_ndjson(base: &str, req: RunTaskRequest) -> anyhow::Result<()> {
    let url = format!("{base}/agent/run");
    let response = reqwest::Client::new()
        .post(&url)
        .json(&req)
        .send()
        .await
        .with_context(|| format!("failed to reach daemon at {url}"))?;
    if !response.status().is_success() {
        bail!("daemon returned status {}", response.status().as_u16());
    }

    let mut stream = response.bytes_stream();
    let mut buf = String::new();
    loop {
        tokio::select! {
            chunk = stream.next() => {
                let Some(chunk) = chunk else { break };
                let chunk = chunk.context("failed reading event stream")?;
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    let ev: RunTaskEvent =
                        serde_json::from_str(&line).context("failed decoding event")?;
                    render_event(&ev)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                // Dropping the connection cancels the run server-side.
                eprintln!("\ninterrupted");
                return Ok(());
            }
        }
    }
    Ok(())
}

async fn run_ws(base: &str, req: RunTaskRequest) -> anyhow::Result<()> {
    let ws_url = format!(
        "{}/agent/stream",
        base.replacen("http", "ws", 1)
    );
    let (socket, _) = connect_async(ws_url.as_str())
        .await
        .with_context(|| format!("failed to reach daemon at {ws_url}"))?;
    let (mut sender, mut receiver) = socket.split();

    let first = RunTaskStreamRequest {
        run: Some(req.clone()),
        ..Default::default()
    };
    sender
        .send(Message::Text(serde_json::to_string(&first)?.into()))
        .await
        .context("failed sending run frame")?;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let ev: RunTaskEvent =
                            serde_json::from_str(&text).context("failed decoding event")?;
                        render_event(&ev)?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(anyhow!("stream failed: {e}")),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let cancel = RunTaskStreamRequest {
                    cancel: true,
                    session_id: req.session_id.clone(),
                    correlation_id: req.correlation_id.clone(),
                    ..Default::default()
                };
                let _ = sender
                    .send(Message::Text(serde_json::to_string(&cancel)?.into()))
                    .await;
            }
        }
    }
    Ok(())
}

fn render_event(ev: &RunTaskEvent) -> anyhow::Result<()> {
    match ev.event_type {
        EventType::Plan => {
            println!("[plan]\n{}", ev.message.as_deref().unwrap_or_default());
        }
        EventType::Message => {
            println!(
                "\n[message step {}]\n{}",
                ev.step.unwrap_or_default(),
                ev.message.as_deref().unwrap_or_default()
            );
        }
        EventType::Token => {
            print!("{} ", ev.token.as_deref().unwrap_or_default());
            std::io::stdout().flush().ok();
        }
        EventType::Tool => {
            if let Some(err) = &ev.error {
                println!(
                    "\n[tool {} failed] {err}",
                    ev.tool_name.as_deref().unwrap_or_default()
                );
            } else {
                println!(
                    "\n[tool {}]\n{}",
                    ev.tool_name.as_deref().unwrap_or_default(),
                    ev.tool_output.as_deref().unwrap_or_default()
                );
            }
        }
        EventType::Test => {
            println!(
                "\n[test exit={} attempts={}] {}",
                ev.exit_code.unwrap_or_default(),
                ev.test_attempts.unwrap_or_default(),
                ev.test_summary.as_deref().unwrap_or("ok")
            );
        }
        EventType::Reflect => {
            println!("\n[reflect]\n{}", ev.message.as_deref().unwrap_or_default());
        }
        EventType::Done => {
            println!(
                "\n[done] finish_reason={}",
                ev.finish_reason.as_deref().unwrap_or_default()
            );
        }
        EventType::Error => {
            bail!("run failed: {}", ev.error.as_deref().unwrap_or("unknown"));
        }
        EventType::Unknown => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_url_normalizes_addr_forms() {
        assert_eq!(daemon_url("http://1.2.3.4:9999"), "http://1.2.3.4:9999");
        assert_eq!(daemon_url(":8080"), "http://localhost:8080");
        assert_eq!(daemon_url("127.0.0.1:8080"), "http://127.0.0.1:8080");
    }

    #[test]
    fn tool_calls_parse_or_default_to_empty() {
        let calls = parse_tool_calls(r#"[{"name":"fs.read_file","args":{"path":"a"}}]"#);
        assert_eq!(calls.len(), 1);
        assert!(parse_tool_calls("not json").is_empty());
        assert!(parse_tool_calls("").is_empty());
    }

    #[test]
    fn error_event_fails_the_run() {
        let ev = RunTaskEvent::error("s", "c", "boom");
        assert!(render_event(&ev).is_err());
    }
}
