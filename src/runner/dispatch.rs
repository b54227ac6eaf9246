use std::fmt::Write as _;

use anyhow::{anyhow, bail};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::rpc::ToolCallRequest;
use crate::tools::{validator, Registry};

fn arg_str<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or("")
}

fn arg_string_list(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Validates and dispatches one tool call against the closed registry set,
/// returning the textual output the event stream carries.
pub async fn execute_tool(
    reg: &Registry,
    cancel: &CancellationToken,
    tc: &ToolCallRequest,
) -> anyhow::Result<String> {
    if cancel.is_cancelled() {
        bail!("cancelled");
    }
    validator::validate_call(reg, &tc.name, &tc.args)?;

    match tc.name.as_str() {
        "fs.read_file" => reg.fs.read_file(arg_str(&tc.args, "path")),
        "fs.write_file" => {
            reg.fs
                .write_file(arg_str(&tc.args, "path"), arg_str(&tc.args, "content"))?;
            Ok("ok".to_string())
        }
        "fs.search" => {
            let results =
                reg.fs
                    .search(arg_str(&tc.args, "root"), arg_str(&tc.args, "pattern"), 10)?;
            let mut out = String::new();
            for r in results {
                let _ = writeln!(out, "{}:{} {}", r.path, r.line, r.snippet);
            }
            Ok(out)
        }
        "terminal.exec" => {
            let command = arg_str(&tc.args, "command");
            let args = arg_string_list(&tc.args, "args");
            let res = reg.terminal.exec(cancel, command, &args).await?;
            if res.exit_code != 0 {
                let detail = if res.stderr.trim().is_empty() {
                    format!("exit status {}", res.exit_code)
                } else {
                    res.stderr.trim().to_string()
                };
                return Err(anyhow!(
                    "command {command:?} failed (exit {}): {detail}",
                    res.exit_code
                ));
            }
            Ok(res.stdout)
        }
        "git.apply_patch" => {
            let patch = arg_str(&tc.args, "patch");
            let dry_run = match tc.args.get("dry_run").and_then(Value::as_bool) {
                Some(v) => v,
                None => reg.git.dry_run_only,
            };
            reg.git.apply_patch(patch, dry_run).await
        }
        "git.status" => reg.git.status().await,
        "git.restore_backup" => reg.git.restore_backup(arg_str(&tc.args, "name")).await,
        "git.list_backups" => Ok(reg.git.list_backups()?.join("\n")),
        "git.preview_backup" => reg.git.preview_backup(arg_str(&tc.args, "name")),
        "semantic.search" => {
            let engine = reg
                .semantic
                .as_ref()
                .ok_or_else(|| anyhow!("semantic tool unavailable"))?;
            let limit = tc
                .args
                .get("limit")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let hits = engine.search(arg_str(&tc.args, "query"), limit)?;
            let mut out = String::new();
            for h in hits {
                let _ = write!(out, "{} (score: {:.2})\n{}\n\n", h.path, h.score, h.snippet);
            }
            Ok(out.trim().to_string())
        }
        other => Err(anyhow!("unknown tool {other:?}")),
    }
}
