use std::fmt::Write as _;

use crate::agent::types::{ContextFile, ReflectionContext};

pub fn system_prompt() -> &'static str {
    "You are MyCodex, a coding agent. Follow user instructions precisely, prefer minimal \
     changes, and ask before destructive actions. Be concise in answers."
}

pub fn plan_system_prompt() -> &'static str {
    "You are MyCodex planning assistant. Draft a concise numbered plan (3-7 steps) to solve \
     the user's task. Plans should include inspections, edits, validations, and tests when \
     relevant. Do not execute actions; only outline the plan."
}

pub fn reflect_system_prompt() -> &'static str {
    "You are MyCodex reflection assistant. Briefly assess the last assistant response for \
     issues, risks, or missing checks. Return a JSON object matching:\n\
     {\"quality\":\"good|ok|poor\",\"issues\":[\"...\"],\"recommendations\":[\"...\"],\
     \"block_apply\":true|false,\"notes\":\"optional free-text\"}\n\
     Be concise in text fields. Prefer block_apply=true only when you see critical risks."
}

/// Embeds the user prompt with optional context files.
pub fn build_user_prompt(prompt: &str, context: &[ContextFile]) -> String {
    if context.is_empty() {
        return prompt.to_string();
    }
    let mut out = String::from(prompt);
    out.push_str("\n\nContext:\n");
    for f in context {
        let _ = writeln!(out, "File: {}", f.path);
        out.push_str(&f.content);
        if !f.content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("---\n");
    }
    out
}

pub fn build_plan_user_prompt(prompt: &str) -> String {
    format!("Task:\n{prompt}\n\nReturn only the numbered plan.")
}

/// Formats the reflection request from the task, last response, cached plan
/// and the step's execution artefacts.
pub fn build_reflect_user_prompt(
    prompt: &str,
    last_response: &str,
    plan: &str,
    ctx: &ReflectionContext,
) -> String {
    let mut out = String::new();
    let _ = write!(out, "Task:\n{prompt}\n\nLast response:\n{last_response}\n");
    if !plan.trim().is_empty() {
        let _ = write!(out, "\nPlanned steps:\n{plan}\n");
    }
    if !ctx.self_diff.trim().is_empty() {
        let _ = write!(
            out,
            "\nSelf-diff (last vs current response):\n{}\n",
            truncate_for_prompt(&ctx.self_diff, 2000)
        );
    }
    if !ctx.tools.is_empty() {
        out.push_str("\nTool results:\n");
        for t in &ctx.tools {
            let mut summary = if t.output.is_empty() {
                t.error.clone().unwrap_or_default()
            } else {
                t.output.clone()
            };
            summary = truncate_for_prompt(&summary, 800);
            if summary.is_empty() {
                summary = "(no output)".to_string();
            }
            let _ = writeln!(out, "- {}: {}", t.name, summary);
        }
    }
    if let Some(test) = &ctx.test {
        let command = if test.command.trim().is_empty() {
            "tests"
        } else {
            test.command.trim()
        };
        let _ = write!(
            out,
            "\nTest run ({command}) exit={} attempts={}:\n",
            test.exit_code, test.attempts
        );
        if !test.failing.is_empty() {
            let _ = writeln!(out, "Failing tests: {}", test.failing.join(", "));
        }
        if !test.summary.trim().is_empty() {
            let _ = writeln!(out, "Summary: {}", test.summary);
        }
        let output = truncate_for_prompt(&test.output, 1200);
        if !output.trim().is_empty() {
            let _ = writeln!(out, "{output}");
        }
        if let Some(err) = &test.error {
            if !err.trim().is_empty() {
                let _ = writeln!(out, "Error: {}", truncate_for_prompt(err, 400));
            }
        }
    }
    out.push_str("\nReturn only the JSON critique.");
    out
}

fn truncate_for_prompt(text: &str, limit: usize) -> String {
    if limit == 0 || text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &text[..end])
}
