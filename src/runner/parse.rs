use serde_json::{Map, Value};

use crate::rpc::ToolCallRequest;

/// Parses tool calls embedded in assistant content. Accepts a JSON array of
/// `{name, args}` records or a single such object, optionally wrapped in a
/// fenced code block. Malformed input yields no calls.
pub fn extract_tool_calls(content: &str) -> Vec<ToolCallRequest> {
    let mut content = content.trim();
    if content.is_empty() {
        return Vec::new();
    }

    let fenced;
    if content.contains("```") {
        let start = content.find("```json").or_else(|| content.find("```"));
        if let Some(start) = start {
            let after = &content[start + 3..];
            if let Some(end) = after.find("```") {
                fenced = after[..end]
                    .trim_start_matches("json")
                    .trim()
                    .to_string();
                content = &fenced;
            }
        }
    }

    if content.starts_with('[') {
        if let Ok(calls) = serde_json::from_str::<Vec<ToolCallRequest>>(content) {
            return calls;
        }
    }
    if let Ok(single) = serde_json::from_str::<ToolCallRequest>(content) {
        if !single.name.is_empty() {
            return vec![single];
        }
    }
    Vec::new()
}

/// Parses the critic's JSON critique; decorative or malformed text maps to
/// no critique.
pub fn parse_critique(raw: &str) -> Option<Map<String, Value>> {
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str::<Map<String, Value>>(raw).ok()
}

/// The blocking value may be a boolean or the literal string "true".
pub fn critique_blocks_apply(critique: Option<&Map<String, Value>>) -> bool {
    let Some(critique) = critique else {
        return false;
    };
    match critique.get("block_apply") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.to_lowercase() == "true",
        _ => false,
    }
}

/// Unknown policies block, matching the default.
pub fn should_block_on_critique(policy: &str) -> bool {
    !matches!(
        policy.trim().to_lowercase().as_str(),
        "never_block" | "warn_only"
    )
}

/// The step is done when the provider returned a non-empty finish reason
/// other than "length", or the content carries a done sentinel.
pub fn is_response_done(finish_reason: &str, content: &str) -> bool {
    if !finish_reason.is_empty() && finish_reason != "length" {
        return true;
    }
    let lower = content.to_lowercase();
    lower.contains("[done]") || lower.contains("<done>")
}

/// Builds the reflection self-diff from the previous and current assistant
/// texts. Despite the labels, "previous" is the prior assistant turn (the
/// last message recorded before this call), not a within-turn attempt.
pub fn compute_self_diff(prev: &str, current: &str) -> String {
    if prev.trim().is_empty() || current.trim().is_empty() {
        return String::new();
    }
    let mut out = String::from("Previous:\n");
    out.push_str(prev);
    if !prev.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("Current:\n");
    out.push_str(current);
    out
}
