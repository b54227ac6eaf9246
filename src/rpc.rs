use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level request for starting an agent task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunTaskRequest {
    pub session_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub planner_model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub critic_model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolCallRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_paths: Vec<String>,
}

/// A named tool invocation with a JSON object of arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCallRequest {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Message,
    Token,
    Tool,
    Plan,
    Reflect,
    Test,
    Done,
    Error,
    /// Forward compatibility: unknown tags decode instead of failing.
    #[serde(other)]
    Unknown,
}

/// Streamed progress record. Every event carries the run's session and
/// correlation ids; per-type payload fields are omitted when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTaskEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failing_tests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_attempts: Option<usize>,
}

impl RunTaskEvent {
    fn base(event_type: EventType, session_id: &str, correlation_id: &str) -> Self {
        Self {
            event_type,
            session_id: session_id.to_string(),
            correlation_id: correlation_id.to_string(),
            token: None,
            message: None,
            error: None,
            done: None,
            step: None,
            finish_reason: None,
            tool_name: None,
            tool_output: None,
            exit_code: None,
            critique: None,
            test_summary: None,
            failing_tests: Vec::new(),
            test_attempts: None,
        }
    }

    pub fn message(session: &str, corr: &str, text: &str, step: usize) -> Self {
        let mut ev = Self::base(EventType::Message, session, corr);
        ev.message = Some(text.to_string());
        ev.step = Some(step);
        ev
    }

    pub fn token(session: &str, corr: &str, token: &str, step_key: usize) -> Self {
        let mut ev = Self::base(EventType::Token, session, corr);
        ev.token = Some(token.to_string());
        ev.step = Some(step_key);
        ev
    }

    pub fn tool(session: &str, corr: &str, name: &str, output: &str) -> Self {
        let mut ev = Self::base(EventType::Tool, session, corr);
        ev.tool_name = Some(name.to_string());
        ev.tool_output = Some(output.to_string());
        ev
    }

    pub fn tool_error(session: &str, corr: &str, name: &str, error: &str) -> Self {
        let mut ev = Self::tool(session, corr, name, error);
        ev.error = Some(error.to_string());
        ev
    }

    pub fn plan(session: &str, corr: &str, plan: &str) -> Self {
        let mut ev = Self::base(EventType::Plan, session, corr);
        ev.message = Some(plan.to_string());
        ev
    }

    pub fn reflect(
        session: &str,
        corr: &str,
        text: &str,
        critique: Option<Value>,
        step: usize,
    ) -> Self {
        let mut ev = Self::base(EventType::Reflect, session, corr);
        ev.message = Some(text.to_string());
        ev.critique = critique;
        ev.step = Some(step);
        ev
    }

    #[allow(clippy::too_many_arguments)]
    pub fn test(
        session: &str,
        corr: &str,
        output: &str,
        step: usize,
        exit_code: i32,
        summary: &str,
        failing: Vec<String>,
        attempts: usize,
        error: Option<String>,
    ) -> Self {
        let mut ev = Self::base(EventType::Test, session, corr);
        ev.message = Some(output.to_string());
        ev.step = Some(step);
        ev.exit_code = Some(exit_code);
        ev.test_summary = Some(summary.to_string());
        ev.failing_tests = failing;
        ev.test_attempts = Some(attempts);
        ev.error = error;
        ev
    }

    pub fn done(session: &str, corr: &str, finish_reason: &str, step: usize) -> Self {
        let mut ev = Self::base(EventType::Done, session, corr);
        ev.done = Some(true);
        ev.finish_reason = Some(finish_reason.to_string());
        ev.step = Some(step);
        ev
    }

    pub fn error(session: &str, corr: &str, error: &str) -> Self {
        let mut ev = Self::base(EventType::Error, session, corr);
        ev.error = Some(error.to_string());
        ev
    }
}

/// Bidirectional stream payload: the first frame must carry `run`, later
/// frames may set `cancel` to abort the task mid-stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunTaskStreamRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunTaskRequest>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancel: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_format_omits_absent_fields() {
        let ev = RunTaskEvent::token("s1", "c1", "hello", 1003);
        let s = serde_json::to_string(&ev).expect("serialize");
        assert!(s.contains("\"type\":\"token\""));
        assert!(s.contains("\"step\":1003"));
        assert!(!s.contains("finish_reason"));
        assert!(!s.contains("tool_name"));
        assert!(!s.contains("failing_tests"));
    }

    #[test]
    fn done_event_carries_reason() {
        let ev = RunTaskEvent::done("s1", "c1", "stop", 2);
        let s = serde_json::to_string(&ev).expect("serialize");
        assert!(s.contains("\"done\":true"));
        assert!(s.contains("\"finish_reason\":\"stop\""));
    }

    #[test]
    fn unknown_event_type_decodes() {
        let ev: RunTaskEvent =
            serde_json::from_str(r#"{"type":"telemetry","session_id":"s"}"#).expect("decode");
        assert_eq!(ev.event_type, EventType::Unknown);
    }

    #[test]
    fn stream_request_first_frame_shape() {
        let raw = r#"{"run":{"session_id":"s","prompt":"hi"}}"#;
        let req: RunTaskStreamRequest = serde_json::from_str(raw).expect("decode");
        assert_eq!(req.run.as_ref().map(|r| r.prompt.as_str()), Some("hi"));
        assert!(!req.cancel);
    }

    #[test]
    fn cancel_frame_decodes() {
        let raw = r#"{"cancel":true,"session_id":"s","correlation_id":"c"}"#;
        let req: RunTaskStreamRequest = serde_json::from_str(raw).expect("decode");
        assert!(req.cancel);
        assert!(req.run.is_none());
    }

    #[test]
    fn tool_call_request_defaults_args_to_null() {
        let tc: ToolCallRequest = serde_json::from_str(r#"{"name":"fs.read_file"}"#).expect("decode");
        assert_eq!(tc.name, "fs.read_file");
        assert!(tc.args.is_null());
    }
}
