use crate::llm::{ChatMessage, ModelRoute};

/// Contextual file content passed along with the prompt.
#[derive(Debug, Clone)]
pub struct ContextFile {
    pub path: String,
    pub content: String,
}

/// A single agent invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub session_id: String,
    pub model: String,
    pub prompt: String,
    pub context: Vec<ContextFile>,
}

/// Model response plus route metadata.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub message: ChatMessage,
    pub route: ModelRoute,
    pub finish_reason: String,
    pub previous_assistant: String,
}

/// A single tool invocation result, fed into reflection.
#[derive(Debug, Clone, Default)]
pub struct ToolObservation {
    pub name: String,
    pub output: String,
    pub error: Option<String>,
}

/// Outcome of an automated test run.
#[derive(Debug, Clone, Default)]
pub struct TestObservation {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    pub error: Option<String>,
    pub summary: String,
    pub failing: Vec<String>,
    pub attempts: usize,
}

/// Execution artefacts carried into the reflection phase.
#[derive(Debug, Clone, Default)]
pub struct ReflectionContext {
    pub tools: Vec<ToolObservation>,
    pub test: Option<TestObservation>,
    pub self_diff: String,
}
