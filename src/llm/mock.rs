use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::llm::{ChatMessage, ChatRequest, ChatResponse, Provider, Role, Usage};

type ChatFn = dyn Fn(&ChatRequest) -> anyhow::Result<ChatResponse> + Send + Sync;

/// Test double implementing `Provider` with a configurable chat closure
/// and a call counter. Used by unit tests and the scenario suite.
pub struct MockProvider {
    name: String,
    chat_fn: Box<ChatFn>,
    calls: AtomicUsize,
}

/// Builds a canned assistant response.
pub fn canned_response(content: &str, finish_reason: &str) -> ChatResponse {
    ChatResponse {
        message: ChatMessage {
            role: Role::Assistant,
            content: content.to_string(),
            name: None,
        },
        finish_reason: finish_reason.to_string(),
        usage: Usage::default(),
        provider_name: "mock".to_string(),
        model: "mock".to_string(),
    }
}

impl MockProvider {
    pub fn new(
        chat_fn: impl Fn(&ChatRequest) -> anyhow::Result<ChatResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: "mock".to_string(),
            chat_fn: Box::new(chat_fn),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_content(content: &str) -> Self {
        let content = content.to_string();
        Self::new(move |_| Ok(canned_response(&content, "stop")))
    }

    pub fn with_response(content: &str, finish_reason: &str) -> Self {
        let content = content.to_string();
        let finish = finish_reason.to_string();
        Self::new(move |_| Ok(canned_response(&content, &finish)))
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_| Err(anyhow::anyhow!("{message}")))
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.chat_fn)(&req)
    }
}
