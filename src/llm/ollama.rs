use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm::{ChatMessage, ChatRequest, ChatResponse, Provider, Role, Usage};

/// Minimal Ollama chat client (/api/chat, non-streaming).
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    name: String,
    client: Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = if base_url.is_empty() {
            "http://127.0.0.1:11434"
        } else {
            base_url
        };
        let timeout = if timeout.is_zero() {
            Duration::from_secs(20)
        } else {
            timeout
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building ollama http client")?;
        Ok(Self {
            name: name.to_string(),
            client,
            base_url: base.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct OllamaMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: OllamaMessage,
}

fn role_to_wire(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn role_from_wire(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "user" => Role::User,
        "tool" => Role::Tool,
        _ => Role::Assistant,
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        if req.model.is_empty() {
            return Err(anyhow!("model is required"));
        }

        let payload = OllamaChatRequest {
            model: req.model.clone(),
            messages: req
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: role_to_wire(m.role).to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: false,
            options: Some(json!({
                "temperature": req.temperature,
                "num_predict": req.max_tokens.unwrap_or(0),
            })),
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("failed to call ollama endpoint")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("ollama: status {}: {}", status.as_u16(), body));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .context("failed to parse ollama JSON response")?;

        Ok(ChatResponse {
            message: ChatMessage {
                role: role_from_wire(&parsed.message.role),
                content: parsed.message.content,
                name: None,
            },
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
            provider_name: self.name.clone(),
            model: req.model,
        })
    }
}
