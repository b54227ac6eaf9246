use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, ChatRequest, ChatResponse, Provider, Role, Usage};

/// OpenAI-compatible chat provider (/v1/chat/completions). Also covers
/// openrouter, vllm, lmstudio and custom gateways speaking the same dialect.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base = if base_url.is_empty() {
            "https://api.openai.com"
        } else {
            base_url
        };
        let timeout = if timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            timeout
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building openai http client")?;
        Ok(Self {
            name: name.to_string(),
            client,
            base_url: base.trim_end_matches('/').to_string(),
            api_key: if api_key.is_empty() {
                None
            } else {
                Some(api_key.to_string())
            },
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct OpenAiMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

fn role_from_wire(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "user" => Role::User,
        "tool" => Role::Tool,
        _ => Role::Assistant,
    }
}

fn role_to_wire(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn to_wire_messages(msgs: &[ChatMessage]) -> Vec<OpenAiMessage> {
    msgs.iter()
        .map(|m| OpenAiMessage {
            role: role_to_wire(m.role).to_string(),
            content: m.content.clone(),
            name: m.name.clone(),
        })
        .collect()
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        if req.model.is_empty() {
            return Err(anyhow!("model is required"));
        }

        let payload = OpenAiChatRequest {
            model: req.model.clone(),
            messages: to_wire_messages(&req.messages),
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("failed to call OpenAI-compatible endpoint")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("openai: status {}: {}", status.as_u16(), body));
        }

        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .context("failed to parse OpenAI-compatible JSON response")?;

        let first = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("openai: empty choices"))?;

        Ok(ChatResponse {
            message: ChatMessage {
                role: role_from_wire(&first.message.role),
                content: first.message.content,
                name: first.message.name,
            },
            finish_reason: first.finish_reason.unwrap_or_default(),
            usage: Usage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
            provider_name: self.name.clone(),
            model: req.model,
        })
    }
}
