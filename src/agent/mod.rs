pub mod prompt;
pub mod strategy;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::bail;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::llm::registry::Registry;
use crate::llm::{ChatMessage, ChatRequest, Role};
use crate::agent::types::{AgentRequest, AgentResponse, ReflectionContext};

/// Per-session conversation state. History is append-only; the plan is set
/// once per session while non-empty; the last reflection feeds the next turn.
#[derive(Debug, Default, Clone)]
pub struct Session {
    pub id: String,
    pub history: Vec<ChatMessage>,
    pub plan: String,
    pub last_reflection: String,
}

/// Orchestrates chat calls with history and context handling. Sessions live
/// for the process lifetime behind a single mutex.
pub struct Agent {
    registry: Arc<Registry>,
    cfg: AgentConfig,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Agent {
    pub fn new(registry: Arc<Registry>, cfg: AgentConfig) -> Self {
        Self {
            registry,
            cfg,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Executes a single-turn agent call, maintaining session history.
    pub async fn run(&self, req: AgentRequest) -> anyhow::Result<AgentResponse> {
        if req.prompt.is_empty() {
            bail!("prompt is required");
        }

        let (provider, route) = self.registry.resolve(&req.model)?;

        if self.cfg.enable_plan {
            self.plan(&req).await?;
        }

        let session_id = self.ensure_session(&req.session_id);
        let (prev_assistant, cached_plan, last_reflection, history) =
            self.snapshot_session(&session_id);

        let user_prompt = prompt::build_user_prompt(&req.prompt, &req.context);

        let mut messages = vec![ChatMessage::system(prompt::system_prompt())];
        if !cached_plan.is_empty() {
            messages.push(ChatMessage::assistant(format!(
                "Planned steps:\n{cached_plan}"
            )));
        }
        if !last_reflection.is_empty() {
            messages.push(ChatMessage::assistant(format!(
                "Previous reflection:\n{last_reflection}"
            )));
        }
        messages.extend(history);
        messages.push(ChatMessage::user(user_prompt.clone()));

        let chat_req = ChatRequest {
            model: route.model.clone(),
            messages,
            max_tokens: pick_max_tokens(self.cfg.max_tokens, route.max_tokens),
            temperature: pick_temperature(self.cfg.temperature, route.temperature),
            stream: false,
        };

        let resp = provider.chat(chat_req).await?;

        self.append_history(
            &session_id,
            ChatMessage::user(user_prompt),
            resp.message.clone(),
        );

        Ok(AgentResponse {
            message: resp.message,
            route,
            finish_reason: resp.finish_reason,
            previous_assistant: prev_assistant,
        })
    }

    /// Builds and caches a short plan for the session when enabled.
    /// Returns the cached plan without a provider call on later invocations.
    pub async fn plan(&self, req: &AgentRequest) -> anyhow::Result<String> {
        if !self.cfg.enable_plan {
            return Ok(String::new());
        }
        if req.prompt.trim().is_empty() {
            bail!("prompt is required");
        }

        let session_id = self.ensure_session(&req.session_id);
        {
            let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(s) = sessions.get(&session_id) {
                if !s.plan.is_empty() {
                    return Ok(s.plan.clone());
                }
            }
        }

        let (provider, route) = self.registry.resolve(&req.model)?;

        let messages = vec![
            ChatMessage::system(prompt::plan_system_prompt()),
            ChatMessage::user(prompt::build_plan_user_prompt(&req.prompt)),
        ];

        let chat_req = ChatRequest {
            model: route.model.clone(),
            messages,
            max_tokens: pick_max_tokens(self.cfg.max_tokens, route.max_tokens),
            temperature: pick_temperature(self.cfg.temperature, route.temperature),
            stream: false,
        };

        let resp = provider.chat(chat_req).await?;
        let plan = resp.message.content.trim().to_string();

        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(s) = sessions.get_mut(&session_id) {
            s.plan = plan.clone();
        }
        Ok(plan)
    }

    /// Critiques the last response and records the reflection for future
    /// turns (both as history and as the session's last reflection).
    pub async fn reflect(
        &self,
        req: &AgentRequest,
        last: &AgentResponse,
        ctx: ReflectionContext,
    ) -> anyhow::Result<String> {
        if !self.cfg.enable_reflect {
            return Ok(String::new());
        }
        if last.message.content.trim().is_empty() {
            bail!("last message is required for reflection");
        }

        let session_id = self.ensure_session(&req.session_id);
        let (provider, route) = self.registry.resolve(&req.model)?;

        let plan = {
            let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
            sessions
                .get(&session_id)
                .map(|s| s.plan.clone())
                .unwrap_or_default()
        };

        let messages = vec![
            ChatMessage::system(prompt::reflect_system_prompt()),
            ChatMessage::user(prompt::build_reflect_user_prompt(
                &req.prompt,
                &last.message.content,
                &plan,
                &ctx,
            )),
        ];

        let chat_req = ChatRequest {
            model: route.model.clone(),
            messages,
            max_tokens: pick_max_tokens(self.cfg.max_tokens, route.max_tokens),
            temperature: pick_temperature(self.cfg.temperature, route.temperature),
            stream: false,
        };

        let resp = provider.chat(chat_req).await?;
        let reflection = resp.message.content.trim().to_string();

        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(s) = sessions.get_mut(&session_id) {
            s.last_reflection = reflection.clone();
            s.history.push(ChatMessage {
                role: Role::Assistant,
                content: format!("Reflection: {reflection}"),
                name: None,
            });
        }
        Ok(reflection)
    }

    pub fn max_steps(&self) -> usize {
        if self.cfg.max_steps > 0 {
            self.cfg.max_steps
        } else {
            1
        }
    }

    pub fn planning_enabled(&self) -> bool {
        self.cfg.enable_plan
    }

    pub fn reflection_enabled(&self) -> bool {
        self.cfg.enable_reflect
    }

    pub fn reflection_policy(&self) -> String {
        let policy = self.cfg.reflection_policy.trim().to_lowercase();
        if policy.is_empty() {
            "block_on_critical".to_string()
        } else {
            policy
        }
    }

    pub fn test_run_enabled(&self) -> bool {
        self.cfg.enable_test_run && !self.cfg.test_command.trim().is_empty()
    }

    pub fn test_command(&self) -> &str {
        &self.cfg.test_command
    }

    pub fn test_retries(&self) -> usize {
        self.cfg.test_retries
    }

    pub fn test_timeout_seconds(&self) -> u64 {
        self.cfg.test_timeout_seconds
    }

    pub fn max_context_bytes(&self) -> usize {
        self.cfg.max_context_bytes
    }

    pub fn enable_self_diff(&self) -> bool {
        self.cfg.enable_self_diff
    }

    /// Exposes session state for tests and diagnostics.
    pub fn session_snapshot(&self, id: &str) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    fn ensure_session(&self, id: &str) -> String {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let id = if id.is_empty() {
            format!("sess-{}", Uuid::new_v4())
        } else {
            id.to_string()
        };
        sessions.entry(id.clone()).or_insert_with(|| Session {
            id: id.clone(),
            ..Default::default()
        });
        id
    }

    fn snapshot_session(&self, id: &str) -> (String, String, String, Vec<ChatMessage>) {
        let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let Some(s) = sessions.get(id) else {
            return (String::new(), String::new(), String::new(), Vec::new());
        };
        let prev_assistant = s
            .history
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        (
            prev_assistant,
            s.plan.clone(),
            s.last_reflection.clone(),
            s.history.clone(),
        )
    }

    fn append_history(&self, id: &str, user: ChatMessage, assistant: ChatMessage) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(s) = sessions.get_mut(id) {
            s.history.push(user);
            s.history.push(assistant);
        }
    }
}

fn pick_temperature(agent_temp: f64, route_temp: f64) -> f64 {
    if agent_temp > 0.0 {
        agent_temp
    } else if route_temp > 0.0 {
        route_temp
    } else {
        0.2
    }
}

fn pick_max_tokens(agent_max: u32, route_max: u32) -> Option<u32> {
    if agent_max > 0 {
        Some(agent_max)
    } else if route_max > 0 {
        Some(route_max)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::llm::mock::{canned_response, MockProvider};
    use crate::llm::ModelRoute;

    fn registry_with_provider(provider: MockProvider) -> Arc<Registry> {
        let mut reg = Registry::new();
        reg.register_provider("mock", Arc::new(provider));
        reg.register_model(
            "fast",
            ModelRoute {
                provider: "mock".to_string(),
                model: "phys".to_string(),
                ..Default::default()
            },
            true,
        );
        Arc::new(reg)
    }

    fn agent_cfg(enable_plan: bool, enable_reflect: bool) -> AgentConfig {
        AgentConfig {
            enable_plan,
            enable_reflect,
            ..Default::default()
        }
    }

    fn request(session: &str, prompt: &str) -> AgentRequest {
        AgentRequest {
            session_id: session.to_string(),
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn run_appends_user_and_assistant_to_history() {
        let agent = Agent::new(
            registry_with_provider(MockProvider::with_response("answer", "stop")),
            agent_cfg(false, false),
        );
        let resp = agent.run(request("s1", "question")).await.expect("run");
        assert_eq!(resp.message.content, "answer");
        assert_eq!(resp.finish_reason, "stop");

        let session = agent.session_snapshot("s1").expect("session");
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, Role::User);
        assert_eq!(session.history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn run_rejects_empty_prompt() {
        let agent = Agent::new(
            registry_with_provider(MockProvider::with_content("x")),
            agent_cfg(false, false),
        );
        assert!(agent.run(request("s1", "")).await.is_err());
    }

    #[tokio::test]
    async fn plan_is_cached_per_session() {
        let seen = Arc::new(Mutex::new(0usize));
        let seen_clone = Arc::clone(&seen);
        let provider = MockProvider::new(move |_| {
            *seen_clone.lock().unwrap() += 1;
            Ok(canned_response("1) inspect\n2) edit", ""))
        });
        let agent = Agent::new(registry_with_provider(provider), agent_cfg(true, false));

        let first = agent.plan(&request("s1", "task")).await.expect("plan");
        let second = agent.plan(&request("s1", "task")).await.expect("plan");
        assert_eq!(first, "1) inspect\n2) edit");
        assert_eq!(first, second);
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn run_injects_plan_and_reflection_hints() {
        let seen = Arc::new(Mutex::new(Vec::<ChatMessage>::new()));
        let seen_clone = Arc::clone(&seen);
        let provider = MockProvider::new(move |req| {
            *seen_clone.lock().unwrap() = req.messages.clone();
            Ok(canned_response("ok", "stop"))
        });
        let agent = Agent::new(registry_with_provider(provider), agent_cfg(false, true));

        // Seed plan and reflection directly through the public operations.
        {
            let mut sessions = agent.sessions.lock().unwrap();
            sessions.insert(
                "s1".to_string(),
                Session {
                    id: "s1".to_string(),
                    plan: "1) read".to_string(),
                    last_reflection: "looks fine".to_string(),
                    history: Vec::new(),
                },
            );
        }

        agent.run(request("s1", "go")).await.expect("run");
        let messages = seen.lock().unwrap().clone();
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].content.starts_with("Planned steps:\n1) read"));
        assert!(messages[2]
            .content
            .starts_with("Previous reflection:\nlooks fine"));
        assert_eq!(messages.last().unwrap().content, "go");
    }

    #[tokio::test]
    async fn reflect_records_history_entry_and_last_reflection() {
        let agent = Agent::new(
            registry_with_provider(MockProvider::with_response(
                r#"{"quality":"ok","block_apply":false}"#,
                "stop",
            )),
            agent_cfg(false, true),
        );
        let last = AgentResponse {
            message: ChatMessage::assistant("did the thing"),
            route: ModelRoute::default(),
            finish_reason: "stop".to_string(),
            previous_assistant: String::new(),
        };
        let text = agent
            .reflect(&request("s1", "task"), &last, ReflectionContext::default())
            .await
            .expect("reflect");
        assert!(text.contains("block_apply"));

        let session = agent.session_snapshot("s1").expect("session");
        assert_eq!(session.last_reflection, text);
        assert!(session
            .history
            .iter()
            .any(|m| m.role == Role::Assistant && m.content == format!("Reflection: {text}")));
    }

    #[tokio::test]
    async fn reflect_requires_last_message() {
        let agent = Agent::new(
            registry_with_provider(MockProvider::with_content("x")),
            agent_cfg(false, true),
        );
        let last = AgentResponse {
            message: ChatMessage::assistant("   "),
            route: ModelRoute::default(),
            finish_reason: String::new(),
            previous_assistant: String::new(),
        };
        assert!(agent
            .reflect(&request("s1", "t"), &last, ReflectionContext::default())
            .await
            .is_err());
    }

    #[test]
    fn temperature_pick_prefers_agent_then_route() {
        assert_eq!(pick_temperature(0.7, 0.3), 0.7);
        assert_eq!(pick_temperature(0.0, 0.3), 0.3);
        assert_eq!(pick_temperature(0.0, 0.0), 0.2);
    }

    #[test]
    fn max_tokens_pick_prefers_agent_then_route_then_unset() {
        assert_eq!(pick_max_tokens(512, 256), Some(512));
        assert_eq!(pick_max_tokens(0, 256), Some(256));
        assert_eq!(pick_max_tokens(0, 0), None);
    }

    #[test]
    fn max_steps_zero_treated_as_one() {
        let mut cfg = agent_cfg(false, false);
        cfg.max_steps = 0;
        let agent = Agent::new(registry_with_provider(MockProvider::with_content("x")), cfg);
        assert_eq!(agent.max_steps(), 1);
    }

    #[test]
    fn reflection_policy_defaults_when_blank() {
        let mut cfg = agent_cfg(false, true);
        cfg.reflection_policy = "  ".to_string();
        let agent = Agent::new(registry_with_provider(MockProvider::with_content("x")), cfg);
        assert_eq!(agent.reflection_policy(), "block_on_critical");
    }
}
