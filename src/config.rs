use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Top-level application configuration loaded from YAML with ENV overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub providers: HashMap<String, ProviderConfig>,
    pub models: HashMap<String, ModelConfig>,
    pub strategy: StrategyConfig,
    pub sandbox: SandboxConfig,
    pub tools: ToolsConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

/// LLM provider endpoint such as OpenAI-compatible gateways or Ollama.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// openai, openrouter, vllm, lmstudio, custom, or ollama
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout_seconds: u64,
    pub max_tokens: u32,
}

/// Binds a logical model name to a provider entry and model parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub default: bool,
    pub expensive: bool,
}

/// Per-role model selections and fallbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub default_model: String,
    pub planner_model: String,
    pub coder_model: String,
    pub critic_model: String,
    /// arbitrary role -> model id
    pub overrides: HashMap<String, String>,
    /// ordered fallback model ids
    pub fallbacks: Vec<String>,
    /// limit expensive model uses per run (0 = unlimited)
    pub max_expensive: usize,
}

/// Command and filesystem restrictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub allow_network: bool,
    pub allow_write: bool,
    pub allowed_commands: Vec<String>,
    pub denied_commands: Vec<String>,
    pub working_dir: String,
    pub timeout_seconds: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_network: false,
            allow_write: false,
            allowed_commands: Vec::new(),
            denied_commands: Vec::new(),
            working_dir: String::new(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub allow_exec: bool,
    pub allow_git: bool,
    pub allow_file_write: bool,
    pub exec_timeout_seconds: u64,
    pub enable_semantic: bool,
    pub semantic_max_files: usize,
    pub semantic_max_file_bytes: usize,
    pub backup_dir: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow_exec: true,
            allow_git: true,
            allow_file_write: true,
            exec_timeout_seconds: 120,
            enable_semantic: false,
            semantic_max_files: 200,
            semantic_max_file_bytes: 65536,
            backup_dir: String::new(),
        }
    }
}

/// Agent core runtime parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub max_tokens: u32,
    pub temperature: f64,
    pub enable_plan: bool,
    pub enable_reflect: bool,
    pub reflection_policy: String,
    pub enable_self_diff: bool,
    pub enable_test_run: bool,
    pub test_command: String,
    pub test_retries: usize,
    pub test_timeout_seconds: u64,
    pub max_context_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 8,
            max_tokens: 1024,
            temperature: 0.2,
            enable_plan: true,
            enable_reflect: true,
            reflection_policy: "block_on_critical".to_string(),
            enable_self_diff: false,
            enable_test_run: false,
            test_command: String::new(),
            test_retries: 0,
            test_timeout_seconds: 0,
            max_context_bytes: 32768,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// debug, info, warn, error
    pub level: String,
    /// console or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "console".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub metrics_enabled: bool,
    /// ws or ndjson
    pub transport: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            metrics_enabled: true,
            transport: "ws".to_string(),
        }
    }
}

const CONFIG_SEARCH: &[&str] = &[
    "configs/config.yaml",
    "config.yaml",
    "configs/config.example.yaml",
];

/// Loads configuration from `path`, or from the default search locations
/// when `path` is empty. Environment variables override file values.
pub fn load(path: &str) -> anyhow::Result<Config> {
    let raw = if path.is_empty() {
        let found = CONFIG_SEARCH.iter().find(|p| Path::new(p).exists());
        match found {
            Some(p) => std::fs::read_to_string(p)
                .with_context(|| format!("failed reading config file {p}"))?,
            None => bail!(
                "no config file found (searched {})",
                CONFIG_SEARCH.join(", ")
            ),
        }
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config file {path}"))?
    };

    let mut cfg: Config = serde_yaml::from_str(&raw).context("failed parsing config YAML")?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Overrides a documented subset of keys from MYCODEX_* env vars, plus
/// per-provider API keys (MYCODEX_PROVIDER_<NAME>_API_KEY).
fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MYCODEX_SERVER_ADDR") {
        cfg.server.addr = v;
    }
    if let Ok(v) = std::env::var("MYCODEX_SERVER_TRANSPORT") {
        cfg.server.transport = v;
    }
    if let Ok(v) = std::env::var("MYCODEX_LOGGING_LEVEL") {
        cfg.logging.level = v;
    }
    if let Ok(v) = std::env::var("MYCODEX_LOGGING_FORMAT") {
        cfg.logging.format = v;
    }
    if let Ok(v) = std::env::var("MYCODEX_SANDBOX_WORKING_DIR") {
        cfg.sandbox.working_dir = v;
    }
    let names: Vec<String> = cfg.providers.keys().cloned().collect();
    for name in names {
        let key = format!(
            "MYCODEX_PROVIDER_{}_API_KEY",
            name.to_uppercase().replace('-', "_")
        );
        if let Ok(v) = std::env::var(&key) {
            if let Some(p) = cfg.providers.get_mut(&name) {
                p.api_key = v;
            }
        }
    }
}

impl Config {
    /// Basic sanity checks on configuration values.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            bail!("at least one provider must be configured");
        }
        if self.models.is_empty() {
            bail!("at least one model must be defined");
        }

        for (name, p) in &self.providers {
            if p.kind.is_empty() {
                bail!("provider {name:?} must define type");
            }
        }

        let mut default_found = false;
        for (name, m) in &self.models {
            if m.provider.is_empty() {
                bail!("model {name:?} must reference provider");
            }
            if !self.providers.contains_key(&m.provider) {
                bail!(
                    "model {name:?} references unknown provider {:?}",
                    m.provider
                );
            }
            if !(0.0..=2.0).contains(&m.temperature) {
                bail!("model {name:?} temperature must be within [0,2]");
            }
            if m.default {
                default_found = true;
            }
        }
        if !default_found {
            bail!("at least one model should be marked as default");
        }

        if self.agent.max_steps == 0 {
            bail!("agent.max_steps must be > 0");
        }
        if self.agent.enable_test_run && self.agent.test_command.trim().is_empty() {
            bail!("agent.test_command must be set when agent.enable_test_run is true");
        }
        match self
            .agent
            .reflection_policy
            .trim()
            .to_lowercase()
            .as_str()
        {
            "" | "block_on_critical" | "never_block" | "warn_only" => {}
            _ => bail!(
                "agent.reflection_policy must be one of block_on_critical, never_block, warn_only"
            ),
        }

        if self.sandbox.timeout_seconds == 0 {
            bail!("sandbox.timeout_seconds must be > 0");
        }
        if self.tools.exec_timeout_seconds == 0 {
            bail!("tools.exec_timeout_seconds must be > 0");
        }

        for model_id in [
            &self.strategy.default_model,
            &self.strategy.planner_model,
            &self.strategy.coder_model,
            &self.strategy.critic_model,
        ] {
            if model_id.trim().is_empty() {
                continue;
            }
            if !self.models.contains_key(model_id) {
                bail!("strategy references unknown model {model_id:?}");
            }
        }
        for model_id in &self.strategy.fallbacks {
            if !self.models.contains_key(model_id) {
                bail!("strategy fallback references unknown model {model_id:?}");
            }
        }
        for model_id in self.strategy.overrides.values() {
            if !self.models.contains_key(model_id) {
                bail!("strategy override references unknown model {model_id:?}");
            }
        }

        match self.server.transport.trim().to_lowercase().as_str() {
            "" | "ws" | "ndjson" => {}
            other => bail!("server.transport must be one of ws or ndjson, got {other:?}"),
        }

        Ok(())
    }
}
