use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::config::{Config, ProviderConfig};
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAiProvider;
use crate::llm::registry::Registry;
use crate::llm::{ModelRoute, Provider};

/// Constructs the model registry and provider instances from config.
pub fn build_registry(cfg: &Config) -> anyhow::Result<Registry> {
    let mut reg = Registry::new();

    for (name, p_cfg) in &cfg.providers {
        let provider = build_provider(name, p_cfg)
            .with_context(|| format!("failed building provider {name:?}"))?;
        reg.register_provider(name, provider);
    }

    for (name, m_cfg) in &cfg.models {
        reg.register_model(
            name,
            ModelRoute {
                name: String::new(),
                provider: m_cfg.provider.clone(),
                model: m_cfg.model.clone(),
                temperature: m_cfg.temperature,
                max_tokens: m_cfg.max_tokens,
            },
            m_cfg.default,
        );
        if m_cfg.expensive {
            reg.mark_expensive(name, true);
        }
    }

    // Default resolution must succeed before the daemon accepts runs.
    reg.resolve("")?;

    Ok(reg)
}

fn build_provider(name: &str, cfg: &ProviderConfig) -> anyhow::Result<Arc<dyn Provider>> {
    let timeout = Duration::from_secs(cfg.timeout_seconds);
    match cfg.kind.as_str() {
        "openai" | "openrouter" | "vllm" | "lmstudio" | "custom" => Ok(Arc::new(
            OpenAiProvider::new(name, &cfg.base_url, &cfg.api_key, timeout)?,
        )),
        "ollama" => Ok(Arc::new(OllamaProvider::new(name, &cfg.base_url, timeout)?)),
        other => bail!("unknown provider type {other:?} for provider {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    fn config() -> Config {
        let mut cfg = Config::default();
        cfg.providers.insert(
            "local".to_string(),
            ProviderConfig {
                kind: "ollama".to_string(),
                ..Default::default()
            },
        );
        cfg.providers.insert(
            "gateway".to_string(),
            ProviderConfig {
                kind: "openai".to_string(),
                base_url: "http://localhost:8000".to_string(),
                ..Default::default()
            },
        );
        cfg.models.insert(
            "fast".to_string(),
            ModelConfig {
                provider: "local".to_string(),
                model: "llama3".to_string(),
                default: true,
                ..Default::default()
            },
        );
        cfg.models.insert(
            "smart".to_string(),
            ModelConfig {
                provider: "gateway".to_string(),
                model: "gpt-4o".to_string(),
                expensive: true,
                ..Default::default()
            },
        );
        cfg
    }

    #[test]
    fn builds_registry_with_routes_and_flags() {
        let reg = build_registry(&config()).expect("build");
        let (_, route) = reg.resolve("").expect("default");
        assert_eq!(route.name, "fast");
        assert!(reg.is_expensive("smart"));
        assert!(!reg.is_expensive("fast"));
    }

    #[test]
    fn unknown_provider_type_fails() {
        let mut cfg = config();
        cfg.providers.get_mut("local").unwrap().kind = "quantum".to_string();
        assert!(build_registry(&cfg).is_err());
    }

    #[test]
    fn model_referencing_missing_provider_fails_resolution() {
        let mut cfg = config();
        cfg.models.get_mut("fast").unwrap().provider = "ghost".to_string();
        assert!(build_registry(&cfg).is_err());
    }
}
