use std::sync::Arc;

use crate::config::StrategyConfig;
use crate::llm::registry::Registry;
use crate::llm::{ModelRoute, Provider};

/// Chooses models for the planner/coder/critic roles, honoring overrides,
/// the ordered fallback chain, and the expensive-model budget.
pub struct StrategyEngine {
    registry: Arc<Registry>,
    cfg: StrategyConfig,
}

/// A resolved model choice for one call.
pub struct Selection {
    pub provider: Arc<dyn Provider>,
    pub route: ModelRoute,
    pub chosen: String,
    pub expensive: bool,
}

impl StrategyEngine {
    pub fn new(registry: Arc<Registry>, cfg: StrategyConfig) -> Self {
        Self { registry, cfg }
    }

    /// Picks a model for a role; the first resolvable candidate of
    /// [override, overrides[role], role model, default model] wins, then the
    /// fallback chain, then the registry default.
    pub fn resolve_model(
        &self,
        role: &str,
        override_model: &str,
    ) -> anyhow::Result<(Arc<dyn Provider>, ModelRoute)> {
        let role = role.trim().to_lowercase();
        let candidates = [
            override_model,
            self.cfg.overrides.get(&role).map(String::as_str).unwrap_or(""),
            self.role_model(&role),
            self.cfg.default_model.as_str(),
        ];
        let model_id = candidates
            .iter()
            .find(|c| !c.trim().is_empty())
            .copied()
            .unwrap_or("");

        if !model_id.is_empty() {
            if let Ok(resolved) = self.registry.resolve(model_id) {
                return Ok(resolved);
            }
        }
        for fb in &self.cfg.fallbacks {
            if let Ok(resolved) = self.registry.resolve(fb) {
                return Ok(resolved);
            }
        }
        self.registry.resolve("")
    }

    /// Chooses a model honoring max_expensive; `expensive_used` is the
    /// count so far in this run.
    pub fn pick_with_budget(
        &self,
        role: &str,
        override_model: &str,
        expensive_used: usize,
    ) -> anyhow::Result<Selection> {
        let (mut provider, mut route) = self.resolve_model(role, override_model)?;
        let mut chosen = route.name.clone();
        let mut expensive = self.registry.is_expensive(&chosen);

        let over_budget =
            |is_exp: bool| self.cfg.max_expensive > 0 && is_exp && expensive_used >= self.cfg.max_expensive;

        if over_budget(expensive) {
            for fb in &self.cfg.fallbacks {
                let Ok((p, r)) = self.registry.resolve(fb) else {
                    continue;
                };
                chosen = r.name.clone();
                provider = p;
                route = r;
                expensive = self.registry.is_expensive(&chosen);
                break;
            }
        }
        // Still expensive over budget with no usable fallback: drop to the
        // default model when available, then proceed with whatever remains.
        if over_budget(expensive) && !self.cfg.default_model.is_empty() {
            if let Ok((p, r)) = self.registry.resolve(&self.cfg.default_model) {
                chosen = r.name.clone();
                provider = p;
                route = r;
                expensive = self.registry.is_expensive(&chosen);
            }
        }

        Ok(Selection {
            provider,
            route,
            chosen,
            expensive,
        })
    }

    /// Returns the first non-empty fallback different from `current`.
    pub fn next_fallback(&self, current: &str) -> String {
        for fb in &self.cfg.fallbacks {
            if fb.trim().is_empty() || fb == current {
                continue;
            }
            return fb.clone();
        }
        String::new()
    }

    fn role_model(&self, role: &str) -> &str {
        match role {
            "planner" => &self.cfg.planner_model,
            "critic" | "reflect" => &self.cfg.critic_model,
            _ => &self.cfg.coder_model,
        }
    }
}
