use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::bail;

use crate::llm::{ModelRoute, Provider};

/// Resolves logical model names to providers and tracks metadata.
/// Immutable after construction.
#[derive(Default)]
pub struct Registry {
    providers: HashMap<String, Arc<dyn Provider>>,
    models: HashMap<String, ModelRoute>,
    default_model: String,
    expensive: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&mut self, name: &str, provider: Arc<dyn Provider>) {
        self.providers.insert(name.to_string(), provider);
    }

    pub fn register_model(&mut self, name: &str, mut route: ModelRoute, is_default: bool) {
        route.name = name.to_string();
        self.models.insert(name.to_string(), route);
        if is_default || self.default_model.is_empty() {
            self.default_model = name.to_string();
        }
    }

    pub fn mark_expensive(&mut self, model_id: &str, expensive: bool) {
        if expensive {
            self.expensive.insert(model_id.to_string());
        } else {
            self.expensive.remove(model_id);
        }
    }

    pub fn is_expensive(&self, model_id: &str) -> bool {
        self.expensive.contains(model_id)
    }

    /// Returns the provider and route for a model name (default if empty).
    pub fn resolve(&self, model_name: &str) -> anyhow::Result<(Arc<dyn Provider>, ModelRoute)> {
        let name = if model_name.is_empty() {
            self.default_model.as_str()
        } else {
            model_name
        };

        let Some(route) = self.models.get(name) else {
            bail!("model {name:?} not registered");
        };
        let Some(provider) = self.providers.get(&route.provider) else {
            bail!(
                "provider {:?} not registered for model {name:?}",
                route.provider
            );
        };
        Ok((Arc::clone(provider), route.clone()))
    }
}
