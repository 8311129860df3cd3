//! Provider configurations and the adapters serving them

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::{ProviderConfig, ProviderConfigError, ProviderKind};
use crate::provider::{ClaudeAdapter, OpenAiAdapter, ProviderAdapter};

pub struct ProviderRegistry {
    configs: Mutex<HashMap<ProviderKind, ProviderConfig>>,
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Registry without any adapter; every provider reports not implemented
    pub fn empty() -> Self {
        Self {
            configs: Mutex::new(HashMap::new()),
            adapters: HashMap::new(),
        }
    }

    /// Registry wired with the built-in adapters
    ///
    /// Local models speak the OpenAI wire format. Custom providers have no
    /// adapter.
    pub fn with_default_adapters() -> Self {
        let openai: Arc<dyn ProviderAdapter> = Arc::new(OpenAiAdapter::new());
        Self::empty()
            .with_adapter(ProviderKind::OpenAi, Arc::clone(&openai))
            .with_adapter(ProviderKind::Claude, Arc::new(ClaudeAdapter::new()))
            .with_adapter(ProviderKind::Local, openai)
    }

    pub fn with_adapter(mut self, provider: ProviderKind, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(provider, adapter);
        self
    }

    /// Validate and store a provider config, replacing any previous one
    pub fn register(&self, config: ProviderConfig) -> Result<(), ProviderConfigError> {
        config.validate()?;
        tracing::info!(
            provider = %config.provider,
            model = %config.model,
            enabled = config.enabled,
            "Registered provider"
        );
        self.configs.lock().insert(config.provider, config);
        Ok(())
    }

    pub fn unregister(&self, provider: ProviderKind) -> Option<ProviderConfig> {
        self.configs.lock().remove(&provider)
    }

    pub fn config(&self, provider: ProviderKind) -> Option<ProviderConfig> {
        self.configs.lock().get(&provider).cloned()
    }

    pub fn adapter(&self, provider: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// Whether requests for the provider can currently be served
    pub fn is_available(&self, provider: ProviderKind) -> bool {
        self.adapters.contains_key(&provider)
            && self
                .configs
                .lock()
                .get(&provider)
                .is_some_and(|c| c.enabled)
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        let mut providers: Vec<ProviderKind> = self.configs.lock().keys().copied().collect();
        providers.sort();
        providers
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_default_adapters()
    }
}
