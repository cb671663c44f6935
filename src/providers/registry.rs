use super::MetadataProvider;
use std::sync::Arc;

/// Ordered set of metadata providers. The first registered provider is the
/// primary; the rest are tried in order when an id lookup comes back empty.
pub struct ProviderChain {
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Register a provider at the end of the chain
    pub fn register(&mut self, provider: Arc<dyn MetadataProvider>) {
        if self
            .providers
            .iter()
            .any(|p| p.source_name() == provider.source_name())
        {
            log::warn!("Provider '{}' already registered", provider.source_name());
            return;
        }
        self.providers.push(provider);
    }

    pub fn with(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn primary(&self) -> Option<&Arc<dyn MetadataProvider>> {
        self.providers.first()
    }

    /// Providers in fallback order
    pub fn all(&self) -> &[Arc<dyn MetadataProvider>] {
        &self.providers
    }
}

impl Default for ProviderChain {
    fn default() -> Self {
        Self::new()
    }
}
