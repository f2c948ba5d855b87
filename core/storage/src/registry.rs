//! Client registry for resolving clients from persisted configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use cloudstorage_common::{Error, Provider, Result};

use crate::client::Client;
use crate::storage::CloudStorage;

/// Factory function type for creating clients.
pub type ClientFactory = Box<dyn Fn(Value) -> Result<Arc<dyn Client>> + Send + Sync>;

/// Registry of client factories, one per provider.
///
/// Lets callers (the CLI, tests) build a client from a provider name and its
/// JSON configuration without knowing the concrete client type.
pub struct ClientRegistry {
    factories: HashMap<Provider, ClientFactory>,
}

impl ClientRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a client factory.
    ///
    /// # Preconditions
    /// - `provider` must not be registered yet
    ///
    /// # Errors
    /// - Returns error if the provider is already registered
    pub fn register(&mut self, provider: Provider, factory: ClientFactory) -> Result<()> {
        if self.factories.contains_key(&provider) {
            return Err(Error::InvalidInput(format!(
                "Provider '{}' is already registered",
                provider
            )));
        }
        self.factories.insert(provider, factory);
        Ok(())
    }

    /// Build a client for `provider` from its configuration.
    ///
    /// # Errors
    /// - Provider not registered
    /// - Configuration invalid
    pub fn resolve(&self, provider: Provider, config: Value) -> Result<Arc<dyn Client>> {
        let factory = self.factories.get(&provider).ok_or_else(|| {
            Error::InvalidInput(format!("Provider '{}' is not registered", provider))
        })?;
        factory(config)
    }

    /// Build a client and wrap it in a storage facade.
    pub fn create_storage(&self, provider: Provider, config: Value) -> Result<CloudStorage> {
        self.resolve(provider, config).map(CloudStorage::new)
    }

    /// Registered providers, in stable order.
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self.factories.keys().copied().collect();
        providers.sort();
        providers
    }

    pub fn has_provider(&self, provider: Provider) -> bool {
        self.factories.contains_key(&provider)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;

    fn memory_factory(provider: Provider) -> ClientFactory {
        Box::new(move |_| Ok(Arc::new(MemoryClient::new(provider))))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ClientRegistry::new();
        registry
            .register(Provider::WebDAV, memory_factory(Provider::WebDAV))
            .unwrap();

        let client = registry.resolve(Provider::WebDAV, Value::Null).unwrap();
        assert_eq!(client.provider(), Provider::WebDAV);

        let storage = registry.create_storage(Provider::WebDAV, Value::Null).unwrap();
        assert_eq!(storage.provider(), Provider::WebDAV);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ClientRegistry::new();
        registry
            .register(Provider::Dropbox, memory_factory(Provider::Dropbox))
            .unwrap();
        let result = registry.register(Provider::Dropbox, memory_factory(Provider::Dropbox));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = ClientRegistry::new();
        assert!(registry.resolve(Provider::Dropbox, Value::Null).is_err());
        assert!(!registry.has_provider(Provider::Dropbox));
    }

    #[test]
    fn test_factory_config_errors_propagate() {
        let mut registry = ClientRegistry::new();
        registry
            .register(
                Provider::WebDAV,
                Box::new(|config| {
                    config
                        .get("baseUrl")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| Error::InvalidInput("baseUrl is required".to_string()))?;
                    Ok(Arc::new(MemoryClient::new(Provider::WebDAV)))
                }),
            )
            .unwrap();

        assert!(registry.resolve(Provider::WebDAV, Value::Null).is_err());
        assert!(registry
            .resolve(Provider::WebDAV, serde_json::json!({ "baseUrl": "http://x" }))
            .is_ok());
    }

    #[test]
    fn test_providers_list() {
        let mut registry = ClientRegistry::new();
        registry
            .register(Provider::WebDAV, memory_factory(Provider::WebDAV))
            .unwrap();
        registry
            .register(Provider::Dropbox, memory_factory(Provider::Dropbox))
            .unwrap();
        assert_eq!(registry.providers(), vec![Provider::Dropbox, Provider::WebDAV]);
    }
}
