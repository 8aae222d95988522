//! Provider registry.
//!
//! Backed by [`DashMap`] so the loader, scheduler and hot-reload watcher can
//! share it across tasks without a global lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{ProviderError, Result};
use crate::traits::DataProvider;

struct Entry {
    provider: Arc<dyn DataProvider>,
    registered_at: DateTime<Utc>,
}

/// Concurrent provider registry, cheaply cloneable.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    inner: Arc<DashMap<String, Entry>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous one.
    ///
    /// Returns the replaced provider so the caller can close it.
    pub fn register(&self, provider: Arc<dyn DataProvider>) -> Option<Arc<dyn DataProvider>> {
        let name = provider.name().to_owned();
        let previous = self.inner.insert(
            name.clone(),
            Entry {
                provider,
                registered_at: Utc::now(),
            },
        );
        if previous.is_some() {
            tracing::warn!(provider = %name, "provider re-registered, replacing previous instance");
        } else {
            tracing::info!(provider = %name, "provider registered");
        }
        previous.map(|e| e.provider)
    }

    /// Remove a provider.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn DataProvider>> {
        let removed = self.inner.remove(name).map(|(_, e)| e.provider);
        if removed.is_some() {
            tracing::info!(provider = %name, "provider unregistered");
        }
        removed
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn DataProvider>> {
        self.inner
            .get(name)
            .map(|e| Arc::clone(&e.provider))
            .ok_or_else(|| ProviderError::ProviderNotFound(name.to_owned()))
    }

    /// When the provider was registered.
    pub fn registered_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.inner.get(name).map(|e| e.registered_at)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// All providers, sorted by name.
    pub fn providers(&self) -> Vec<Arc<dyn DataProvider>> {
        let mut all: Vec<_> = self
            .inner
            .iter()
            .map(|e| Arc::clone(&e.value().provider))
            .collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use dataprover_codec::Record;

    use super::*;
    use crate::types::ProviderConfig;

    struct Named(&'static str);

    #[async_trait]
    impl DataProvider for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test provider"
        }
        async fn initialize(&self, _config: &ProviderConfig) -> Result<()> {
            Ok(())
        }
        async fn fetch_data(&self, _config: &ProviderConfig) -> Result<Vec<Record>> {
            Ok(Vec::new())
        }
        async fn serialize_key(&self, _record: &Record) -> Result<Vec<u8>> {
            Ok(vec![1])
        }
        async fn serialize_value(&self, _record: &Record) -> Result<Vec<u8>> {
            Ok(vec![2])
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = ProviderRegistry::new();
        assert!(registry.register(Arc::new(Named("pools"))).is_none());
        assert!(registry.contains("pools"));
        assert_eq!(registry.get("pools").expect("registered").name(), "pools");
        assert!(registry.registered_at("pools").is_some());
    }

    #[test]
    fn missing_provider_is_an_error() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(ProviderError::ProviderNotFound(ref n)) if n == "nope"
        ));
    }

    #[test]
    fn re_register_returns_previous() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(Named("pools")));
        let previous = registry.register(Arc::new(Named("pools")));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_are_sorted() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(Named("zeta")));
        registry.register(Arc::new(Named("alpha")));
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        assert_eq!(registry.providers()[0].name(), "alpha");
        assert!(registry.unregister("alpha").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn default_contract_methods() {
        let provider = Named("defaults");
        let record = Record::new();
        assert!(provider.validate(&record).await.expect("default validate").valid);
        assert!(provider.test_configuration(&record).await.expect("default test").success);
        assert!(matches!(
            provider.serialize_key_from_input("abc").await,
            Err(ProviderError::Unsupported { .. })
        ));
    }
}
