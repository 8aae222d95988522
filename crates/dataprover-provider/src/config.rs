//! Layered provider configuration.
//!
//! Effective configuration is merged key by key from, lowest first:
//!
//! 1. defaults (schema `defaultValue`s, then manifest defaults),
//! 2. static configuration (config file, then `DATAPROVER_PROVIDER_*`
//!    environment variables),
//! 3. dynamically saved configuration from a [`ConfigStore`].
//!
//! Secret fields are masked as [`MASKED`] when rendered for display, and a
//! masked value sent back in an update keeps the stored secret.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dataprover_codec::HostValue;

use crate::error::Result;
use crate::types::{ConfigSchema, ProviderConfig};

/// Placeholder shown instead of secret values.
pub const MASKED: &str = "****";

/// Prefix of per-provider environment variables.
pub const ENV_PREFIX: &str = "DATAPROVER_PROVIDER_";

/// Persisted, dynamically editable provider configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Saved configuration for a provider, if any.
    async fn load(&self, provider: &str) -> Result<Option<ProviderConfig>>;

    /// Replace the saved configuration for a provider.
    async fn save(&self, provider: &str, config: ProviderConfig) -> Result<()>;
}

/// In-process [`ConfigStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryConfigStore {
    entries: Arc<DashMap<String, ProviderConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self, provider: &str) -> Result<Option<ProviderConfig>> {
        Ok(self.entries.get(provider).map(|e| e.value().clone()))
    }

    async fn save(&self, provider: &str, config: ProviderConfig) -> Result<()> {
        self.entries.insert(provider.to_owned(), config);
        Ok(())
    }
}

/// Merges configuration layers for providers.
#[derive(Clone, Default)]
pub struct ConfigResolver {
    static_config: HashMap<String, ProviderConfig>,
    store: Option<Arc<dyn ConfigStore>>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a static configuration table for one provider.
    pub fn with_static(mut self, provider: impl Into<String>, config: ProviderConfig) -> Self {
        self.static_config
            .entry(provider.into())
            .or_default()
            .extend(config);
        self
    }

    /// Layer `DATAPROVER_PROVIDER_<NAME>_<KEY>` variables over the static
    /// configuration of providers in `names`.
    pub fn with_env<I, K, V>(mut self, names: &[String], vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let prefixes: Vec<(String, &String)> = names
            .iter()
            .map(|n| (format!("{ENV_PREFIX}{}_", env_name(n)), n))
            .collect();
        for (key, value) in vars {
            let key = key.as_ref();
            // Longest prefix first so `POOL_STATS_` wins over `POOL_`.
            let matched = prefixes
                .iter()
                .filter(|(p, _)| key.starts_with(p.as_str()))
                .max_by_key(|(p, _)| p.len());
            if let Some((prefix, name)) = matched {
                let field = key[prefix.len()..].to_ascii_lowercase();
                if field.is_empty() {
                    continue;
                }
                self.static_config
                    .entry((*name).clone())
                    .or_default()
                    .insert(field, HostValue::Text(value.into()));
            }
        }
        self
    }

    /// Use a persisted store as the top layer.
    pub fn with_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Static configuration for a provider (file and environment layers).
    pub fn static_for(&self, provider: &str) -> ProviderConfig {
        self.static_config.get(provider).cloned().unwrap_or_default()
    }

    /// Merge all layers over `defaults`.
    pub async fn resolve(&self, provider: &str, defaults: &ProviderConfig) -> Result<ProviderConfig> {
        let mut merged = defaults.clone();
        if let Some(layer) = self.static_config.get(provider) {
            merge(&mut merged, layer);
        }
        if let Some(store) = &self.store {
            if let Some(saved) = store.load(provider).await? {
                merge(&mut merged, &saved);
            }
        }
        tracing::debug!(provider = %provider, keys = merged.len(), "configuration resolved");
        Ok(merged)
    }

    /// Whether anything beyond defaults was configured.
    pub async fn has_explicit(&self, provider: &str) -> Result<bool> {
        if self.static_config.get(provider).is_some_and(|c| !c.is_empty()) {
            return Ok(true);
        }
        match &self.store {
            Some(store) => Ok(store.load(provider).await?.is_some_and(|c| !c.is_empty())),
            None => Ok(false),
        }
    }

    /// Apply an update to the persisted layer, keeping stored secrets when
    /// the update carries the mask value.
    pub async fn save(
        &self,
        provider: &str,
        update: &ProviderConfig,
        schema: &ConfigSchema,
    ) -> Result<ProviderConfig> {
        let Some(store) = &self.store else {
            return Err(crate::ProviderError::Config(
                "no configuration store attached".into(),
            ));
        };
        let mut saved = store.load(provider).await?.unwrap_or_default();
        let secrets: Vec<&str> = schema.secret_fields().collect();
        for (key, value) in update {
            let keeps_secret = secrets.contains(&key.as_str()) && value.as_str() == Some(MASKED);
            if !keeps_secret {
                saved.insert(key.clone(), value.clone());
            }
        }
        store.save(provider, saved.clone()).await?;
        tracing::info!(provider = %provider, "configuration saved");
        Ok(saved)
    }
}

/// Replace secret values with [`MASKED`] for display.
pub fn mask_secrets(config: &ProviderConfig, schema: &ConfigSchema) -> ProviderConfig {
    let secrets: Vec<&str> = schema.secret_fields().collect();
    config
        .iter()
        .map(|(k, v)| {
            let shown = if secrets.contains(&k.as_str()) && !v.is_null() {
                HostValue::from(MASKED)
            } else {
                v.clone()
            };
            (k.clone(), shown)
        })
        .collect()
}

/// Environment form of a provider name: upper case, `-` and `.` as `_`.
pub fn env_name(provider: &str) -> String {
    provider
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

fn merge(into: &mut ProviderConfig, layer: &ProviderConfig) {
    for (k, v) in layer {
        into.insert(k.clone(), v.clone());
    }
}
