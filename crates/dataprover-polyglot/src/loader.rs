//! Plugin loader.
//!
//! [`PluginLoader`] discovers provider directories under a plugins
//! directory, loads each into a [`PolyglotProvider`], registers it, and
//! initializes it when it has enough configuration to do so.
//!
//! A provider directory is `<plugins>/<any>/manifest.json` plus the script
//! named after the manifest's language. Directories missing either are
//! skipped silently; a provider that fails to load is reported and skipped
//! without affecting the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dataprover_provider::{
    ConfigResolver, DataProvider, ProviderConfig, ProviderRegistry, ProviderStatus,
};

use crate::adapter::PolyglotProvider;
use crate::error::{PolyglotError, Result};
use crate::manifest::{MANIFEST_FILE, ProviderManifest};

/// A provider that made it through loading.
#[derive(Debug, Clone)]
pub struct LoadedProvider {
    pub provider: Arc<PolyglotProvider>,
    pub status: ProviderStatus,
}

impl LoadedProvider {
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn manifest(&self) -> &ProviderManifest {
        self.provider.manifest()
    }
}

/// Outcome of a load pass.
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<LoadedProvider>,
    /// Directories that failed, with the reason.
    pub failed: Vec<(PathBuf, String)>,
}

impl LoadSummary {
    /// Providers that are initialized and ready to fetch.
    pub fn available(&self) -> impl Iterator<Item = &LoadedProvider> {
        self.loaded
            .iter()
            .filter(|p| p.status == ProviderStatus::Available)
    }
}

/// Discovers, registers and initializes script providers.
pub struct PluginLoader {
    plugins_dir: PathBuf,
    registry: ProviderRegistry,
    resolver: ConfigResolver,
}

impl PluginLoader {
    pub fn new(plugins_dir: PathBuf, registry: ProviderRegistry, resolver: ConfigResolver) -> Self {
        tracing::info!(plugins_dir = %plugins_dir.display(), "plugin loader created");
        Self {
            plugins_dir,
            registry,
            resolver,
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    /// Subdirectories that contain a manifest, sorted.
    pub async fn discover(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.plugins_dir;
        if !dir.exists() {
            tracing::warn!(path = %dir.display(), "plugins directory does not exist");
            return Ok(Vec::new());
        }
        if !dir.is_dir() {
            return Err(PolyglotError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{} is not a directory", dir.display()),
            )));
        }

        let mut found = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if path.join(MANIFEST_FILE).is_file() {
                found.push(path);
            } else {
                tracing::trace!(path = %path.display(), "no manifest, skipping");
            }
        }
        found.sort();
        tracing::info!(
            plugins_dir = %dir.display(),
            count = found.len(),
            "discovered provider directories"
        );
        Ok(found)
    }

    /// Load every provider under the plugins directory.
    ///
    /// Only an unreadable plugins directory fails the pass.
    pub async fn load_all(&self) -> Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        for dir in self.discover().await? {
            let manifest = match ProviderManifest::load(&dir) {
                Ok(manifest) => manifest,
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "invalid manifest, skipping");
                    summary.failed.push((dir, err.to_string()));
                    continue;
                }
            };
            if !manifest.script_path(&dir).is_file() {
                tracing::debug!(
                    path = %dir.display(),
                    script = manifest.language.default_file(),
                    "script file missing, skipping"
                );
                continue;
            }
            match self.load_manifest(manifest, &dir).await {
                Ok(loaded) => summary.loaded.push(loaded),
                Err(err) => {
                    tracing::warn!(path = %dir.display(), error = %err, "failed to load provider, skipping");
                    summary.failed.push((dir, err.to_string()));
                }
            }
        }
        tracing::info!(
            loaded = summary.loaded.len(),
            available = summary.available().count(),
            failed = summary.failed.len(),
            "plugin load pass finished"
        );
        Ok(summary)
    }

    /// Load, register and possibly initialize the provider in `dir`.
    pub async fn load_provider(&self, dir: &Path) -> Result<LoadedProvider> {
        let manifest = ProviderManifest::load(dir)?;
        self.load_manifest(manifest, dir).await
    }

    async fn load_manifest(&self, manifest: ProviderManifest, dir: &Path) -> Result<LoadedProvider> {
        let provider = Arc::new(PolyglotProvider::from_manifest(manifest, dir).await?);
        let name = provider.name().to_owned();
        if let Some(previous) = self.registry.register(provider.clone()) {
            previous.close().await;
        }

        let status = match self.configure(&provider).await {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(provider = %name, error = %err, "provider initialization failed");
                ProviderStatus::Error
            }
        };
        tracing::info!(
            provider = %name,
            language = %provider.manifest().language,
            status = %status,
            "loaded provider"
        );
        Ok(LoadedProvider { provider, status })
    }

    /// Resolve configuration and initialize when possible.
    ///
    /// A provider whose connection schema has required fields and that has
    /// no explicit configuration is left waiting for configuration.
    async fn configure(&self, provider: &PolyglotProvider) -> Result<ProviderStatus> {
        let name = provider.name();
        let schema = provider.connection_config_schema().await?;
        let config = self.resolve(provider, &schema.defaults()).await?;

        let explicit = self.resolver.has_explicit(name).await?;
        if !explicit && schema.has_required_fields() {
            tracing::info!(provider = %name, "provider needs configuration, not initializing");
            return Ok(ProviderStatus::NotConfigured);
        }
        provider.initialize(&config).await?;
        Ok(ProviderStatus::Available)
    }

    /// Effective configuration for `provider` on top of `defaults`.
    pub async fn resolve(
        &self,
        provider: &PolyglotProvider,
        defaults: &ProviderConfig,
    ) -> Result<ProviderConfig> {
        let mut layered = defaults.clone();
        if let Some(schedule) = &provider.manifest().schedule {
            layered.extend(schedule.default_config());
        }
        Ok(self.resolver.resolve(provider.name(), &layered).await?)
    }
}
