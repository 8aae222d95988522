//! [`DataProvider`] implementation backed by a provider script.
//!
//! [`PolyglotProvider`] owns the live [`ExecutionContext`] behind an async
//! mutex: entry-point calls, initialization and reloads are serialized, so a
//! caller never observes a half-replaced script. Schema queries and
//! configuration tests run in short-lived contexts of their own and never
//! touch the live one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dataprover_codec::{HostValue, Record};
use dataprover_provider::{
    ConfigSchema, ConfigTestResult, DataProvider, ProviderConfig, ProviderMetadata,
    ProviderStatus, ValidationResult,
};
use tokio::sync::Mutex;

use crate::context::{ContextState, ExecutionContext};
use crate::engine::entry;
use crate::error::{PolyglotError, Result};
use crate::manifest::ProviderManifest;

struct Live {
    context: ExecutionContext,
    /// Config of the last successful `initialize` / `reconfigure`, replayed
    /// on reload.
    last_config: Option<ProviderConfig>,
}

/// A data provider implemented by a JavaScript or Python script.
pub struct PolyglotProvider {
    manifest: ProviderManifest,
    directory: PathBuf,
    script_path: PathBuf,
    live: Mutex<Live>,
}

impl std::fmt::Debug for PolyglotProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolyglotProvider")
            .field("name", &self.manifest.name)
            .field("language", &self.manifest.language)
            .field("script_path", &self.script_path)
            .finish_non_exhaustive()
    }
}

impl PolyglotProvider {
    /// Read the manifest in `directory` and load its script.
    pub async fn open(directory: &Path) -> Result<Self> {
        let manifest = ProviderManifest::load(directory)?;
        Self::from_manifest(manifest, directory).await
    }

    /// Load the script for an already parsed manifest.
    pub async fn from_manifest(manifest: ProviderManifest, directory: &Path) -> Result<Self> {
        let script_path = manifest.script_path(directory);
        let mut context = ExecutionContext::create(
            &manifest.name,
            manifest.language,
            &script_path,
            manifest.sandbox.clone(),
        )
        .await?;
        if let Err(err) = context.load().await {
            context.close().await;
            return Err(err);
        }
        for required in entry::REQUIRED {
            if !context.has_entry_point(required) {
                tracing::warn!(
                    provider = %manifest.name,
                    entry_point = %required,
                    "script does not define a required entry point"
                );
            }
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            script_path,
            live: Mutex::new(Live {
                context,
                last_config: None,
            }),
            manifest,
        })
    }

    pub fn manifest(&self) -> &ProviderManifest {
        &self.manifest
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// State of the live execution context.
    pub async fn state(&self) -> ContextState {
        self.live.lock().await.context.state()
    }

    /// Entry points the live script defines.
    pub async fn entry_points(&self) -> Vec<String> {
        self.live.lock().await.context.entry_points().to_vec()
    }

    /// Replace the live script with the current file contents.
    ///
    /// An initialized provider is re-initialized with its last config before
    /// the swap. On failure the previous script stays live.
    pub async fn reload(&self) -> Result<()> {
        let mut live = self.live.lock().await;
        let config = match live.context.state() {
            ContextState::Initialized => live.last_config.clone(),
            _ => None,
        };
        live.context.reload(config.as_ref()).await
    }

    /// A fresh, loaded context independent of the live one. Callers close it.
    async fn scratch(&self) -> Result<ExecutionContext> {
        let mut context = ExecutionContext::create(
            &self.manifest.name,
            self.manifest.language,
            &self.script_path,
            self.manifest.sandbox.clone(),
        )
        .await?;
        if let Err(err) = context.load().await {
            context.close().await;
            return Err(err);
        }
        Ok(context)
    }

    async fn schema(&self, entry_point: &str) -> Result<ConfigSchema> {
        let mut context = self.scratch().await?;
        let result = if context.has_entry_point(entry_point) {
            context
                .call(entry_point, vec![])
                .await
                .map(|value| ConfigSchema::from_host(&value))
        } else {
            Ok(ConfigSchema::default())
        };
        context.close().await;
        result
    }

    async fn try_configuration(&self, config: &ProviderConfig) -> Result<ConfigTestResult> {
        let mut context = self.scratch().await?;
        let result = if context.has_entry_point(entry::TEST_CONFIGURATION) {
            context
                .call(entry::TEST_CONFIGURATION, vec![HostValue::Map(config.clone())])
                .await
                .map(|value| ConfigTestResult::from_host(&value))
        } else {
            Ok(ConfigTestResult::ok())
        };
        context.close().await;
        result
    }

    fn ensure_initialized(&self, live: &Live) -> Result<()> {
        match live.context.state() {
            ContextState::Initialized => Ok(()),
            _ => Err(PolyglotError::NotInitialized(self.manifest.name.clone())),
        }
    }

    fn unsupported(&self, operation: &str) -> PolyglotError {
        PolyglotError::Unsupported {
            provider: self.manifest.name.clone(),
            operation: operation.to_owned(),
        }
    }

    async fn call_bytes(&self, entry_point: &str, arg: HostValue) -> Result<Vec<u8>> {
        let live = self.live.lock().await;
        self.call_bytes_in(&live, entry_point, arg).await
    }

    async fn call_bytes_in(&self, live: &Live, entry_point: &str, arg: HostValue) -> Result<Vec<u8>> {
        self.ensure_initialized(live)?;
        let value = live.context.call(entry_point, vec![arg]).await?;
        into_bytes(value, entry_point)
    }
}

/// Interpret an entry-point result as a byte string.
fn into_bytes(value: HostValue, entry_point: &str) -> Result<Vec<u8>> {
    let value = value.detect_byte_like();
    value.to_byte_vec().ok_or_else(|| {
        PolyglotError::UnsupportedValueType(format!(
            "{entry_point} must return bytes, got {}",
            value.type_name()
        ))
    })
}

/// Interpret a `fetchData` result as a list of records.
fn into_records(value: HostValue) -> Result<Vec<Record>> {
    match value {
        HostValue::Null => Ok(Vec::new()),
        HostValue::List(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                HostValue::Map(record) => Ok(record),
                other => Err(PolyglotError::UnsupportedValueType(format!(
                    "fetchData record {i} is {}, expected an object",
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(PolyglotError::UnsupportedValueType(format!(
            "fetchData must return a list of records, got {}",
            other.type_name()
        ))),
    }
}

#[async_trait]
impl DataProvider for PolyglotProvider {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn metadata(&self) -> ProviderMetadata {
        self.manifest.metadata()
    }

    async fn status(&self) -> ProviderStatus {
        match self.live.lock().await.context.state() {
            ContextState::Initialized => ProviderStatus::Available,
            ContextState::Failed | ContextState::Closed => ProviderStatus::Error,
            _ => ProviderStatus::NotConfigured,
        }
    }

    async fn initialize(&self, config: &ProviderConfig) -> dataprover_provider::Result<()> {
        let mut live = self.live.lock().await;
        live.context.initialize(config).await?;
        live.last_config = Some(config.clone());
        tracing::info!(provider = %self.manifest.name, "provider initialized");
        Ok(())
    }

    async fn fetch_data(&self, config: &ProviderConfig) -> dataprover_provider::Result<Vec<Record>> {
        let live = self.live.lock().await;
        self.ensure_initialized(&live)?;
        let value = live
            .context
            .call(entry::FETCH_DATA, vec![HostValue::Map(config.clone())])
            .await?;
        let records = into_records(value)?;
        tracing::debug!(provider = %self.manifest.name, count = records.len(), "records fetched");
        Ok(records)
    }

    async fn serialize_key(&self, record: &Record) -> dataprover_provider::Result<Vec<u8>> {
        Ok(self
            .call_bytes(entry::SERIALIZE_KEY, HostValue::Map(record.clone()))
            .await?)
    }

    async fn serialize_value(&self, record: &Record) -> dataprover_provider::Result<Vec<u8>> {
        Ok(self
            .call_bytes(entry::SERIALIZE_VALUE, HostValue::Map(record.clone()))
            .await?)
    }

    async fn validate(&self, record: &Record) -> dataprover_provider::Result<ValidationResult> {
        let live = self.live.lock().await;
        self.ensure_initialized(&live)?;
        if !live.context.has_entry_point(entry::VALIDATE) {
            return Ok(ValidationResult::ok());
        }
        let value = live
            .context
            .call(entry::VALIDATE, vec![HostValue::Map(record.clone())])
            .await?;
        Ok(ValidationResult::from_host(&value))
    }

    async fn config_schema(&self) -> dataprover_provider::Result<ConfigSchema> {
        Ok(self.schema(entry::GET_CONFIG_SCHEMA).await?)
    }

    async fn connection_config_schema(&self) -> dataprover_provider::Result<ConfigSchema> {
        Ok(self.schema(entry::GET_CONNECTION_CONFIG_SCHEMA).await?)
    }

    async fn test_configuration(
        &self,
        config: &ProviderConfig,
    ) -> dataprover_provider::Result<ConfigTestResult> {
        let result = self.try_configuration(config).await;
        match result {
            Ok(result) => Ok(result),
            Err(err @ PolyglotError::Script { .. }) => Ok(ConfigTestResult::failed(err.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn reconfigure(&self, config: &ProviderConfig) -> dataprover_provider::Result<()> {
        let mut live = self.live.lock().await;
        let initialized = live.context.state() == ContextState::Initialized;
        if initialized && live.context.has_entry_point(entry::RECONFIGURE) {
            live.context
                .call(entry::RECONFIGURE, vec![HostValue::Map(config.clone())])
                .await?;
        } else {
            live.context.initialize(config).await?;
        }
        live.last_config = Some(config.clone());
        tracing::info!(provider = %self.manifest.name, "provider reconfigured");
        Ok(())
    }

    async fn serialize_key_from_input(&self, input: &str) -> dataprover_provider::Result<Vec<u8>> {
        // One guard: a reload must not slip between the check and the call.
        let live = self.live.lock().await;
        if !live.context.has_entry_point(entry::SERIALIZE_KEY_FROM_INPUT) {
            return Err(self.unsupported(entry::SERIALIZE_KEY_FROM_INPUT).into());
        }
        Ok(self
            .call_bytes_in(&live, entry::SERIALIZE_KEY_FROM_INPUT, HostValue::from(input))
            .await?)
    }

    async fn close(&self) {
        self.live.lock().await.context.close().await;
    }
}
