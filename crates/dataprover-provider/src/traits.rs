//! The generic data provider contract.
//!
//! Native and scripted providers both implement [`DataProvider`]; the
//! ingestion pipeline, scheduler and registry only ever see this trait.

use async_trait::async_trait;
use dataprover_codec::Record;

use crate::error::{ProviderError, Result};
use crate::types::{
    ConfigSchema, ConfigTestResult, ProviderConfig, ProviderMetadata, ProviderStatus,
    ValidationResult,
};

/// A source of records that can be serialized into trie entries.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Unique provider name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Descriptive metadata for listings.
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: self.name().to_owned(),
            description: self.description().to_owned(),
            ..ProviderMetadata::default()
        }
    }

    /// Current readiness.
    async fn status(&self) -> ProviderStatus {
        ProviderStatus::Available
    }

    /// Prepare the provider with connection settings.
    async fn initialize(&self, config: &ProviderConfig) -> Result<()>;

    /// Fetch records for one ingestion run.
    async fn fetch_data(&self, config: &ProviderConfig) -> Result<Vec<Record>>;

    /// Trie key for a record.
    async fn serialize_key(&self, record: &Record) -> Result<Vec<u8>>;

    /// Trie value for a record.
    async fn serialize_value(&self, record: &Record) -> Result<Vec<u8>>;

    /// Check a record before it is serialized.
    async fn validate(&self, _record: &Record) -> Result<ValidationResult> {
        Ok(ValidationResult::ok())
    }

    /// Fields the data configuration form should show.
    async fn config_schema(&self) -> Result<ConfigSchema> {
        Ok(ConfigSchema::default())
    }

    /// Fields the connection configuration form should show.
    async fn connection_config_schema(&self) -> Result<ConfigSchema> {
        Ok(ConfigSchema::default())
    }

    /// Try a configuration without applying it.
    async fn test_configuration(&self, _config: &ProviderConfig) -> Result<ConfigTestResult> {
        Ok(ConfigTestResult::ok())
    }

    /// Apply new connection settings to a running provider.
    async fn reconfigure(&self, config: &ProviderConfig) -> Result<()> {
        self.initialize(config).await
    }

    /// Build a trie key from user-supplied text (e.g. a proof lookup form).
    async fn serialize_key_from_input(&self, _input: &str) -> Result<Vec<u8>> {
        Err(ProviderError::Unsupported {
            provider: self.name().to_owned(),
            operation: "serializeKeyFromInput".into(),
        })
    }

    /// Release resources held by the provider.
    async fn close(&self) {}
}
