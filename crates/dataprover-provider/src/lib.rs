//! Data provider contract for the Cardano data prover.
//!
//! - **[`traits`]** -- [`DataProvider`], implemented by every provider.
//! - **[`types`]** -- configuration schemas, validation and test results,
//!   status and metadata.
//! - **[`registry`]** -- [`ProviderRegistry`], the concurrent name lookup.
//! - **[`config`]** -- [`ConfigResolver`] layering of defaults, static and
//!   persisted configuration.
//! - **[`ingest`]** -- the trie storage interfaces and [`IngestionService`].

pub mod config;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod traits;
pub mod types;

pub use config::{ConfigResolver, ConfigStore, MASKED, MemoryConfigStore, mask_secrets};
pub use error::{ProviderError, Result};
pub use ingest::{
    IngestionReport, IngestionService, Ingestor, MemoryTrieStore, TargetManager, TrieStore,
};
pub use registry::ProviderRegistry;
pub use traits::DataProvider;
pub use types::{
    ConfigField, ConfigFieldType, ConfigSchema, ConfigTestResult, FieldOption, FieldValidation,
    ProviderConfig, ProviderMetadata, ProviderStatus, ValidationResult,
};
