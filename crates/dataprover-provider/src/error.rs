//! Provider error types.
//!
//! Everything that crosses the [`DataProvider`](crate::DataProvider) contract
//! fails with [`ProviderError`]. Variants mirror the runtime's failure
//! taxonomy so callers can tell a missing entry point from a sandbox
//! violation without inspecting strings.

use dataprover_codec::CodecError;

/// Unified error type for data providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    // -- Script contract --
    /// A required entry point is not defined by the provider.
    #[error("provider `{provider}` does not define required entry point `{entry_point}`")]
    EntryPointMissing {
        provider: String,
        entry_point: String,
    },

    /// An optional operation the provider does not implement.
    #[error("provider `{provider}` does not support `{operation}`")]
    Unsupported { provider: String, operation: String },

    /// A value could not be classified.
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),

    /// The provider script failed while running.
    #[error("script error in `{provider}`: {reason}")]
    Script { provider: String, reason: String },

    // -- Capabilities --
    /// A sandboxed path escaped the provider directory.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// A host capability call failed.
    #[error("{capability} capability failed: {reason}")]
    Capability { capability: String, reason: String },

    // -- Lifecycle --
    /// No provider is registered under this name.
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// The provider has not been initialized (usually missing configuration).
    #[error("provider `{0}` is not initialized; configure it first")]
    NotInitialized(String),

    /// Configuration could not be resolved or persisted.
    #[error("configuration error: {0}")]
    Config(String),

    // -- Ingestion --
    /// Writing to the ingestion target failed.
    #[error("ingestion into `{target}` failed: {reason}")]
    Ingestion { target: String, reason: String },

    /// Catch-all for unexpected internal errors.
    #[error("internal provider error: {0}")]
    Internal(String),
}

impl From<CodecError> for ProviderError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedValueType(what) => Self::UnsupportedValueType(what),
            other => Self::Capability {
                capability: "codec".into(),
                reason: other.to_string(),
            },
        }
    }
}

/// Convenience alias used throughout the provider crate.
pub type Result<T> = std::result::Result<T, ProviderError>;
