//! Polyglot runtime error types.
//!
//! All runtime subsystems surface errors through [`PolyglotError`]. At the
//! provider contract boundary it converts one to one into
//! [`ProviderError`].

use std::path::PathBuf;

use dataprover_codec::CodecError;
use dataprover_provider::ProviderError;

/// Unified error type for the polyglot provider runtime.
#[derive(Debug, thiserror::Error)]
pub enum PolyglotError {
    // -- Script lifecycle --
    /// The script failed to parse or evaluate.
    #[error("failed to load script for `{provider}`: {reason}")]
    ScriptLoad { provider: String, reason: String },

    /// A required entry point is not exported by the script.
    #[error("provider `{provider}` does not define required entry point `{entry_point}`")]
    EntryPointMissing {
        provider: String,
        entry_point: String,
    },

    /// An entry point raised an error in guest code.
    #[error("`{entry_point}` failed in `{provider}`: {reason}")]
    Script {
        provider: String,
        entry_point: String,
        reason: String,
    },

    /// An optional operation the script does not implement.
    #[error("provider `{provider}` does not support `{operation}`")]
    Unsupported { provider: String, operation: String },

    /// The execution context has been closed.
    #[error("execution context for `{0}` is closed")]
    ContextClosed(String),

    /// The provider has not been initialized.
    #[error("provider `{0}` is not initialized; configure it first")]
    NotInitialized(String),

    // -- Value bridge --
    /// A value could not be classified.
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),

    // -- Capabilities --
    /// A sandboxed path resolved outside the provider directory, or a
    /// disabled permission was used.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// A host capability call failed.
    #[error("{capability} capability failed: {reason}")]
    Capability { capability: String, reason: String },

    // -- Loading, scheduling, watching --
    /// A manifest could not be read or is invalid.
    #[error("invalid manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    /// A schedule specification is invalid.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// The file watcher failed.
    #[error("watch error: {0}")]
    Watch(String),

    /// An error from the provider layer (registry, ingestion).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PolyglotError {
    pub(crate) fn capability(capability: &str, reason: impl std::fmt::Display) -> Self {
        Self::Capability {
            capability: capability.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<CodecError> for PolyglotError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedValueType(what) => Self::UnsupportedValueType(what),
            other => Self::capability("codec", other),
        }
    }
}

impl From<PolyglotError> for ProviderError {
    fn from(err: PolyglotError) -> Self {
        match err {
            PolyglotError::EntryPointMissing {
                provider,
                entry_point,
            } => Self::EntryPointMissing {
                provider,
                entry_point,
            },
            PolyglotError::Unsupported {
                provider,
                operation,
            } => Self::Unsupported {
                provider,
                operation,
            },
            PolyglotError::Script {
                provider,
                entry_point,
                reason,
            } => Self::Script {
                provider,
                reason: format!("{entry_point}: {reason}"),
            },
            PolyglotError::ScriptLoad { provider, reason } => Self::Script { provider, reason },
            PolyglotError::UnsupportedValueType(what) => Self::UnsupportedValueType(what),
            PolyglotError::SecurityViolation(what) => Self::SecurityViolation(what),
            PolyglotError::Capability { capability, reason } => {
                Self::Capability { capability, reason }
            }
            PolyglotError::NotInitialized(provider) => Self::NotInitialized(provider),
            PolyglotError::Provider(inner) => inner,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the polyglot crate.
pub type Result<T> = std::result::Result<T, PolyglotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_load_display() {
        let err = PolyglotError::ScriptLoad {
            provider: "pools".into(),
            reason: "SyntaxError: unexpected token".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to load script for `pools`: SyntaxError: unexpected token"
        );
    }

    #[test]
    fn manifest_display_includes_path() {
        let err = PolyglotError::Manifest {
            path: PathBuf::from("/plugins/x/manifest.json"),
            reason: "missing name".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid manifest /plugins/x/manifest.json: missing name"
        );
    }

    #[test]
    fn security_violation_survives_contract_boundary() {
        let err: ProviderError = PolyglotError::SecurityViolation("../etc".into()).into();
        assert!(matches!(err, ProviderError::SecurityViolation(_)));
    }

    #[test]
    fn unsupported_survives_contract_boundary() {
        let err: ProviderError = PolyglotError::Unsupported {
            provider: "p".into(),
            operation: "serializeKeyFromInput".into(),
        }
        .into();
        assert!(matches!(err, ProviderError::Unsupported { .. }));
    }

    #[test]
    fn codec_unsupported_value_maps_directly() {
        let err: PolyglotError = CodecError::UnsupportedValueType("symbol".into()).into();
        assert!(matches!(err, PolyglotError::UnsupportedValueType(_)));
    }
}
