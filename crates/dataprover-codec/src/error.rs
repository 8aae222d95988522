//! Codec error types.
//!
//! Every fallible operation in this crate returns [`CodecError`].

/// Unified error type for value classification and binary encoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A value could not be mapped onto a canonical variant.
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),

    /// Hex input was odd-length or contained non-hex characters.
    #[error("invalid hex string: {reason}")]
    InvalidHex {
        /// What was wrong with the input.
        reason: String,
    },

    /// A textual chain identifier failed validation.
    #[error("invalid address: {reason}")]
    InvalidAddress {
        /// What was wrong with the identifier.
        reason: String,
    },

    /// Bech32 encoding or decoding failed.
    #[error("bech32 error: {0}")]
    Bech32(String),

    /// A value cannot be expressed as Plutus data.
    #[error("invalid plutus data: {0}")]
    InvalidPlutusData(String),
}

impl CodecError {
    pub(crate) fn hex(reason: impl Into<String>) -> Self {
        Self::InvalidHex {
            reason: reason.into(),
        }
    }

    pub(crate) fn address(reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the codec crate.
pub type Result<T> = std::result::Result<T, CodecError>;
