//! Hex encoding with optional `0x` prefix.

use crate::error::{CodecError, Result};

/// Lowercase hex without prefix.
pub fn encode(bytes: &[u8]) -> String {
    ::hex::encode(bytes)
}

/// Decode hex, accepting an optional `0x`/`0X` prefix and surrounding
/// whitespace.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    ::hex::decode(strip_prefix(input.trim())).map_err(CodecError::from)
}

/// `true` when `input` is non-empty, even-length hex (prefix allowed).
pub fn is_valid(input: &str) -> bool {
    let s = strip_prefix(input.trim());
    !s.is_empty() && ::hex::decode(s).is_ok()
}

fn strip_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

impl From<::hex::FromHexError> for CodecError {
    fn from(err: ::hex::FromHexError) -> Self {
        match err {
            ::hex::FromHexError::OddLength => Self::hex("odd length"),
            ::hex::FromHexError::InvalidHexCharacter { c, index } => {
                Self::hex(format!("non-hex character {c:?} at offset {index}"))
            }
            other => Self::hex(other.to_string()),
        }
    }
}
