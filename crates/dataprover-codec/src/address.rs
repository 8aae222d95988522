//! Cardano address and identifier utilities.
//!
//! Shelley addresses are bech32 strings whose payload starts with a header
//! byte: the high nibble selects the address type, the low nibble the
//! network. Credential hashes are 28 bytes.

use bech32::{Bech32, Hrp};

use crate::error::{CodecError, Result};
use crate::hex;

/// Length of a key or script credential hash.
pub const CREDENTIAL_HASH_LEN: usize = 28;

/// The shape of a Shelley address, from the header's high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Header types 0-3: payment and delegation credentials.
    Base,
    /// Header types 4-5: payment credential plus a chain pointer.
    Pointer,
    /// Header types 6-7: payment credential only.
    Enterprise,
    /// Header types 14-15: stake (reward) address.
    Reward,
}

impl AddressKind {
    fn from_header(header: u8) -> Result<Self> {
        match header >> 4 {
            0..=3 => Ok(Self::Base),
            4 | 5 => Ok(Self::Pointer),
            6 | 7 => Ok(Self::Enterprise),
            14 | 15 => Ok(Self::Reward),
            8 => Err(CodecError::address("byron addresses are not bech32 encoded")),
            other => Err(CodecError::address(format!("unknown address type {other}"))),
        }
    }

    fn min_len(self) -> usize {
        match self {
            Self::Base => 1 + 2 * CREDENTIAL_HASH_LEN,
            Self::Pointer => 1 + CREDENTIAL_HASH_LEN + 3,
            Self::Enterprise | Self::Reward => 1 + CREDENTIAL_HASH_LEN,
        }
    }
}

/// Decode any bech32 string into its human-readable part and payload.
pub fn bech32_decode(input: &str) -> Result<(String, Vec<u8>)> {
    let (hrp, data) =
        bech32::decode(input.trim()).map_err(|e| CodecError::Bech32(e.to_string()))?;
    Ok((hrp.to_string(), data))
}

/// Encode a payload under the given human-readable prefix.
pub fn bech32_encode(prefix: &str, data: &[u8]) -> Result<String> {
    let hrp = Hrp::parse(prefix).map_err(|e| CodecError::Bech32(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| CodecError::Bech32(e.to_string()))
}

/// Decode a Shelley address and check its header and length.
pub fn address_to_bytes(address: &str) -> Result<Vec<u8>> {
    let (hrp, bytes) = bech32_decode(address)?;
    let kind = classify(&bytes)?;
    let expected = match kind {
        AddressKind::Reward => "stake",
        _ => "addr",
    };
    if hrp != expected && hrp != format!("{expected}_test") {
        return Err(CodecError::address(format!(
            "prefix {hrp:?} does not match a {kind:?} address"
        )));
    }
    Ok(bytes)
}

/// Classify raw address bytes.
pub fn classify(bytes: &[u8]) -> Result<AddressKind> {
    let header = *bytes
        .first()
        .ok_or_else(|| CodecError::address("empty address payload"))?;
    let kind = AddressKind::from_header(header)?;
    if bytes.len() < kind.min_len() {
        return Err(CodecError::address(format!(
            "{kind:?} address needs at least {} bytes, got {}",
            kind.min_len(),
            bytes.len()
        )));
    }
    Ok(kind)
}

/// The 28-byte delegation credential of a stake address, or of the
/// delegation part of a base address.
pub fn stake_address_to_credential_hash(address: &str) -> Result<Vec<u8>> {
    let bytes = address_to_bytes(address)?;
    match classify(&bytes)? {
        AddressKind::Reward => Ok(bytes[1..=CREDENTIAL_HASH_LEN].to_vec()),
        AddressKind::Base => Ok(bytes[1 + CREDENTIAL_HASH_LEN..1 + 2 * CREDENTIAL_HASH_LEN].to_vec()),
        kind => Err(CodecError::address(format!(
            "{kind:?} address carries no delegation credential"
        ))),
    }
}

/// The 28-byte payment credential of a base, pointer or enterprise address.
pub fn payment_credential_hash(address: &str) -> Result<Vec<u8>> {
    let bytes = address_to_bytes(address)?;
    match classify(&bytes)? {
        AddressKind::Reward => Err(CodecError::address(
            "stake addresses carry no payment credential",
        )),
        _ => Ok(bytes[1..=CREDENTIAL_HASH_LEN].to_vec()),
    }
}

/// The 28-byte key hash of a pool, from either a `pool1...` bech32 id or
/// 56 hex characters.
pub fn pool_id_to_key_hash(pool_id: &str) -> Result<Vec<u8>> {
    let pool_id = pool_id.trim();
    let bytes = if pool_id.starts_with("pool") {
        let (hrp, data) = bech32_decode(pool_id)?;
        if hrp != "pool" {
            return Err(CodecError::address(format!("unexpected pool prefix {hrp:?}")));
        }
        data
    } else {
        hex::decode(pool_id)?
    };
    if bytes.len() != CREDENTIAL_HASH_LEN {
        return Err(CodecError::address(format!(
            "pool key hash must be {CREDENTIAL_HASH_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stake_test_address(hash: u8) -> String {
        let mut payload = vec![0xe0];
        payload.extend_from_slice(&[hash; CREDENTIAL_HASH_LEN]);
        bech32_encode("stake_test", &payload).expect("encoding must succeed")
    }

    fn base_address() -> String {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&[0x11; CREDENTIAL_HASH_LEN]);
        payload.extend_from_slice(&[0x22; CREDENTIAL_HASH_LEN]);
        bech32_encode("addr_test", &payload).expect("encoding must succeed")
    }

    #[test]
    fn stake_credential_from_reward_address() {
        let addr = stake_test_address(0x5a);
        assert!(addr.starts_with("stake_test1"));
        let hash = stake_address_to_credential_hash(&addr).expect("must extract");
        assert_eq!(hash, vec![0x5a; CREDENTIAL_HASH_LEN]);
    }

    #[test]
    fn base_address_has_both_credentials() {
        let addr = base_address();
        assert_eq!(
            payment_credential_hash(&addr).expect("payment part"),
            vec![0x11; CREDENTIAL_HASH_LEN]
        );
        assert_eq!(
            stake_address_to_credential_hash(&addr).expect("delegation part"),
            vec![0x22; CREDENTIAL_HASH_LEN]
        );
    }

    #[test]
    fn reward_address_has_no_payment_credential() {
        assert!(payment_credential_hash(&stake_test_address(1)).is_err());
    }

    #[test]
    fn corrupted_checksum_fails() {
        let mut addr = stake_test_address(0x01);
        let last = addr.pop().expect("non-empty");
        addr.push(if last == 'q' { 'p' } else { 'q' });
        assert!(matches!(
            stake_address_to_credential_hash(&addr),
            Err(CodecError::Bech32(_))
        ));
    }

    #[test]
    fn truncated_payload_fails() {
        let short = bech32_encode("stake_test", &[0xe0, 0x01, 0x02]).expect("encodes");
        assert!(matches!(
            address_to_bytes(&short),
            Err(CodecError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn wrong_prefix_fails() {
        let mut payload = vec![0xe0];
        payload.extend_from_slice(&[0u8; CREDENTIAL_HASH_LEN]);
        let addr = bech32_encode("addr_test", &payload).expect("encodes");
        assert!(address_to_bytes(&addr).is_err());
    }

    #[test]
    fn pool_id_from_hex_and_bech32() {
        let hex_id = "ab".repeat(CREDENTIAL_HASH_LEN);
        let from_hex = pool_id_to_key_hash(&hex_id).expect("hex pool id");
        assert_eq!(from_hex, vec![0xab; CREDENTIAL_HASH_LEN]);

        let bech = bech32_encode("pool", &from_hex).expect("encodes");
        assert_eq!(pool_id_to_key_hash(&bech).expect("bech32 pool id"), from_hex);

        assert!(pool_id_to_key_hash("abcd").is_err());
    }
}
