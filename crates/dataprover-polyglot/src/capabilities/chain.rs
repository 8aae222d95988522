//! `chainAddress`: Cardano address helpers for guest code.

use dataprover_codec::{HostValue, address, hex};

use super::Args;
use crate::error::Result;

pub(super) fn call(method: &str, args: &Args) -> Result<HostValue> {
    match method {
        "bytesToBech32" => Ok(HostValue::Text(address::bech32_encode(
            args.text(1)?,
            &args.bytes(0)?,
        )?)),
        "bech32ToBytes" => Ok(HostValue::Bytes(address::bech32_decode(args.text(0)?)?.1)),
        _ => {
            // Every other method has a `...Hex` twin returning the same bytes
            // as a hex string.
            let (base, as_hex) = match method.strip_suffix("Hex") {
                Some(base) => (base, true),
                None => (method, false),
            };
            let input = args.text(0)?;
            let bytes = match base {
                "stakeAddressToCredentialHash" => address::stake_address_to_credential_hash(input)?,
                "poolIdToKeyHash" => address::pool_id_to_key_hash(input)?,
                "paymentCredentialHash" => address::payment_credential_hash(input)?,
                // `addressToHex` pairs with `addressToBytes`.
                _ => address::address_to_bytes(input)?,
            };
            Ok(if as_hex {
                HostValue::Text(hex::encode(&bytes))
            } else {
                HostValue::Bytes(bytes)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(method: &str, values: Vec<HostValue>) -> Result<HostValue> {
        call(method, &Args::new("chainAddress", method, values))
    }

    fn stake_test_address() -> String {
        let mut payload = vec![0xe0];
        payload.extend_from_slice(&[0x7c; 28]);
        address::bech32_encode("stake_test", &payload).expect("encoding must succeed")
    }

    #[test]
    fn credential_hash_as_bytes_and_hex() {
        let addr = stake_test_address();
        assert_eq!(
            run("stakeAddressToCredentialHash", vec![addr.clone().into()]).expect("hash"),
            HostValue::Bytes(vec![0x7c; 28])
        );
        assert_eq!(
            run("stakeAddressToCredentialHashHex", vec![addr.into()]).expect("hash"),
            HostValue::Text("7c".repeat(28))
        );
    }

    #[test]
    fn address_hex_twin_matches_bytes() {
        let addr = stake_test_address();
        let HostValue::Bytes(bytes) =
            run("addressToBytes", vec![addr.clone().into()]).expect("bytes")
        else {
            panic!("expected bytes");
        };
        assert_eq!(
            run("addressToHex", vec![addr.into()]).expect("hex"),
            HostValue::Text(hex::encode(&bytes))
        );
    }

    #[test]
    fn pool_id_from_hex() {
        let id = "ab".repeat(28);
        assert_eq!(
            run("poolIdToKeyHash", vec![id.into()]).expect("pool"),
            HostValue::Bytes(vec![0xab; 28])
        );
    }

    #[test]
    fn bech32_round_trip_through_capability() {
        let encoded = run(
            "bytesToBech32",
            vec![HostValue::Bytes(vec![1, 2, 3]), "pool".into()],
        )
        .expect("encode");
        let HostValue::Text(text) = &encoded else {
            panic!("expected text");
        };
        assert!(text.starts_with("pool1"));
        assert_eq!(
            run("bech32ToBytes", vec![encoded]).expect("decode"),
            HostValue::Bytes(vec![1, 2, 3])
        );
    }

    #[test]
    fn non_string_address_is_rejected() {
        assert!(run("addressToBytes", vec![HostValue::Int(1)]).is_err());
    }
}
