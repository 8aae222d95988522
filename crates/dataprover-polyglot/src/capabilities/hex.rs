//! `hex`: hex encoding for guest code.

use dataprover_codec::{HostValue, hex};

use super::Args;
use crate::error::Result;

pub(super) fn call(method: &str, args: &Args) -> Result<HostValue> {
    match method {
        "decode" => Ok(HostValue::Bytes(hex::decode(args.text(0)?)?)),
        "encode" => Ok(HostValue::Text(hex::encode(&args.bytes(0)?))),
        // Never fails; anything that is not a hex string is simply invalid.
        _ => Ok(HostValue::Bool(
            args.get(0)
                .and_then(HostValue::as_str)
                .is_some_and(hex::is_valid),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(method: &str, values: Vec<HostValue>) -> Result<HostValue> {
        call(method, &Args::new("hex", method, values))
    }

    #[test]
    fn decode_and_encode() {
        assert_eq!(
            run("decode", vec!["0xcafe".into()]).expect("decode"),
            HostValue::Bytes(vec![0xCA, 0xFE])
        );
        assert_eq!(
            run("encode", vec![HostValue::Bytes(vec![0, 255])]).expect("encode"),
            HostValue::from("00ff")
        );
    }

    #[test]
    fn encode_accepts_integer_lists() {
        let list = HostValue::List(vec![HostValue::Int(1), HostValue::Int(2)]);
        assert_eq!(run("encode", vec![list]).expect("encode"), HostValue::from("0102"));
    }

    #[test]
    fn is_valid_hex_never_errors() {
        assert_eq!(run("isValidHex", vec![HostValue::Int(3)]).expect("valid"), HostValue::Bool(false));
        assert_eq!(run("isValidHex", vec!["abc1".into()]).expect("valid"), HostValue::Bool(true));
        assert_eq!(run("isValidHex", vec![]).expect("valid"), HostValue::Bool(false));
    }

    #[test]
    fn bad_hex_is_a_capability_error() {
        assert!(matches!(
            run("decode", vec!["xyz".into()]),
            Err(crate::error::PolyglotError::Capability { .. })
        ));
    }
}
