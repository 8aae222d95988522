//! `plutusBuilder`: Plutus data serialized in one call.

use dataprover_codec::{HostValue, PlutusData};

use super::Args;
use super::codec::{alternative, canonical_items};
use crate::error::Result;

pub(super) fn call(method: &str, args: &Args) -> Result<HostValue> {
    let data = match method {
        "constr" => PlutusData::constr(alternative(args, 0)?, &canonical_items(args, 1)?)?,
        "list" => PlutusData::from_canonical(&dataprover_codec::Canonical::List(
            canonical_items(args, 0)?,
        ))?,
        "bigInt" => PlutusData::Int(args.int(0)?),
        _ => PlutusData::Bytes(match args.value(0)? {
            HostValue::Text(s) => dataprover_codec::hex::decode(s)?,
            _ => args.bytes(0)?,
        }),
    };
    Ok(HostValue::Bytes(data.to_cbor()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(method: &str, values: Vec<HostValue>) -> Result<HostValue> {
        call(method, &Args::new("plutusBuilder", method, values))
    }

    #[test]
    fn constr_with_amount_and_pool_hash() {
        let fields = HostValue::List(vec![HostValue::Int(5), HostValue::Bytes(vec![0x11; 28])]);
        let HostValue::Bytes(out) = run("constr", vec![HostValue::Int(0), fields]).expect("constr")
        else {
            panic!("expected bytes");
        };
        assert_eq!(&out[..5], &[0xD8, 0x79, 0x82, 0x05, 0x58]);
        assert_eq!(out[5], 28);
        assert_eq!(out.len(), 6 + 28);
    }

    #[test]
    fn big_int_from_float_truncates() {
        assert_eq!(
            run("bigInt", vec![HostValue::Float(24.7)]).expect("bigInt"),
            HostValue::Bytes(vec![0x18, 0x18])
        );
    }

    #[test]
    fn bytes_accepts_hex_text() {
        assert_eq!(
            run("bytes", vec!["beef".into()]).expect("bytes"),
            HostValue::Bytes(vec![0x42, 0xBE, 0xEF])
        );
    }

    #[test]
    fn text_fields_are_rejected() {
        let fields = HostValue::List(vec!["not bytes".into()]);
        assert!(run("constr", vec![HostValue::Int(0), fields]).is_err());
    }

    #[test]
    fn list_of_ints() {
        let list = HostValue::List(vec![HostValue::Int(1), HostValue::Int(2)]);
        assert_eq!(
            run("list", vec![list]).expect("list"),
            HostValue::Bytes(vec![0x82, 0x01, 0x02])
        );
    }
}
