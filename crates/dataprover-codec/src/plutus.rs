//! Plutus data construction.
//!
//! Guest scripts build on-chain datums through [`PlutusData`]: canonical
//! inputs are converted (integers, bytes, nested lists and maps) and then
//! serialized with the same writer as the generic encoder.

use crate::cbor::{CborWriter, constr_tag};
use crate::error::{CodecError, Result};
use crate::value::Canonical;

/// A Plutus data value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlutusData {
    /// Constructor alternative with its fields.
    Constr {
        alternative: u32,
        fields: Vec<PlutusData>,
    },
    Map(Vec<(PlutusData, PlutusData)>),
    List(Vec<PlutusData>),
    Int(i128),
    Bytes(Vec<u8>),
}

impl PlutusData {
    /// Convert a canonical value into Plutus data.
    ///
    /// Plutus has no null, text or boolean; those fail rather than being
    /// coerced.
    pub fn from_canonical(value: &Canonical) -> Result<Self> {
        match value {
            Canonical::Int(n) => Ok(Self::Int(*n)),
            Canonical::Bytes(b) => Ok(Self::Bytes(b.clone())),
            Canonical::List(items) => Ok(Self::List(
                items
                    .iter()
                    .map(PlutusData::from_canonical)
                    .collect::<Result<_>>()?,
            )),
            Canonical::Map(entries) => Ok(Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((Self::from_canonical(k)?, Self::from_canonical(v)?)))
                    .collect::<Result<_>>()?,
            )),
            Canonical::Null => Err(CodecError::InvalidPlutusData(
                "null values are not supported in plutus data".into(),
            )),
            Canonical::Text(s) => Err(CodecError::InvalidPlutusData(format!(
                "text {s:?} is not plutus data; encode it to bytes first"
            ))),
            Canonical::Bool(_) => Err(CodecError::InvalidPlutusData(
                "booleans are not plutus data; use constr(0|1, [])".into(),
            )),
        }
    }

    /// Build a constructor from canonical field values.
    pub fn constr(alternative: u32, fields: &[Canonical]) -> Result<Self> {
        Ok(Self::Constr {
            alternative,
            fields: fields
                .iter()
                .map(PlutusData::from_canonical)
                .collect::<Result<_>>()?,
        })
    }

    /// Serialize to CBOR.
    pub fn to_cbor(&self) -> Vec<u8> {
        let mut w = CborWriter::new();
        write(&mut w, self);
        w.into_bytes()
    }
}

fn write(w: &mut CborWriter, data: &PlutusData) {
    match data {
        PlutusData::Constr {
            alternative,
            fields,
        } => {
            w.tag(constr_tag(*alternative));
            w.array_header(fields.len());
            for f in fields {
                write(w, f);
            }
        }
        PlutusData::Map(entries) => {
            w.map_header(entries.len());
            for (k, v) in entries {
                write(w, k);
                write(w, v);
            }
        }
        PlutusData::List(items) => {
            w.array_header(items.len());
            for item in items {
                write(w, item);
            }
        }
        PlutusData::Int(n) => w.int(*n),
        PlutusData::Bytes(b) => w.bytes(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor;

    #[test]
    fn constr_matches_codec_encode_constr() {
        let fields = vec![Canonical::Int(5), Canonical::Bytes(vec![0x01, 0x02])];
        let data = PlutusData::constr(0, &fields).expect("fields must convert");
        assert_eq!(data.to_cbor(), cbor::encode_constr(0, &fields));
    }

    #[test]
    fn nested_constr() {
        let inner = PlutusData::constr(1, &[]).expect("empty constr must build");
        let outer = PlutusData::Constr {
            alternative: 0,
            fields: vec![inner, PlutusData::Int(-3)],
        };
        assert_eq!(outer.to_cbor(), vec![0xd8, 0x79, 0x82, 0xd8, 0x7a, 0x80, 0x22]);
    }

    #[test]
    fn null_fields_are_rejected() {
        let err = PlutusData::constr(0, &[Canonical::Null]).unwrap_err();
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn text_fields_are_rejected() {
        assert!(PlutusData::from_canonical(&Canonical::Text("x".into())).is_err());
    }

    #[test]
    fn big_int_uses_bignum_tag() {
        let n = i128::from(u64::MAX) + 1;
        assert_eq!(PlutusData::Int(n).to_cbor()[0], 0xc2);
    }
}
