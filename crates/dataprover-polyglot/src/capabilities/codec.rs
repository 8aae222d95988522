//! `codec`: canonical CBOR encoding for guest code.

use dataprover_codec::{Canonical, HostValue, cbor};

use super::Args;
use crate::error::Result;

pub(super) fn call(method: &str, args: &Args) -> Result<HostValue> {
    let bytes = match method {
        "encode" => {
            let value = args.get(0).cloned().unwrap_or(HostValue::Null);
            cbor::encode(&value.to_canonical()?)
        }
        "encodeConstr" => {
            let alternative = alternative(args, 0)?;
            cbor::encode_constr(alternative, &canonical_items(args, 1)?)
        }
        "encodeList" => cbor::encode_list(&canonical_items(args, 0)?),
        _ => cbor::encode_map(&canonical_entries(args, 0)?),
    };
    Ok(HostValue::Bytes(bytes))
}

pub(super) fn alternative(args: &Args, i: usize) -> Result<u32> {
    let n = args.int(i)?;
    u32::try_from(n).map_err(|_| args.error(format!("constructor alternative {n} out of range")))
}

/// Argument `i` as a list of canonical values. A missing list is empty.
pub(super) fn canonical_items(args: &Args, i: usize) -> Result<Vec<Canonical>> {
    if args.get(i).is_none() {
        return Ok(Vec::new());
    }
    Ok(args
        .list(i)?
        .iter()
        .map(HostValue::to_canonical)
        .collect::<dataprover_codec::Result<_>>()?)
}

/// Argument `i` as map entries: either an object, or a list of `[key, value]`
/// pairs when keys are not strings.
fn canonical_entries(args: &Args, i: usize) -> Result<Vec<(Canonical, Canonical)>> {
    match args.value(i)? {
        HostValue::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| Ok((Canonical::Text(k.clone()), v.to_canonical()?)))
            .collect::<dataprover_codec::Result<_>>()?),
        HostValue::List(pairs) => pairs
            .iter()
            .map(|pair| match pair.as_list() {
                Some([k, v]) => Ok((k.to_canonical()?, v.to_canonical()?)),
                _ => Err(args.error("map entries must be [key, value] pairs")),
            })
            .collect(),
        other => Err(args.error(format!("expected a map, got {}", other.type_name()))),
    }
}
