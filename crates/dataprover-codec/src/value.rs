//! Host values and their canonical form.
//!
//! [`HostValue`] is what guest bindings produce and what capabilities and
//! providers pass around. It keeps doubles and decimals so that records
//! round-trip through the host without losing information.
//!
//! [`Canonical`] is the language-neutral tagged union every value passes
//! through before binary encoding. [`HostValue::to_canonical`] is the single
//! classification function between the two.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{CodecError, Result};

// ---------------------------------------------------------------------------
// Host values
// ---------------------------------------------------------------------------

/// A value on the host side of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    /// Absence of a value (`null`, `undefined`, `None`).
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer of up to 128 bits.
    Int(i128),
    /// An IEEE double.
    Float(f64),
    /// A fixed-point decimal, typically from a database numeric column.
    Decimal(Decimal),
    /// A UTF-8 string.
    Text(String),
    /// A byte buffer.
    Bytes(Vec<u8>),
    /// An ordered list.
    List(Vec<HostValue>),
    /// A string-keyed map in insertion order.
    Map(IndexMap<String, HostValue>),
}

/// A record as produced by a provider's `fetchData`.
pub type Record = IndexMap<String, HostValue>;

impl HostValue {
    /// Returns `true` for [`HostValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the map payload, if any.
    pub fn as_map(&self) -> Option<&IndexMap<String, HostValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the list payload, if any.
    pub fn as_list(&self) -> Option<&[HostValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the byte payload, if any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Bytes, or a list of integers each reduced modulo 256.
    pub fn to_byte_vec(&self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(b) => Some(b.clone()),
            Self::List(items) => items
                .iter()
                .map(|item| match item {
                    Self::Int(n) => Some((*n & 0xff) as u8),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Interpret the value as a boolean, accepting `"true"`/`"false"` text.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interpret the value as an `i64`, truncating fractional numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => i64::try_from(*n).ok(),
            Self::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Self::Decimal(d) => d.trunc().to_i64(),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Look up a key when the value is a map.
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Classify this value into its canonical form.
    ///
    /// Doubles and decimals are truncated toward zero. Non-finite doubles
    /// and integers outside the 128-bit range fail with
    /// [`CodecError::UnsupportedValueType`].
    pub fn to_canonical(&self) -> Result<Canonical> {
        Ok(match self {
            Self::Null => Canonical::Null,
            Self::Bool(b) => Canonical::Bool(*b),
            Self::Int(n) => Canonical::Int(*n),
            Self::Float(f) => Canonical::Int(truncate_float(*f)?),
            Self::Decimal(d) => Canonical::Int(d.trunc().to_i128().ok_or_else(|| {
                CodecError::UnsupportedValueType(format!("decimal {d} out of range"))
            })?),
            Self::Text(s) => Canonical::Text(s.clone()),
            Self::Bytes(b) => Canonical::Bytes(b.clone()),
            Self::List(items) => Canonical::List(
                items
                    .iter()
                    .map(HostValue::to_canonical)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Self::Map(entries) => Canonical::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((Canonical::Text(k.clone()), v.to_canonical()?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    /// Rewrite byte-like maps (`{"0": .., "1": .., "length": n}`) into
    /// [`HostValue::Bytes`], recursively.
    ///
    /// Only capability argument paths apply this; records and entry-point
    /// results keep such maps as maps.
    pub fn detect_byte_like(self) -> HostValue {
        match self {
            Self::Map(map) => match byte_like(&map) {
                Some(bytes) => Self::Bytes(bytes),
                None => Self::Map(
                    map.into_iter()
                        .map(|(k, v)| (k, v.detect_byte_like()))
                        .collect(),
                ),
            },
            Self::List(items) => {
                Self::List(items.into_iter().map(HostValue::detect_byte_like).collect())
            }
            other => other,
        }
    }

    /// Convert to JSON for display and transport. Bytes become lowercase hex.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => match i64::try_from(*n) {
                Ok(v) => Value::from(v),
                Err(_) => match u64::try_from(*n) {
                    Ok(v) => Value::from(v),
                    Err(_) => Value::String(n.to_string()),
                },
            },
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(d.to_string())),
            Self::Text(s) => Value::String(s.clone()),
            Self::Bytes(b) => Value::String(crate::hex::encode(b)),
            Self::List(items) => Value::Array(items.iter().map(HostValue::to_json).collect()),
            Self::Map(m) => Value::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        }
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i128::from(i))
                } else if let Some(u) = n.as_u64() {
                    Self::Int(i128::from(u))
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::List(items.into_iter().map(HostValue::from).collect()),
            Value::Object(m) => Self::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        Self::Int(i128::from(n))
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<Record> for HostValue {
    fn from(m: Record) -> Self {
        Self::Map(m)
    }
}

fn truncate_float(f: f64) -> Result<i128> {
    if !f.is_finite() {
        return Err(CodecError::UnsupportedValueType(format!(
            "non-finite number {f}"
        )));
    }
    let t = f.trunc();
    // i128::MAX is not exactly representable; 2^127 is the first value past it.
    const LIMIT: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;
    if t >= LIMIT || t < -LIMIT {
        return Err(CodecError::UnsupportedValueType(format!(
            "number {f} exceeds 128 bits"
        )));
    }
    Ok(t as i128)
}

/// Recognize a map shaped like `{"0": a, "1": b, "length": 2}`.
///
/// Every index below `length` must be present and numeric, and no other keys
/// are allowed. Each element is reduced modulo 256.
pub fn byte_like(map: &IndexMap<String, HostValue>) -> Option<Vec<u8>> {
    let len = usize::try_from(map.get("length")?.as_i64()?).ok()?;
    if map.len() != len + 1 {
        return None;
    }
    (0..len)
        .map(|i| match map.get(i.to_string().as_str())? {
            HostValue::Int(n) => Some((*n & 0xff) as u8),
            HostValue::Float(f) if f.is_finite() => Some((f.trunc() as i64 & 0xff) as u8),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Canonical values
// ---------------------------------------------------------------------------

/// The language-neutral representation every value is classified into
/// before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    Null,
    Int(i128),
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
    List(Vec<Canonical>),
    /// Entries in insertion order.
    Map(Vec<(Canonical, Canonical)>),
}
