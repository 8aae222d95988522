//! Deterministic CBOR encoding of [`Canonical`] values.
//!
//! Integers, lengths and tags always use the shortest header that fits.
//! Integers beyond 64 bits use the bignum tags (2 and 3) with a minimal
//! big-endian magnitude, so the same logical value always yields the same
//! bytes no matter which guest language produced it.

use crate::value::Canonical;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;

const SIMPLE_FALSE: u8 = 0xf4;
const SIMPLE_TRUE: u8 = 0xf5;
const SIMPLE_NULL: u8 = 0xf6;

const TAG_POSITIVE_BIGNUM: u64 = 2;
const TAG_NEGATIVE_BIGNUM: u64 = 3;

/// Plutus tag for constructor alternative 0.
pub const CONSTR_TAG_BASE: u64 = 121;
/// Plutus tag for constructor alternative 7.
pub const CONSTR_TAG_EXTENDED_BASE: u64 = 1280;

/// Tag number used for a Plutus constructor alternative.
pub fn constr_tag(alternative: u32) -> u64 {
    let alternative = u64::from(alternative);
    if alternative <= 6 {
        CONSTR_TAG_BASE + alternative
    } else {
        CONSTR_TAG_EXTENDED_BASE + (alternative - 7)
    }
}

/// Encode any canonical value.
pub fn encode(value: &Canonical) -> Vec<u8> {
    if let Canonical::Map(entries) = value {
        if entries.is_empty() {
            tracing::warn!(
                "empty map passed to generic encode; an empty guest object often stands in \
                 for a missing value, use encode_map when a map is intended"
            );
        } else {
            tracing::debug!(entries = entries.len(), "map passed to generic encode");
        }
    }
    let mut w = CborWriter::new();
    w.value(value);
    w.into_bytes()
}

/// Encode a Plutus constructor: the tag header for `alternative`, then the
/// array of `fields`.
pub fn encode_constr(alternative: u32, fields: &[Canonical]) -> Vec<u8> {
    let mut w = CborWriter::new();
    w.tag(constr_tag(alternative));
    w.array(fields);
    w.into_bytes()
}

/// Encode a list of values as a definite-length array.
pub fn encode_list(items: &[Canonical]) -> Vec<u8> {
    let mut w = CborWriter::new();
    w.array(items);
    w.into_bytes()
}

/// Encode key/value pairs as a definite-length map, in the given order.
pub fn encode_map(entries: &[(Canonical, Canonical)]) -> Vec<u8> {
    let mut w = CborWriter::new();
    w.map(entries);
    w.into_bytes()
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only CBOR writer shared by the generic and Plutus encoders.
#[derive(Debug, Default)]
pub(crate) struct CborWriter {
    buf: Vec<u8>,
}

impl CborWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn header(&mut self, major: u8, arg: u64) {
        let major = major << 5;
        if arg < 24 {
            self.buf.push(major | arg as u8);
        } else if arg <= u64::from(u8::MAX) {
            self.buf.push(major | 24);
            self.buf.push(arg as u8);
        } else if arg <= u64::from(u16::MAX) {
            self.buf.push(major | 25);
            self.buf.extend_from_slice(&(arg as u16).to_be_bytes());
        } else if arg <= u64::from(u32::MAX) {
            self.buf.push(major | 26);
            self.buf.extend_from_slice(&(arg as u32).to_be_bytes());
        } else {
            self.buf.push(major | 27);
            self.buf.extend_from_slice(&arg.to_be_bytes());
        }
    }

    pub(crate) fn tag(&mut self, tag: u64) {
        self.header(MAJOR_TAG, tag);
    }

    pub(crate) fn int(&mut self, n: i128) {
        if n >= 0 {
            let magnitude = n as u128;
            match u64::try_from(magnitude) {
                Ok(small) => self.header(MAJOR_UNSIGNED, small),
                Err(_) => {
                    self.tag(TAG_POSITIVE_BIGNUM);
                    self.bytes(&minimal_be(magnitude));
                }
            }
        } else {
            // CBOR stores negative n as -1 - n.
            let magnitude = (-(n + 1)) as u128;
            match u64::try_from(magnitude) {
                Ok(small) => self.header(MAJOR_NEGATIVE, small),
                Err(_) => {
                    self.tag(TAG_NEGATIVE_BIGNUM);
                    self.bytes(&minimal_be(magnitude));
                }
            }
        }
    }

    pub(crate) fn bytes(&mut self, b: &[u8]) {
        self.header(MAJOR_BYTES, b.len() as u64);
        self.buf.extend_from_slice(b);
    }

    fn text(&mut self, s: &str) {
        self.header(MAJOR_TEXT, s.len() as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub(crate) fn array_header(&mut self, len: usize) {
        self.header(MAJOR_ARRAY, len as u64);
    }

    pub(crate) fn map_header(&mut self, len: usize) {
        self.header(MAJOR_MAP, len as u64);
    }

    fn array(&mut self, items: &[Canonical]) {
        self.array_header(items.len());
        for item in items {
            self.value(item);
        }
    }

    fn map(&mut self, entries: &[(Canonical, Canonical)]) {
        self.map_header(entries.len());
        for (k, v) in entries {
            self.value(k);
            self.value(v);
        }
    }

    fn value(&mut self, value: &Canonical) {
        match value {
            Canonical::Null => self.buf.push(SIMPLE_NULL),
            Canonical::Bool(true) => self.buf.push(SIMPLE_TRUE),
            Canonical::Bool(false) => self.buf.push(SIMPLE_FALSE),
            Canonical::Int(n) => self.int(*n),
            Canonical::Bytes(b) => self.bytes(b),
            Canonical::Text(s) => self.text(s),
            Canonical::List(items) => self.array(items),
            Canonical::Map(entries) => self.map(entries),
        }
    }
}

fn minimal_be(n: u128) -> Vec<u8> {
    let raw = n.to_be_bytes();
    let first = raw.iter().position(|b| *b != 0).unwrap_or(raw.len() - 1);
    raw[first..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Canonical {
        Canonical::Text(s.to_owned())
    }

    #[test]
    fn integers_use_minimal_width() {
        assert_eq!(encode(&Canonical::Int(0)), vec![0x00]);
        assert_eq!(encode(&Canonical::Int(23)), vec![0x17]);
        assert_eq!(encode(&Canonical::Int(24)), vec![0x18, 0x18]);
        assert_eq!(encode(&Canonical::Int(500)), vec![0x19, 0x01, 0xf4]);
        assert_eq!(
            encode(&Canonical::Int(1_000_000)),
            vec![0x1a, 0x00, 0x0f, 0x42, 0x40]
        );
        assert_eq!(
            encode(&Canonical::Int(i128::from(u64::MAX))),
            vec![0x1b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn negative_integers() {
        assert_eq!(encode(&Canonical::Int(-1)), vec![0x20]);
        assert_eq!(encode(&Canonical::Int(-100)), vec![0x38, 0x63]);
        assert_eq!(encode(&Canonical::Int(-1000)), vec![0x39, 0x03, 0xe7]);
    }

    #[test]
    fn bignums_past_64_bits() {
        // 2^64 is one past u64::MAX.
        let big = i128::from(u64::MAX) + 1;
        assert_eq!(
            encode(&Canonical::Int(big)),
            vec![0xc2, 0x49, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        // -1 - 2^64 encodes magnitude 2^64 under tag 3.
        assert_eq!(
            encode(&Canonical::Int(-big - 1)),
            vec![0xc3, 0x49, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn simple_values_and_strings() {
        assert_eq!(encode(&Canonical::Null), vec![0xf6]);
        assert_eq!(encode(&Canonical::Bool(true)), vec![0xf5]);
        assert_eq!(encode(&Canonical::Bool(false)), vec![0xf4]);
        assert_eq!(encode(&text("IETF")), vec![0x64, b'I', b'E', b'T', b'F']);
        assert_eq!(
            encode(&Canonical::Bytes(vec![1, 2, 3, 4])),
            vec![0x44, 1, 2, 3, 4]
        );
    }

    #[test]
    fn nested_collections() {
        let value = Canonical::Map(vec![
            (text("a"), Canonical::Int(1)),
            (
                text("b"),
                Canonical::List(vec![Canonical::Int(2), Canonical::Int(3)]),
            ),
        ]);
        assert_eq!(
            encode(&value),
            vec![0xa2, 0x61, b'a', 0x01, 0x61, b'b', 0x82, 0x02, 0x03]
        );
    }

    #[test]
    fn map_and_list_wrappers_match_generic_encode() {
        let entries = vec![(text("k"), Canonical::Bool(true))];
        assert_eq!(encode_map(&entries), encode(&Canonical::Map(entries.clone())));
        let items = vec![Canonical::Null, Canonical::Int(-2)];
        assert_eq!(encode_list(&items), encode(&Canonical::List(items.clone())));
    }

    #[test]
    fn empty_map_still_encodes() {
        assert_eq!(encode(&Canonical::Map(vec![])), vec![0xa0]);
    }

    #[test]
    fn constr_tags() {
        assert_eq!(constr_tag(0), 121);
        assert_eq!(constr_tag(6), 127);
        assert_eq!(constr_tag(7), 1280);
        assert_eq!(constr_tag(10), 1283);
    }

    #[test]
    fn constr_is_tag_header_then_array() {
        let bytes = encode_constr(0, &[Canonical::Int(5), Canonical::Bytes(vec![0xab])]);
        assert_eq!(bytes, vec![0xd8, 0x79, 0x82, 0x05, 0x41, 0xab]);

        let bytes = encode_constr(6, &[]);
        assert_eq!(bytes, vec![0xd8, 0x7f, 0x80]);

        let bytes = encode_constr(7, &[]);
        assert_eq!(bytes, vec![0xd9, 0x05, 0x00, 0x80]);
    }
}
