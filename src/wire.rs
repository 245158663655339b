//! Wire-safe value grammar.
//!
//! [`WireValue`] is what actually travels inside a frame: the structured
//! value grammar minus procedures and minus cycles, plus two tagged escape
//! forms encoded as single-entry maps under the key `"$"`:
//!
//! - `{"$": <integer>}` — a procedure handle registered on the sender side
//! - `{"$": [<string|int>, ...]}` — a back-reference path from the root of
//!   the current message to a previously visited node
//!
//! Any genuine map key whose first character is `"$"` carries one extra
//! `"$"` on the wire; the marshaling layer strips it when reading.
//!
//! Serialization goes through serde so that [`MsgPackCodec`] can encode a
//! `WireValue` exactly as the equivalent MessagePack document: nil, bool,
//! int, float, str, bin, array, map.
//!
//! [`MsgPackCodec`]: crate::codec::MsgPackCodec

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// The reserved escape key.
pub const ESCAPE_KEY: &str = "$";

/// A wire-safe structured value.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// MessagePack nil.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Byte blob (MessagePack bin).
    Bin(Bytes),
    /// Ordered sequence.
    Array(Vec<WireValue>),
    /// String-keyed mapping.
    Map(BTreeMap<String, WireValue>),
}

impl WireValue {
    /// Build the `{"$": key}` procedure-handle escape.
    pub fn handle(key: u32) -> WireValue {
        let mut map = BTreeMap::new();
        map.insert(ESCAPE_KEY.to_owned(), WireValue::Int(i64::from(key)));
        WireValue::Map(map)
    }

    /// If this is a single-entry map under [`ESCAPE_KEY`], return the
    /// escaped payload.
    pub fn escape_payload(&self) -> Option<&WireValue> {
        match self {
            WireValue::Map(entries) if entries.len() == 1 => entries.get(ESCAPE_KEY),
            _ => None,
        }
    }

    /// Short name of this value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            WireValue::Null => "null",
            WireValue::Bool(_) => "bool",
            WireValue::Int(_) => "int",
            WireValue::Float(_) => "float",
            WireValue::Str(_) => "string",
            WireValue::Bin(_) => "bytes",
            WireValue::Array(_) => "array",
            WireValue::Map(_) => "map",
        }
    }
}

impl Serialize for WireValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            WireValue::Null => serializer.serialize_unit(),
            WireValue::Bool(v) => serializer.serialize_bool(*v),
            WireValue::Int(v) => serializer.serialize_i64(*v),
            WireValue::Float(v) => serializer.serialize_f64(*v),
            WireValue::Str(v) => serializer.serialize_str(v),
            WireValue::Bin(v) => serializer.serialize_bytes(v),
            WireValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            WireValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct WireValueVisitor;

impl<'de> Visitor<'de> for WireValueVisitor {
    type Value = WireValue;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("any MessagePack value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        i64::try_from(v)
            .map(WireValue::Int)
            .map_err(|_| E::custom(format!("integer {v} out of range")))
    }

    fn visit_f32<E>(self, v: f32) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Float(f64::from(v)))
    }

    fn visit_f64<E>(self, v: f64) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Float(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Str(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Str(v))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Bin(Bytes::copy_from_slice(v)))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Bin(Bytes::from(v)))
    }

    fn visit_unit<E>(self) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Null)
    }

    fn visit_none<E>(self) -> Result<WireValue, E>
    where
        E: de::Error,
    {
        Ok(WireValue::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<WireValue, D::Error>
    where
        D: Deserializer<'de>,
    {
        Deserialize::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<WireValue, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(WireValue::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<WireValue, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, WireValue>()? {
            entries.insert(key, value);
        }
        Ok(WireValue::Map(entries))
    }
}

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(WireValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;

    fn roundtrip(value: &WireValue) -> WireValue {
        let encoded = MsgPackCodec::encode(value).unwrap();
        MsgPackCodec::decode(&encoded).unwrap()
    }

    #[test]
    fn test_roundtrip_primitives() {
        for value in [
            WireValue::Null,
            WireValue::Bool(true),
            WireValue::Int(-42),
            WireValue::Int(i64::MAX),
            WireValue::Float(3.5),
            WireValue::Str("hello".to_owned()),
            WireValue::Bin(Bytes::from_static(&[1, 2, 3])),
        ] {
            assert_eq!(roundtrip(&value), value);
        }
    }

    #[test]
    fn test_roundtrip_containers() {
        let mut inner = BTreeMap::new();
        inner.insert("a".to_owned(), WireValue::Int(1));
        inner.insert("b".to_owned(), WireValue::Array(vec![WireValue::Null]));

        let value = WireValue::Array(vec![
            WireValue::Str("nested".to_owned()),
            WireValue::Map(inner),
        ]);

        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_null_encodes_as_nil() {
        let encoded = MsgPackCodec::encode(&WireValue::Null).unwrap();
        assert_eq!(encoded, vec![0xc0]);
    }

    #[test]
    fn test_map_encodes_as_fixmap() {
        let mut entries = BTreeMap::new();
        entries.insert("k".to_owned(), WireValue::Int(1));
        let encoded = MsgPackCodec::encode(&WireValue::Map(entries)).unwrap();
        assert_eq!(encoded[0], 0x81, "expected fixmap with 1 entry");
    }

    #[test]
    fn test_array_encodes_as_fixarray() {
        let encoded =
            MsgPackCodec::encode(&WireValue::Array(vec![WireValue::Int(1), WireValue::Int(2)]))
                .unwrap();
        assert_eq!(encoded[0], 0x92, "expected fixarray with 2 elements");
    }

    #[test]
    fn test_bin_encodes_as_bin8() {
        let encoded =
            MsgPackCodec::encode(&WireValue::Bin(Bytes::from_static(&[9, 9, 9]))).unwrap();
        assert_eq!(encoded[0], 0xc4, "expected bin8 format");
    }

    #[test]
    fn test_handle_escape_shape() {
        let handle = WireValue::handle(7);
        assert_eq!(handle.escape_payload(), Some(&WireValue::Int(7)));

        // two-entry maps are not escapes
        let mut entries = BTreeMap::new();
        entries.insert("$".to_owned(), WireValue::Int(7));
        entries.insert("x".to_owned(), WireValue::Int(8));
        assert_eq!(WireValue::Map(entries).escape_payload(), None);
    }

    #[test]
    fn test_decode_rejects_huge_u64() {
        let encoded = MsgPackCodec::encode(&u64::MAX).unwrap();
        let decoded: crate::error::Result<WireValue> = MsgPackCodec::decode(&encoded);
        assert!(decoded.is_err());
    }

    #[test]
    fn test_decode_rejects_non_string_map_keys() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(1u32, "v");
        let encoded = MsgPackCodec::encode(&map).unwrap();
        let decoded: crate::error::Result<WireValue> = MsgPackCodec::decode(&encoded);
        assert!(decoded.is_err());
    }
}
