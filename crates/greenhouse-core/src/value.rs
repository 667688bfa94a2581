//! Typed values carried inside TLV frames
//!
//! [`Value`] is the closed set of serializable values. Encoding dispatches
//! on the variant; decoding dispatches on the tag and recurses into
//! collections.
//!
//! Collections are homogeneous by convention. The decoder infers the
//! element kind from the first child and drops later children of a
//! different kind, so a heterogeneous list does not survive a round trip
//! and an empty collection cannot be decoded at all.

use crate::tlv::{tag, Tlv};
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Deepest collection nesting the decoder follows
pub const MAX_DEPTH: usize = 64;

/// A serializable value
#[derive(Debug, Clone)]
pub enum Value {
    Integer(i32),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Map(BTreeMap<Value, Value>),
    /// Encoded public key material (SubjectPublicKeyInfo DER)
    PublicKey(Vec<u8>),
    /// Raw secret key material
    SecretKey(Vec<u8>),
    Null,
}

/// The variant of a [`Value`], without its contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Integer,
    Double,
    String,
    List,
    Set,
    Map,
    PublicKey,
    SecretKey,
    Null,
}

impl ValueKind {
    /// Wire tag for values of this kind
    pub fn tag(self) -> u16 {
        match self {
            ValueKind::Integer => tag::INTEGER,
            ValueKind::Double => tag::DOUBLE,
            ValueKind::String => tag::STRING,
            ValueKind::List => tag::LIST,
            ValueKind::Set => tag::SET,
            ValueKind::Map => tag::MAP,
            ValueKind::PublicKey => tag::PUBLIC_KEY,
            ValueKind::SecretKey => tag::SECRET_KEY,
            ValueKind::Null => tag::NULL,
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
            Value::Map(_) => ValueKind::Map,
            Value::PublicKey(_) => ValueKind::PublicKey,
            Value::SecretKey(_) => ValueKind::SecretKey,
            Value::Null => ValueKind::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Value::Set(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Value, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        self.kind() as u8
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::PublicKey(a), Value::PublicKey(b)) => a.cmp(b),
            (Value::SecretKey(a), Value::SecretKey(b)) => a.cmp(b),
            (Value::Null, Value::Null) => Ordering::Equal,
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Integer(i) => i.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::List(items) => items.hash(state),
            Value::Set(items) => items.hash(state),
            Value::Map(entries) => entries.hash(state),
            Value::PublicKey(bytes) | Value::SecretKey(bytes) => bytes.hash(state),
            Value::Null => {}
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<BTreeSet<Value>> for Value {
    fn from(v: BTreeSet<Value>) -> Self {
        Value::Set(v)
    }
}

impl From<BTreeMap<Value, Value>> for Value {
    fn from(v: BTreeMap<Value, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// ENCODING
// ============================================================================

/// Encode a value as a TLV frame
pub fn encode_value(value: &Value) -> Result<Tlv> {
    let tag = value.kind().tag();
    match value {
        Value::Integer(i) => {
            let mut buf = BytesMut::with_capacity(4);
            buf.put_i32(*i);
            Tlv::new(tag, buf.freeze())
        }
        Value::Double(d) => {
            let mut buf = BytesMut::with_capacity(8);
            buf.put_f64(*d);
            Tlv::new(tag, buf.freeze())
        }
        Value::String(s) => Tlv::new(tag, Bytes::copy_from_slice(s.as_bytes())),
        Value::List(items) => encode_sequence(tag, items.iter()),
        Value::Set(items) => encode_sequence(tag, items.iter()),
        Value::Map(entries) => {
            let mut buf = BytesMut::new();
            for (key, val) in entries {
                encode_value(key)?.encode_into(&mut buf);
                encode_value(val)?.encode_into(&mut buf);
            }
            Tlv::new(tag, buf.freeze())
        }
        Value::PublicKey(bytes) | Value::SecretKey(bytes) => {
            Tlv::new(tag, Bytes::copy_from_slice(bytes))
        }
        Value::Null => Ok(Tlv::empty(tag)),
    }
}

fn encode_sequence<'a>(tag: u16, items: impl Iterator<Item = &'a Value>) -> Result<Tlv> {
    let mut buf = BytesMut::new();
    for item in items {
        encode_value(item)?.encode_into(&mut buf);
    }
    Tlv::new(tag, buf.freeze())
}

// ============================================================================
// DECODING
// ============================================================================

/// Decode a value from a TLV frame
pub fn decode_value(tlv: &Tlv) -> Result<Value> {
    decode_nested(tlv, 0)
}

fn decode_nested(tlv: &Tlv, depth: usize) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(Error::Decode("nesting too deep".into()));
    }

    match tlv.tag() {
        tag::INTEGER => {
            let mut buf = fixed_width(tlv, 4, "integer")?;
            Ok(Value::Integer(buf.get_i32()))
        }
        tag::DOUBLE => {
            let mut buf = fixed_width(tlv, 8, "double")?;
            Ok(Value::Double(buf.get_f64()))
        }
        tag::STRING => String::from_utf8(tlv.value().to_vec())
            .map(Value::String)
            .map_err(|e| Error::Decode(e.to_string())),
        tag::NULL => {
            if !tlv.is_empty() {
                return Err(Error::Decode(format!(
                    "null carries {} unexpected bytes",
                    tlv.len()
                )));
            }
            Ok(Value::Null)
        }
        tag::LIST => Ok(Value::List(decode_homogeneous(tlv, depth)?)),
        tag::SET => Ok(Value::Set(
            decode_homogeneous(tlv, depth)?.into_iter().collect(),
        )),
        tag::MAP => decode_map(tlv, depth),
        tag::PUBLIC_KEY => Ok(Value::PublicKey(tlv.value().to_vec())),
        tag::SECRET_KEY => Ok(Value::SecretKey(tlv.value().to_vec())),
        other => Err(Error::UnknownTag(other)),
    }
}

fn fixed_width<'a>(tlv: &'a Tlv, width: usize, what: &str) -> Result<&'a [u8]> {
    if tlv.len() != width {
        return Err(Error::Decode(format!(
            "{} expects {} bytes, got {}",
            what,
            width,
            tlv.len()
        )));
    }
    Ok(&tlv.value()[..])
}

/// Decode children, keeping only those of the first child's kind
fn decode_homogeneous(tlv: &Tlv, depth: usize) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    let mut kind = None;

    for child in tlv.children() {
        let item = decode_nested(&child?, depth + 1)?;
        let expected = *kind.get_or_insert(item.kind());
        if item.kind() == expected {
            items.push(item);
        } else {
            debug!(
                "Dropping {:?} element from {:?} collection",
                item.kind(),
                expected
            );
        }
    }

    if items.is_empty() {
        return Err(Error::Decode(
            "empty collection: element type cannot be inferred".into(),
        ));
    }

    Ok(items)
}

/// Decode alternating key/value children.
///
/// The key kind comes from the first key and the value kind from the
/// first non-null value. Null values are accepted for any value kind.
fn decode_map(tlv: &Tlv, depth: usize) -> Result<Value> {
    let mut entries = BTreeMap::new();
    let mut key_kind = None;
    let mut value_kind = None;
    let mut children = tlv.children();
    let mut seen = false;

    while let Some(key) = children.next() {
        let key = decode_nested(&key?, depth + 1)?;
        let val = match children.next() {
            Some(val) => decode_nested(&val?, depth + 1)?,
            None => return Err(Error::Decode("map key without value".into())),
        };
        seen = true;

        let expected_key = *key_kind.get_or_insert(key.kind());
        if key.kind() != expected_key {
            debug!("Dropping map entry with {:?} key", key.kind());
            continue;
        }
        if !val.is_null() {
            let expected_val = *value_kind.get_or_insert(val.kind());
            if val.kind() != expected_val {
                debug!("Dropping map entry with {:?} value", val.kind());
                continue;
            }
        }

        entries.insert(key, val);
    }

    if !seen {
        return Err(Error::Decode(
            "empty map: element type cannot be inferred".into(),
        ));
    }

    Ok(Value::Map(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) -> Value {
        decode_value(&encode_value(&value).unwrap()).unwrap()
    }

    #[test]
    fn test_scalar_roundtrip() {
        assert_eq!(roundtrip(Value::Integer(-42)), Value::Integer(-42));
        assert_eq!(roundtrip(Value::Double(21.5)), Value::Double(21.5));
        assert_eq!(roundtrip(Value::from("tomato")), Value::from("tomato"));
        assert_eq!(roundtrip(Value::Null), Value::Null);
    }

    #[test]
    fn test_map_with_null_value() {
        let mut map = BTreeMap::new();
        map.insert(Value::Integer(0), Value::from("A1"));
        map.insert(Value::Integer(1), Value::Null);

        let tlv = encode_value(&Value::Map(map.clone())).unwrap();
        // two keys, two values, none omitted
        assert_eq!(tlv.children().count(), 4);
        assert_eq!(decode_value(&tlv).unwrap(), Value::Map(map));
    }

    #[test]
    fn test_first_child_decides_list_kind() {
        let list = Value::List(vec![
            Value::Integer(1),
            Value::from("two"),
            Value::Integer(3),
        ]);
        assert_eq!(
            roundtrip(list),
            Value::List(vec![Value::Integer(1), Value::Integer(3)])
        );
    }

    #[test]
    fn test_empty_collection_rejected() {
        let tlv = encode_value(&Value::List(vec![])).unwrap();
        assert!(matches!(decode_value(&tlv), Err(Error::Decode(_))));

        let tlv = encode_value(&Value::Map(BTreeMap::new())).unwrap();
        assert!(matches!(decode_value(&tlv), Err(Error::Decode(_))));
    }

    fn nested_lists(depth: usize) -> Tlv {
        let mut tlv = encode_value(&Value::Integer(1)).unwrap();
        for _ in 0..depth {
            tlv = Tlv::new(tag::LIST, tlv.encode()).unwrap();
        }
        tlv
    }

    #[test]
    fn test_nesting_limit() {
        assert!(decode_value(&nested_lists(MAX_DEPTH)).is_ok());

        let err = decode_value(&nested_lists(MAX_DEPTH + 1)).unwrap_err();
        assert!(matches!(err, Error::Decode(ref msg) if msg == "nesting too deep"));

        // far deeper than any stack could follow
        assert!(decode_value(&nested_lists(10_000)).is_err());
    }

    #[test]
    fn test_unknown_tag() {
        let tlv = Tlv::new(0x7777, &b"?"[..]).unwrap();
        assert!(matches!(decode_value(&tlv), Err(Error::UnknownTag(0x7777))));
    }

    #[test]
    fn test_value_ordering_across_kinds() {
        assert!(Value::Integer(100) < Value::Double(0.0));
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
    }
}
