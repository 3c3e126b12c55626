//! # CBOR Representation Values
//!
//! OIC resources exchange their state as CBOR maps (content-format 60). This
//! module holds the small value model the gateway needs and a codec for it.
//!
//! ```rust
//! use oicbridge::cbor::{self, Map, Value};
//!
//! let mut rep = Map::new();
//! rep.append("rt", "oic.r.light.dimming");
//! rep.append("dimmingSetting", 5);
//! rep.append("range", "0,255");
//!
//! let bytes = cbor::encode(&Value::Map(rep.clone()));
//! let back = cbor::decode(&bytes).unwrap();
//! assert_eq!(back.as_map(), Some(&rep));
//! ```
//!
//! Only definite-length items are produced or accepted. Map keys are always
//! text strings, which is all OIC payloads use.

mod codec;

pub use codec::{decode, encode};

use thiserror::Error;

/// Errors raised while decoding a CBOR byte sequence.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CborError {
    #[error("unexpected end of input at offset {0}")]
    Truncated(usize),

    #[error("unsupported item (major type {major}, info {info}) at offset {offset}")]
    Unsupported { major: u8, info: u8, offset: usize },

    #[error("map key at offset {0} is not a text string")]
    NonTextKey(usize),

    #[error("text string at offset {0} is not valid utf-8")]
    InvalidUtf8(usize),

    #[error("integer at offset {0} does not fit in i64")]
    IntegerOverflow(usize),

    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),

    #[error("{0} trailing bytes after the top-level item")]
    TrailingBytes(usize),
}

/// A decoded CBOR data item.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
    Map(Map),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

/// String-keyed map that keeps insertion order when encoded.
///
/// Equality compares the key/value set and ignores order, so a representation
/// decoded from a peer that orders fields differently still compares equal.
#[derive(Debug, Clone, Default)]
pub struct Map {
    entries: Vec<(String, Value)>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a field at the end, even if the key already exists.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Replace the first field named `key` in place, or append it.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl PartialEq for Map {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Map::new();
        for (k, v) in iter {
            map.append(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut m = Map::new();
        m.append("rt", "oic.r.light.dimming");
        m.append("dimmingSetting", 5);
        m.append("range", "0,255");
        m.insert("dimmingSetting", 200);
        let keys: Vec<&str> = m.keys().collect();
        assert_eq!(keys, vec!["rt", "dimmingSetting", "range"]);
        assert_eq!(m.get("dimmingSetting").and_then(Value::as_i64), Some(200));
    }

    #[test]
    fn insert_appends_missing_key() {
        let mut m = Map::new();
        m.insert("a", 1);
        m.insert("b", 2);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn equality_ignores_order() {
        let a: Map = [("x", Value::from(1)), ("y", Value::from("z"))]
            .into_iter()
            .collect();
        let b: Map = [("y", Value::from("z")), ("x", Value::from(1))]
            .into_iter()
            .collect();
        assert_eq!(a, b);
        let c: Map = [("x", Value::from(2)), ("y", Value::from("z"))]
            .into_iter()
            .collect();
        assert_ne!(a, c);
    }
}
