//! The opaque value attached to every indexed point.
//!
//! The host language this library was distilled from is dynamically typed,
//! so a point's payload can be any value at all. Modeled here as a tagged
//! sum (spec.md §9): null, integer, float, string, byte blob, an ordered
//! sequence of payloads, or a string-keyed mapping. `Payload` implements
//! `PartialEq` (coordinate+payload equality, spec.md §3) and a compact
//! binary encoding consumed by [`crate::codec`].

use std::collections::BTreeMap;

use crate::error::{Result, SpartError};

/// An opaque value carried alongside a point's coordinates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Payload {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Payload>),
    Map(BTreeMap<String, Payload>),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Null
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Payload::Int(v)
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Payload::Float(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Payload::Str(v.to_string())
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Payload::Str(v)
    }
}

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STR: u8 = 3;
const TAG_BYTES: u8 = 4;
const TAG_LIST: u8 = 5;
const TAG_MAP: u8 = 6;

impl Payload {
    /// Encodes this payload to its tagged binary representation. The
    /// result is what `save` writes as the "payload bytes" half of the
    /// length-prefixed blob described in spec.md §6.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Payload::Null => out.push(TAG_NULL),
            Payload::Int(v) => {
                out.push(TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Payload::Float(v) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Payload::Str(s) => {
                out.push(TAG_STR);
                let bytes = s.as_bytes();
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
            Payload::Bytes(b) => {
                out.push(TAG_BYTES);
                out.extend_from_slice(&(b.len() as u32).to_le_bytes());
                out.extend_from_slice(b);
            }
            Payload::List(items) => {
                out.push(TAG_LIST);
                out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                for item in items {
                    let encoded = item.encode();
                    out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
                    out.extend_from_slice(&encoded);
                }
            }
            Payload::Map(map) => {
                out.push(TAG_MAP);
                out.extend_from_slice(&(map.len() as u32).to_le_bytes());
                for (key, value) in map {
                    let key_bytes = key.as_bytes();
                    out.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
                    out.extend_from_slice(key_bytes);
                    let encoded = value.encode();
                    out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
                    out.extend_from_slice(&encoded);
                }
            }
        }
        out
    }

    /// Decodes a payload previously produced by [`Payload::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (payload, consumed) = Self::decode_partial(bytes)?;
        if consumed != bytes.len() {
            return Err(SpartError::Format(
                "trailing bytes after payload".to_string(),
            ));
        }
        Ok(payload)
    }

    fn decode_partial(bytes: &[u8]) -> Result<(Self, usize)> {
        let tag = *bytes
            .first()
            .ok_or_else(|| SpartError::Format("empty payload blob".to_string()))?;
        let body = &bytes[1..];
        match tag {
            TAG_NULL => Ok((Payload::Null, 1)),
            TAG_INT => {
                let arr = read_array::<8>(body)?;
                Ok((Payload::Int(i64::from_le_bytes(arr)), 1 + 8))
            }
            TAG_FLOAT => {
                let arr = read_array::<8>(body)?;
                Ok((Payload::Float(f64::from_le_bytes(arr)), 1 + 8))
            }
            TAG_STR => {
                let (len, rest) = read_u32(body)?;
                let s = std::str::from_utf8(read_slice(rest, len)?)
                    .map_err(|e| SpartError::Format(format!("invalid utf8 payload: {e}")))?
                    .to_string();
                Ok((Payload::Str(s), 1 + 4 + len))
            }
            TAG_BYTES => {
                let (len, rest) = read_u32(body)?;
                let b = read_slice(rest, len)?.to_vec();
                Ok((Payload::Bytes(b), 1 + 4 + len))
            }
            TAG_LIST => {
                let (count, mut rest) = read_u32(body)?;
                let mut consumed = 1 + 4;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    let (item_len, after_len) = read_u32(rest)?;
                    let item_bytes = read_slice(after_len, item_len)?;
                    let (item, _) = Self::decode_partial(item_bytes)?;
                    items.push(item);
                    consumed += 4 + item_len;
                    rest = &after_len[item_len..];
                }
                Ok((Payload::List(items), consumed))
            }
            TAG_MAP => {
                let (count, mut rest) = read_u32(body)?;
                let mut consumed = 1 + 4;
                let mut map = BTreeMap::new();
                for _ in 0..count {
                    let (key_len, after_key_len) = read_u32(rest)?;
                    let key = std::str::from_utf8(read_slice(after_key_len, key_len)?)
                        .map_err(|e| SpartError::Format(format!("invalid utf8 key: {e}")))?
                        .to_string();
                    let after_key = &after_key_len[key_len..];
                    let (val_len, after_val_len) = read_u32(after_key)?;
                    let val_bytes = read_slice(after_val_len, val_len)?;
                    let (value, _) = Self::decode_partial(val_bytes)?;
                    map.insert(key, value);
                    consumed += 4 + key_len + 4 + val_len;
                    rest = &after_val_len[val_len..];
                }
                Ok((Payload::Map(map), consumed))
            }
            other => Err(SpartError::Format(format!("unknown payload tag {other}"))),
        }
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .get(..N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| SpartError::Format("truncated payload".to_string()))
}

fn read_u32(bytes: &[u8]) -> Result<(usize, &[u8])> {
    let arr = read_array::<4>(bytes)?;
    Ok((u32::from_le_bytes(arr) as usize, &bytes[4..]))
}

fn read_slice(bytes: &[u8], len: usize) -> Result<&[u8]> {
    bytes
        .get(..len)
        .ok_or_else(|| SpartError::Format("truncated payload".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars() {
        for p in [
            Payload::Null,
            Payload::Int(-42),
            Payload::Float(3.5),
            Payload::Str("hello".to_string()),
            Payload::Bytes(vec![1, 2, 3]),
        ] {
            let encoded = p.encode();
            assert_eq!(Payload::decode(&encoded).unwrap(), p);
        }
    }

    #[test]
    fn round_trips_nested() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Payload::Int(1));
        map.insert("b".to_string(), Payload::List(vec![Payload::Null, Payload::Float(1.5)]));
        let p = Payload::Map(map);
        let encoded = p.encode();
        assert_eq!(Payload::decode(&encoded).unwrap(), p);
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut encoded = Payload::Int(1).encode();
        encoded.push(0xFF);
        assert!(Payload::decode(&encoded).is_err());
    }
}
