//! Byte-level key encoding: documents, index entries and the schema record
//! all live in one flat, lexicographically-ordered keyspace. Every key opens
//! with a one-byte family tag followed by `\x00`-separated string
//! components, and closes with a run of length-prefixed scalars (index
//! values, then the trailing document key) so the tail can be decoded
//! without knowing the property count ahead of time.

use std::fmt;

use bson::spec::ElementType;
use bson::Bson;

use crate::error::EngineError;

const SCHEMA_TAG: u8 = b's';
const DOCUMENT_TAG: u8 = b'd';
const INDEX_TAG: u8 = b'i';
const SEP: u8 = 0x00;

/// A document identifier: a non-empty string or a finite number.
#[derive(Debug, Clone, PartialEq)]
pub enum DocKey {
    String(String),
    Number(f64),
}

impl DocKey {
    pub fn from_bson(value: &Bson) -> Result<DocKey, EngineError> {
        match value {
            Bson::String(s) if !s.is_empty() => Ok(DocKey::String(s.clone())),
            Bson::Int32(n) => Ok(DocKey::Number(*n as f64)),
            Bson::Int64(n) => Ok(DocKey::Number(*n as f64)),
            Bson::Double(n) if n.is_finite() => Ok(DocKey::Number(*n)),
            other => Err(EngineError::InvalidKey(format!(
                "key must be a non-empty string or a finite number, got {other:?}"
            ))),
        }
    }

    fn as_scalar(&self) -> (u8, Vec<u8>) {
        match self {
            DocKey::String(s) => (ElementType::String as u8, s.as_bytes().to_vec()),
            DocKey::Number(n) => (ElementType::Double as u8, encode_f64_sortable(*n).to_vec()),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::String(s) => write!(f, "{s}"),
            DocKey::Number(n) => write!(f, "{n}"),
        }
    }
}

// ── sortable scalar encoding ────────────────────────────────────
//
// Numbers must be encoded so byte-lexicographic order matches numeric
// order: XOR the sign bit for integers, sign-flip-or-bit-flip for doubles.

#[inline]
fn encode_i64_sortable(n: i64) -> [u8; 8] {
    ((n as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

#[inline]
fn decode_i64_sortable(b: [u8; 8]) -> i64 {
    (u64::from_be_bytes(b) ^ 0x8000_0000_0000_0000) as i64
}

#[inline]
fn encode_f64_sortable(f: f64) -> [u8; 8] {
    let bits = f.to_bits();
    let encoded = if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits ^ 0x8000_0000_0000_0000
    };
    encoded.to_be_bytes()
}

#[inline]
fn decode_f64_sortable(b: [u8; 8]) -> f64 {
    let encoded = u64::from_be_bytes(b);
    let bits = if encoded & 0x8000_0000_0000_0000 != 0 {
        encoded ^ 0x8000_0000_0000_0000
    } else {
        !encoded
    };
    f64::from_bits(bits)
}

/// Encode a scalar index/key value as `(type tag, sortable payload)`.
/// Returns `None` for types that can't be indexed (Document, Array, Binary, ...).
pub fn encode_scalar(value: &Bson) -> Option<(u8, Vec<u8>)> {
    match value {
        Bson::Double(f) => Some((ElementType::Double as u8, encode_f64_sortable(*f).to_vec())),
        Bson::String(s) => Some((ElementType::String as u8, s.as_bytes().to_vec())),
        Bson::Boolean(b) => Some((ElementType::Boolean as u8, vec![*b as u8])),
        Bson::Null => Some((ElementType::Null as u8, Vec::new())),
        Bson::Int32(n) => Some((
            ElementType::Int32 as u8,
            encode_i64_sortable(*n as i64).to_vec(),
        )),
        Bson::Int64(n) => Some((ElementType::Int64 as u8, encode_i64_sortable(*n).to_vec())),
        Bson::DateTime(dt) => Some((
            ElementType::DateTime as u8,
            encode_i64_sortable(dt.timestamp_millis()).to_vec(),
        )),
        Bson::ObjectId(oid) => Some((ElementType::ObjectId as u8, oid.bytes().to_vec())),
        _ => None,
    }
}

pub fn decode_scalar(tag: u8, payload: &[u8]) -> Option<Bson> {
    if tag == ElementType::Double as u8 {
        let b: [u8; 8] = payload.try_into().ok()?;
        Some(Bson::Double(decode_f64_sortable(b)))
    } else if tag == ElementType::String as u8 {
        Some(Bson::String(std::str::from_utf8(payload).ok()?.to_string()))
    } else if tag == ElementType::Boolean as u8 {
        Some(Bson::Boolean(*payload.first()? != 0))
    } else if tag == ElementType::Null as u8 {
        Some(Bson::Null)
    } else if tag == ElementType::Int32 as u8 {
        let b: [u8; 8] = payload.try_into().ok()?;
        Some(Bson::Int32(decode_i64_sortable(b) as i32))
    } else if tag == ElementType::Int64 as u8 {
        let b: [u8; 8] = payload.try_into().ok()?;
        Some(Bson::Int64(decode_i64_sortable(b)))
    } else if tag == ElementType::DateTime as u8 {
        let b: [u8; 8] = payload.try_into().ok()?;
        Some(Bson::DateTime(bson::DateTime::from_millis(
            decode_i64_sortable(b),
        )))
    } else if tag == ElementType::ObjectId as u8 {
        Some(Bson::ObjectId(bson::oid::ObjectId::from_bytes(
            payload.try_into().ok()?,
        )))
    } else {
        None
    }
}

fn write_length_prefixed(tag: u8, payload: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
}

fn parse_length_prefixed(bytes: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    if bytes.len() < 3 {
        return None;
    }
    let tag = bytes[0];
    let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    let payload = bytes.get(3..3 + len)?;
    Some((tag, payload, &bytes[3 + len..]))
}

fn split_at_sep(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = bytes.iter().position(|&b| b == SEP)?;
    Some((&bytes[..pos], &bytes[pos + 1..]))
}

/// Full tuple key for one of the three key families.
#[derive(Debug, Clone, PartialEq)]
pub enum Key<'a> {
    /// `[storeName]` — the single persisted schema record.
    Schema { store: &'a str },
    /// `[storeName, collectionName, docKey]`.
    Document {
        store: &'a str,
        collection: &'a str,
        key: DocKey,
    },
    /// `[storeName, "collection:index", v1..vn, docKey]`.
    Index {
        store: &'a str,
        collection_index: &'a str,
        values: Vec<Option<Bson>>,
        key: DocKey,
    },
}

impl<'a> Key<'a> {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::Schema { store } => {
                let mut buf = Vec::with_capacity(2 + store.len());
                buf.push(SCHEMA_TAG);
                buf.push(SEP);
                buf.extend_from_slice(store.as_bytes());
                buf
            }
            Key::Document {
                store,
                collection,
                key,
            } => {
                let mut buf = Vec::with_capacity(2 + store.len() + 1 + collection.len() + 1 + 16);
                buf.push(DOCUMENT_TAG);
                buf.push(SEP);
                buf.extend_from_slice(store.as_bytes());
                buf.push(SEP);
                buf.extend_from_slice(collection.as_bytes());
                buf.push(SEP);
                let (tag, payload) = key.as_scalar();
                write_length_prefixed(tag, &payload, &mut buf);
                buf
            }
            Key::Index {
                store,
                collection_index,
                values,
                key,
            } => {
                let mut buf =
                    Vec::with_capacity(2 + store.len() + 1 + collection_index.len() + 1 + 32);
                buf.push(INDEX_TAG);
                buf.push(SEP);
                buf.extend_from_slice(store.as_bytes());
                buf.push(SEP);
                buf.extend_from_slice(collection_index.as_bytes());
                buf.push(SEP);
                for v in values {
                    // `None` stands for an index value missing from this
                    // document; it can only appear in a full key for a
                    // document that's about to be written (never queried).
                    let (tag, payload) = v
                        .as_ref()
                        .and_then(encode_scalar)
                        .unwrap_or((ElementType::Undefined as u8, Vec::new()));
                    write_length_prefixed(tag, &payload, &mut buf);
                }
                let (tag, payload) = key.as_scalar();
                write_length_prefixed(tag, &payload, &mut buf);
                buf
            }
        }
    }

    pub fn decode_document(bytes: &[u8]) -> Option<DocKey> {
        if bytes.len() < 2 || bytes[0] != DOCUMENT_TAG || bytes[1] != SEP {
            return None;
        }
        let rest = &bytes[2..];
        let (_store, rest) = split_at_sep(rest)?;
        let (_collection, rest) = split_at_sep(rest)?;
        let (tag, payload, _) = parse_length_prefixed(rest)?;
        scalar_to_doc_key(tag, payload)
    }

    /// Decode the trailing document key and the (ordered) index values from
    /// a full index entry key.
    pub fn decode_index(bytes: &[u8]) -> Option<(Vec<Bson>, DocKey)> {
        if bytes.len() < 2 || bytes[0] != INDEX_TAG || bytes[1] != SEP {
            return None;
        }
        let rest = &bytes[2..];
        let (_store, rest) = split_at_sep(rest)?;
        let (_collection_index, mut rest) = split_at_sep(rest)?;
        let mut scalars = Vec::new();
        while !rest.is_empty() {
            let (tag, payload, tail) = parse_length_prefixed(rest)?;
            scalars.push((tag, payload));
            rest = tail;
        }
        let (last_tag, last_payload) = scalars.pop()?;
        let key = scalar_to_doc_key(last_tag, last_payload)?;
        let values = scalars
            .into_iter()
            .map(|(tag, payload)| decode_scalar(tag, payload).unwrap_or(Bson::Null))
            .collect();
        Some((values, key))
    }
}

fn scalar_to_doc_key(tag: u8, payload: &[u8]) -> Option<DocKey> {
    match decode_scalar(tag, payload)? {
        Bson::String(s) => Some(DocKey::String(s)),
        Bson::Double(n) => Some(DocKey::Number(n)),
        _ => None,
    }
}

/// A key prefix used to build scan ranges; shares `Key`'s byte layout up to
/// the point where it stops.
#[derive(Debug, Clone)]
pub enum KeyPrefix<'a> {
    /// All document keys in a collection.
    Document { store: &'a str, collection: &'a str },
    /// Index entries whose leading values equal `values` (may be empty, for
    /// "whole index").
    Index {
        store: &'a str,
        collection_index: &'a str,
        values: &'a [Bson],
    },
}

impl<'a> KeyPrefix<'a> {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            KeyPrefix::Document { store, collection } => {
                let mut buf = Vec::with_capacity(2 + store.len() + 1 + collection.len() + 1);
                buf.push(DOCUMENT_TAG);
                buf.push(SEP);
                buf.extend_from_slice(store.as_bytes());
                buf.push(SEP);
                buf.extend_from_slice(collection.as_bytes());
                buf.push(SEP);
                buf
            }
            KeyPrefix::Index {
                store,
                collection_index,
                values,
            } => {
                let mut buf =
                    Vec::with_capacity(2 + store.len() + 1 + collection_index.len() + 1 + 32);
                buf.push(INDEX_TAG);
                buf.push(SEP);
                buf.extend_from_slice(store.as_bytes());
                buf.push(SEP);
                buf.extend_from_slice(collection_index.as_bytes());
                buf.push(SEP);
                for v in *values {
                    if let Some((tag, payload)) = encode_scalar(v) {
                        write_length_prefixed(tag, &payload, &mut buf);
                    }
                }
                buf
            }
        }
    }
}
