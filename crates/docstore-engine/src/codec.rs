//! `KeyCodec` turns collection/index metadata plus document values into the
//! byte tuples `docstore-kv` orders by. It knows nothing about documents'
//! contents beyond the scalars it's handed — extraction happens one layer up
//! in `IndexMaintainer`/`Planner`.

use bson::Bson;
use docstore_kv::ScanRange;

use crate::index::Index;
use crate::key::{DocKey, Key, KeyPrefix};

#[derive(Debug, Clone)]
pub struct KeyCodec {
    store: String,
}

impl KeyCodec {
    pub fn new(store: impl Into<String>) -> Self {
        Self { store: store.into() }
    }

    pub fn store_name(&self) -> &str {
        &self.store
    }

    pub fn schema_key(&self) -> Vec<u8> {
        Key::Schema { store: &self.store }.encode()
    }

    pub fn doc_key(&self, collection: &str, key: &DocKey) -> Vec<u8> {
        Key::Document {
            store: &self.store,
            collection,
            key: key.clone(),
        }
        .encode()
    }

    pub fn collection_prefix(&self, collection: &str) -> Vec<u8> {
        KeyPrefix::Document {
            store: &self.store,
            collection,
        }
        .encode()
    }

    /// `"<collection>:<index.name>"` — the single string component an
    /// index's entries are grouped under.
    pub fn collection_index(&self, collection: &str, index: &Index) -> String {
        format!("{collection}:{}", index.name())
    }

    pub fn index_key(
        &self,
        collection: &str,
        index: &Index,
        values: Vec<Option<Bson>>,
        key: &DocKey,
    ) -> Vec<u8> {
        let collection_index = self.collection_index(collection, index);
        Key::Index {
            store: &self.store,
            collection_index: &collection_index,
            values,
            key: key.clone(),
        }
        .encode()
    }

    /// Range covering every entry of `index`.
    pub fn index_prefix(&self, collection: &str, index: &Index) -> Vec<u8> {
        let collection_index = self.collection_index(collection, index);
        KeyPrefix::Index {
            store: &self.store,
            collection_index: &collection_index,
            values: &[],
        }
        .encode()
    }

    /// `indexPrefixForQuery` — the leading `query.len()` property values of
    /// `index`, materialised as an exact-match scan prefix; the remaining
    /// property keys are `index`'s free tail, used for ordering.
    pub fn index_prefix_for_query(
        &self,
        collection: &str,
        index: &Index,
        query_values: &[Bson],
    ) -> Vec<u8> {
        let collection_index = self.collection_index(collection, index);
        KeyPrefix::Index {
            store: &self.store,
            collection_index: &collection_index,
            values: query_values,
        }
        .encode()
    }

    /// Decode the trailing values + document key out of a raw index entry key.
    pub fn decode_index_key(&self, bytes: &[u8]) -> Option<(Vec<Bson>, DocKey)> {
        Key::decode_index(bytes)
    }

    pub fn decode_document_key(&self, bytes: &[u8]) -> Option<DocKey> {
        Key::decode_document(bytes)
    }
}

/// Build a `ScanRange` over a key-space prefix, forwarding the cursor
/// options (`start`/`startAfter`/`end`/`endBefore`/`reverse`/`limit`)
/// verbatim onto the KVS contract. Cursor components are appended to the
/// prefix bytes so they share the prefix's ordering.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    pub start: Option<Vec<u8>>,
    pub start_after: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
    pub end_before: Option<Vec<u8>>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

pub fn scan_range(prefix: Vec<u8>, cursor: &Cursor) -> ScanRange {
    let append = |suffix: &Option<Vec<u8>>| {
        suffix.as_ref().map(|tail| {
            let mut v = prefix.clone();
            v.extend_from_slice(tail);
            v
        })
    };
    ScanRange {
        prefix: Some(prefix.clone()),
        start: append(&cursor.start),
        start_after: append(&cursor.start_after),
        end: append(&cursor.end),
        end_before: append(&cursor.end_before),
        reverse: cursor.reverse,
        limit: cursor.limit,
    }
}
