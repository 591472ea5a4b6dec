//! Executes planned reads/writes against a KVS transaction: point
//! operations, index-driven range scans, and the batched-iteration helpers
//! built on top of `find`.

use std::collections::BTreeMap;

use bson::{Bson, Document};
use docstore_kv::KvTxn;

use crate::codec::{scan_range, Cursor, KeyCodec};
use crate::collection::Collection;
use crate::error::EngineError;
use crate::key::DocKey;
use crate::maintainer;
use crate::planner::{self, Plan, Properties};

/// Cooperative-yield batch size for `forEach`/`findAndDelete`, matching the
/// "respiration" knob described for large scans. Exposed so the facade can
/// override it.
pub const DEFAULT_BATCH_SIZE: usize = 250;

#[derive(Debug, Clone)]
pub struct GetOptions {
    pub error_if_missing: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self { error_if_missing: true }
    }
}

#[derive(Debug, Clone)]
pub struct PutOptions {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub error_if_missing: bool,
}

#[derive(Debug, Clone)]
pub struct FindOptions {
    pub query: BTreeMap<String, Bson>,
    pub order: Vec<String>,
    pub properties: Properties,
    pub cursor: Cursor,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            query: BTreeMap::new(),
            order: Vec::new(),
            properties: Properties::All,
            cursor: Cursor::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FoundItem {
    pub key: DocKey,
    pub value: Option<Document>,
    /// Order-by values decoded straight off the index entry's key, when this
    /// item came from an index-driven scan. `order_key_tail` reuses these to
    /// build the next batch's cursor instead of re-deriving them from
    /// `value`, which may be absent (keys-only reads) or cover only the
    /// index's declared projection fields rather than every order key.
    index_values: Option<Vec<Bson>>,
}

pub struct Executor<'e, T: KvTxn> {
    codec: &'e KeyCodec,
    collections: &'e [Collection],
    txn: &'e T,
}

impl<'e, T: KvTxn> Executor<'e, T> {
    pub fn new(codec: &'e KeyCodec, collections: &'e [Collection], txn: &'e T) -> Self {
        Self { codec, collections, txn }
    }

    fn collection(&self, name: &str) -> Result<&'e Collection, EngineError> {
        self.collections
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| EngineError::CollectionNotFound(name.to_string()))
    }

    pub fn get(
        &self,
        collection: &str,
        key: &DocKey,
        opts: &GetOptions,
    ) -> Result<Option<Document>, EngineError> {
        let k = self.codec.doc_key(collection, key);
        match self.txn.get(&k)? {
            Some(bytes) => Ok(Some(decode_document(&bytes)?)),
            None if opts.error_if_missing => {
                Err(EngineError::DocumentNotFound(format!("{collection}/{key}")))
            }
            None => Ok(None),
        }
    }

    pub fn get_many(
        &self,
        collection: &str,
        keys: &[DocKey],
        opts: &GetOptions,
    ) -> Result<Vec<Option<Document>>, EngineError> {
        keys.iter().map(|k| self.get(collection, k, opts)).collect()
    }

    /// Write `doc` under `key`, running `IndexMaintainer` over the old/new
    /// pair in the same transaction. Returns the replaced document, if any.
    pub fn put(
        &self,
        collection_name: &str,
        key: &DocKey,
        doc: Document,
        opts: &PutOptions,
    ) -> Result<Option<Document>, EngineError> {
        let collection = self.collection(collection_name)?;
        let doc_key = self.codec.doc_key(collection_name, key);
        let old_bytes = self.txn.get(&doc_key)?;
        let old_doc = old_bytes.as_deref().map(decode_document).transpose()?;

        if opts.error_if_exists && old_doc.is_some() {
            return Err(EngineError::DocumentExists(format!("{collection_name}/{key}")));
        }
        if !opts.create_if_missing && old_doc.is_none() {
            return Err(EngineError::DocumentNotFound(format!("{collection_name}/{key}")));
        }

        let changes = maintainer::diff(
            self.codec,
            collection_name,
            &collection.indexes,
            key,
            old_doc.as_ref(),
            Some(&doc),
        );
        for k in &changes.deletes {
            self.txn.delete(k)?;
        }
        self.txn.put_batch(&changes.puts)?;

        let value = encode_document(&doc)?;
        self.txn.put(&doc_key, &value)?;
        Ok(old_doc)
    }

    /// Returns whether a document was actually removed.
    pub fn delete(
        &self,
        collection_name: &str,
        key: &DocKey,
        opts: &DeleteOptions,
    ) -> Result<bool, EngineError> {
        let collection = self.collection(collection_name)?;
        let doc_key = self.codec.doc_key(collection_name, key);
        let old_bytes = self.txn.get(&doc_key)?;
        let old_doc = match old_bytes {
            Some(bytes) => decode_document(&bytes)?,
            None => {
                if opts.error_if_missing {
                    return Err(EngineError::DocumentNotFound(format!(
                        "{collection_name}/{key}"
                    )));
                }
                return Ok(false);
            }
        };

        let changes = maintainer::diff(
            self.codec,
            collection_name,
            &collection.indexes,
            key,
            Some(&old_doc),
            None,
        );
        for k in &changes.deletes {
            self.txn.delete(k)?;
        }
        self.txn.put_batch(&changes.puts)?;
        self.txn.delete(&doc_key)?;
        Ok(true)
    }

    pub fn count(&self, collection_name: &str, opts: &FindOptions) -> Result<u64, EngineError> {
        let collection = self.collection(collection_name)?;
        let plan = planner::plan(
            self.codec,
            collection,
            &opts.query,
            &opts.order,
            &opts.properties,
        )?;
        let range = scan_range(plan.prefix, &opts.cursor);
        Ok(self.txn.count(&range)?)
    }

    pub fn find(
        &self,
        collection_name: &str,
        opts: &FindOptions,
    ) -> Result<Vec<FoundItem>, EngineError> {
        let collection = self.collection(collection_name)?;
        let plan = planner::plan(
            self.codec,
            collection,
            &opts.query,
            &opts.order,
            &opts.properties,
        )?;
        let range = scan_range(plan.prefix.clone(), &opts.cursor);
        let rows = self.txn.scan(&range)?;

        match plan.index {
            None => self.materialize_document_scan(collection_name, rows, &opts.properties),
            Some(_) => self.materialize_index_scan(collection_name, rows, &plan, &opts.properties),
        }
    }

    fn materialize_document_scan(
        &self,
        collection_name: &str,
        rows: Vec<(Vec<u8>, Vec<u8>)>,
        properties: &Properties,
    ) -> Result<Vec<FoundItem>, EngineError> {
        let keys_only = matches!(properties, Properties::Fields(f) if f.is_empty());
        rows.into_iter()
            .map(|(k, v)| {
                let key = self
                    .codec
                    .decode_document_key(&k)
                    .ok_or_else(|| EngineError::InvalidKey(format!("unreadable key in {collection_name}")))?;
                let value = if keys_only { None } else { Some(decode_document(&v)?) };
                Ok(FoundItem { key, value, index_values: None })
            })
            .collect()
    }

    fn materialize_index_scan(
        &self,
        collection_name: &str,
        rows: Vec<(Vec<u8>, Vec<u8>)>,
        plan: &Plan<'_>,
        properties: &Properties,
    ) -> Result<Vec<FoundItem>, EngineError> {
        let keys_only = matches!(properties, Properties::Fields(f) if f.is_empty());
        let mut items = Vec::with_capacity(rows.len());
        for (k, v) in rows {
            let (values, doc_key) = self
                .codec
                .decode_index_key(&k)
                .ok_or_else(|| EngineError::InvalidKey(format!("unreadable index key in {collection_name}")))?;
            let value = if keys_only {
                None
            } else if plan.satisfied_by_projection {
                if v.is_empty() {
                    None
                } else {
                    Some(bson::deserialize_from_slice::<Document>(&v).map_err(|e| {
                        EngineError::InvalidDocument(format!("corrupt projection payload: {e}"))
                    })?)
                }
            } else {
                // Full fetch: the index's projection doesn't cover every
                // requested field, so go back to the document.
                self.get(collection_name, &doc_key, &GetOptions::default())?
            };
            items.push(FoundItem { key: doc_key, value, index_values: Some(values) });
        }
        Ok(items)
    }

    /// Batched `find`, advancing `startAfter` after each non-empty batch.
    /// Stops the first time a batch comes back empty.
    pub fn for_each(
        &self,
        collection_name: &str,
        mut opts: FindOptions,
        batch_size: usize,
        mut f: impl FnMut(&FoundItem) -> Result<(), EngineError>,
    ) -> Result<u64, EngineError> {
        let mut visited = 0u64;
        opts.cursor.limit = Some(batch_size);
        loop {
            let batch = self.find(collection_name, &opts)?;
            if batch.is_empty() {
                return Ok(visited);
            }
            for item in &batch {
                f(item)?;
                visited += 1;
            }
            let last = batch.last().unwrap();
            opts.cursor.start_after = Some(self.order_key_tail(collection_name, &opts, last)?);
            opts.cursor.start = None;
        }
    }

    pub fn find_and_delete(
        &self,
        collection_name: &str,
        opts: FindOptions,
        batch_size: usize,
    ) -> Result<u64, EngineError> {
        let mut deleted = 0u64;
        self.for_each(collection_name, opts, batch_size, |item| {
            if self.delete(
                collection_name,
                &item.key,
                &DeleteOptions { error_if_missing: false },
            )? {
                deleted += 1;
            }
            Ok(())
        })?;
        Ok(deleted)
    }

    /// The tail bytes appended to a scan prefix to resume just past `item`:
    /// for an indexed scan this is `[orderVal.., docKey]`; for the unindexed
    /// document scan it's just `docKey`.
    fn order_key_tail(
        &self,
        collection_name: &str,
        opts: &FindOptions,
        item: &FoundItem,
    ) -> Result<Vec<u8>, EngineError> {
        let collection = self.collection(collection_name)?;
        if opts.query.is_empty() && opts.order.is_empty() {
            let full_key = self.codec.doc_key(collection_name, &item.key);
            let prefix_len = self.codec.collection_prefix(collection_name).len();
            return Ok(full_key[prefix_len..].to_vec());
        }
        let index = collection.find_index_for_query_and_order(&opts.query, &opts.order)?;
        // Reuse the values decoded straight off this item's index entry key
        // rather than re-deriving them from `value`, which may be absent
        // (keys-only reads) or cover only the index's projection fields.
        let full_values: Vec<Option<Bson>> = match &item.index_values {
            Some(values) => values.iter().cloned().map(Some).collect(),
            None => index.extract_values(item.value.as_ref()),
        };
        let full_key = self.codec.index_key(collection_name, index, full_values, &item.key);
        let prefix_len = self
            .codec
            .index_prefix_for_query(
                collection_name,
                index,
                &Collection::query_values_in_index_order(index, &opts.query),
            )
            .len();
        Ok(full_key[prefix_len..].to_vec())
    }
}

pub fn encode_document(doc: &Document) -> Result<Vec<u8>, EngineError> {
    bson::serialize_to_vec(doc).map_err(|e| EngineError::InvalidDocument(format!("failed to encode document: {e}")))
}

pub fn decode_document(bytes: &[u8]) -> Result<Document, EngineError> {
    bson::deserialize_from_slice(bytes).map_err(|e| EngineError::InvalidDocument(format!("failed to decode document: {e}")))
}
