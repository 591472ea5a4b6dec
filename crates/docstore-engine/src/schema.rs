//! `SchemaEngine`: the persisted schema record, its lock, and the
//! declared-vs-persisted diff that adds, rebuilds or retires collections and
//! indexes.
//!
//! Every structural change (collection created, index added/updated/
//! removed) runs inside a single KVS transaction alongside the record
//! update describing it, so a crash mid-rebuild leaves either the old state
//! or the fully-migrated one — never a half-built index.

use docstore_kv::{Kv, KvTxn, ScanRange};
use serde::{Deserialize, Serialize};

use crate::codec::KeyCodec;
use crate::error::EngineError;
use crate::executor::decode_document;
use crate::index::{Index, IndexProperty};
use crate::maintainer;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const LOCK_RETRY: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub name: String,
    pub version: u32,
    pub is_locked: bool,
    pub collections: Vec<PersistedCollection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCollection {
    pub name: String,
    #[serde(default)]
    pub has_been_removed: bool,
    pub indexes: Vec<PersistedIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedIndex {
    pub keys: Vec<String>,
    pub projection: Option<Vec<String>>,
    pub version: Option<i64>,
}

impl PersistedIndex {
    fn from_index(index: &Index) -> Self {
        Self {
            keys: index.keys(),
            projection: index.projection.clone(),
            version: index.version,
        }
    }
}

impl SchemaRecord {
    fn encode(&self) -> Result<Vec<u8>, EngineError> {
        bson::serialize_to_vec(self).map_err(|e| EngineError::InvalidDocument(format!("failed to encode schema record: {e}")))
    }

    fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        bson::deserialize_from_slice(bytes).map_err(|e| EngineError::InvalidDocument(format!("failed to decode schema record: {e}")))
    }
}

/// What the caller declared at construction time: a collection name plus
/// its indexes. `docstore` builds these from `DocumentStoreOptions`.
pub struct DeclaredCollection {
    pub name: String,
    pub indexes: Vec<Index>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitOutcome {
    /// No record existed; one was created from the declared schema.
    Created,
    /// A record existed; `did_migrate` says whether anything actually changed.
    Reconciled { did_migrate: bool },
}

fn load<T: KvTxn>(txn: &T, key: &[u8]) -> Result<Option<SchemaRecord>, EngineError> {
    match txn.get(key)? {
        Some(bytes) => Ok(Some(SchemaRecord::decode(&bytes)?)),
        None => Ok(None),
    }
}

/// `initializeDocumentStore` — idempotent; the caller is responsible for
/// refusing to call it from inside an active transaction (`TransactionMisuse`).
pub fn initialize<K: Kv>(
    kv: &K,
    codec: &KeyCodec,
    declared: &[DeclaredCollection],
) -> Result<InitOutcome, EngineError> {
    let key = codec.schema_key();

    {
        let txn = kv.begin(false)?;
        if load(&txn, &key)?.is_none() {
            let record = SchemaRecord {
                name: codec.store_name().to_string(),
                version: CURRENT_SCHEMA_VERSION,
                is_locked: false,
                collections: declared
                    .iter()
                    .map(|dc| PersistedCollection {
                        name: dc.name.clone(),
                        has_been_removed: false,
                        indexes: dc.indexes.iter().map(PersistedIndex::from_index).collect(),
                    })
                    .collect(),
            };
            txn.put(&key, &record.encode()?)?;
            txn.commit()?;
            return Ok(InitOutcome::Created);
        }
        txn.rollback()?;
    }

    acquire_lock(kv, codec)?;
    let outcome = (|| -> Result<InitOutcome, EngineError> {
        let txn = kv.begin(false)?;
        let mut record = load(&txn, &key)?
            .ok_or_else(|| EngineError::InvalidDocument("schema record disappeared under lock".into()))?;
        upgrade(&mut record)?;
        let did_migrate = migrate(&txn, codec, &mut record, declared)?;
        txn.put(&key, &record.encode()?)?;
        txn.commit()?;
        Ok(InitOutcome::Reconciled { did_migrate })
    })();
    release_lock(kv, codec)?;
    outcome
}

fn acquire_lock<K: Kv>(kv: &K, codec: &KeyCodec) -> Result<(), EngineError> {
    let key = codec.schema_key();
    loop {
        let txn = kv.begin(false)?;
        let mut record = load(&txn, &key)?
            .ok_or_else(|| EngineError::InvalidDocument("schema record missing".into()))?;
        if !record.is_locked {
            record.is_locked = true;
            txn.put(&key, &record.encode()?)?;
            txn.commit()?;
            return Ok(());
        }
        txn.rollback()?;
        std::thread::sleep(LOCK_RETRY);
    }
}

fn release_lock<K: Kv>(kv: &K, codec: &KeyCodec) -> Result<(), EngineError> {
    let key = codec.schema_key();
    let txn = kv.begin(false)?;
    if let Some(mut record) = load(&txn, &key)? {
        record.is_locked = false;
        txn.put(&key, &record.encode()?)?;
    }
    txn.commit()?;
    Ok(())
}

/// Rewrite the record to the current version. `version > current` means the
/// record was written by newer code than is running now.
fn upgrade(record: &mut SchemaRecord) -> Result<(), EngineError> {
    if record.version > CURRENT_SCHEMA_VERSION {
        return Err(EngineError::CannotDowngrade {
            persisted: record.version,
            current: CURRENT_SCHEMA_VERSION,
        });
    }
    record.version = CURRENT_SCHEMA_VERSION;
    Ok(())
}

/// Diff declared vs. persisted collections/indexes, applying add/update/
/// remove as it goes. Returns whether anything actually changed.
fn migrate<T: KvTxn>(
    txn: &T,
    codec: &KeyCodec,
    record: &mut SchemaRecord,
    declared: &[DeclaredCollection],
) -> Result<bool, EngineError> {
    let mut did_migrate = false;

    for dc in declared {
        let pos = match record.collections.iter().position(|c| c.name == dc.name) {
            Some(pos) if record.collections[pos].has_been_removed => {
                return Err(EngineError::ReAddNotSupported(dc.name.clone()));
            }
            Some(pos) => pos,
            None => {
                record.collections.push(PersistedCollection {
                    name: dc.name.clone(),
                    has_been_removed: false,
                    indexes: Vec::new(),
                });
                did_migrate = true;
                record.collections.len() - 1
            }
        };

        for index in &dc.indexes {
            let keys = index.keys();
            match record.collections[pos].indexes.iter().position(|pi| pi.keys == keys) {
                None => {
                    add_index(txn, codec, &dc.name, index)?;
                    record.collections[pos].indexes.push(PersistedIndex::from_index(index));
                    did_migrate = true;
                }
                Some(i) => {
                    let changed = record.collections[pos].indexes[i].projection != index.projection
                        || record.collections[pos].indexes[i].version != index.version;
                    if changed {
                        remove_index_range(txn, codec, &dc.name, &keys)?;
                        add_index(txn, codec, &dc.name, index)?;
                        record.collections[pos].indexes[i] = PersistedIndex::from_index(index);
                        did_migrate = true;
                    }
                }
            }
        }

        let declared_keys: Vec<Vec<String>> = dc.indexes.iter().map(Index::keys).collect();
        let mut i = 0;
        while i < record.collections[pos].indexes.len() {
            if declared_keys.contains(&record.collections[pos].indexes[i].keys) {
                i += 1;
                continue;
            }
            let removed = record.collections[pos].indexes.remove(i);
            remove_index_range(txn, codec, &dc.name, &removed.keys)?;
            did_migrate = true;
        }
    }

    for pc in record.collections.iter_mut() {
        if !pc.has_been_removed && !declared.iter().any(|dc| dc.name == pc.name) {
            pc.has_been_removed = true;
            did_migrate = true;
        }
    }
    let just_removed: Vec<(String, Vec<Vec<String>>)> = record
        .collections
        .iter()
        .filter(|pc| pc.has_been_removed)
        .map(|pc| (pc.name.clone(), pc.indexes.iter().map(|pi| pi.keys.clone()).collect()))
        .collect();
    for (name, index_keys) in just_removed {
        for keys in index_keys {
            remove_index_range(txn, codec, &name, &keys)?;
        }
    }

    Ok(did_migrate)
}

fn add_index<T: KvTxn>(txn: &T, codec: &KeyCodec, collection: &str, index: &Index) -> Result<(), EngineError> {
    let prefix = codec.collection_prefix(collection);
    for (k, v) in txn.scan(&ScanRange::prefix(prefix))? {
        let doc_key = codec
            .decode_document_key(&k)
            .ok_or_else(|| EngineError::InvalidKey(format!("unreadable document key in {collection}")))?;
        let doc = decode_document(&v)?;
        let changes = maintainer::diff(
            codec,
            collection,
            std::slice::from_ref(index),
            &doc_key,
            None,
            Some(&doc),
        );
        txn.put_batch(&changes.puts)?;
    }
    Ok(())
}

fn remove_index_range<T: KvTxn>(txn: &T, codec: &KeyCodec, collection: &str, keys: &[String]) -> Result<(), EngineError> {
    let by_keys = Index::new(keys.iter().map(|k| IndexProperty::Path(k.clone())).collect());
    let prefix = codec.index_prefix(collection, &by_keys);
    txn.delete_range(&ScanRange::prefix(prefix))?;
    Ok(())
}

/// Drop the document prefix for every collection marked `hasBeenRemoved`
/// and forget it in the record.
pub fn remove_collections_marked_as_removed<K: Kv>(
    kv: &K,
    codec: &KeyCodec,
) -> Result<(), EngineError> {
    let key = codec.schema_key();
    let txn = kv.begin(false)?;
    let mut record = load(&txn, &key)?
        .ok_or_else(|| EngineError::InvalidDocument("schema record missing".into()))?;
    let (keep, remove): (Vec<_>, Vec<_>) = record.collections.into_iter().partition(|c| !c.has_been_removed);
    for pc in &remove {
        let prefix = codec.collection_prefix(&pc.name);
        txn.delete_range(&ScanRange::prefix(prefix))?;
    }
    record.collections = keep;
    txn.put(&key, &record.encode()?)?;
    txn.commit()?;
    Ok(())
}

/// Drop the schema record and every document/index entry under the store.
/// Leaves the store as if it had never been initialised.
pub fn destroy_all<K: Kv>(kv: &K, codec: &KeyCodec) -> Result<(), EngineError> {
    let key = codec.schema_key();
    let txn = kv.begin(false)?;
    if let Some(record) = load(&txn, &key)? {
        for pc in &record.collections {
            let doc_prefix = codec.collection_prefix(&pc.name);
            txn.delete_range(&ScanRange::prefix(doc_prefix))?;
            for pi in &pc.indexes {
                let by_keys = Index::new(pi.keys.iter().map(|k| IndexProperty::Path(k.clone())).collect());
                let idx_prefix = codec.index_prefix(&pc.name, &by_keys);
                txn.delete_range(&ScanRange::prefix(idx_prefix))?;
            }
        }
    }
    txn.delete(&key)?;
    txn.commit()?;
    Ok(())
}

pub struct StoreStatistics {
    pub pairs_count: u64,
}

pub struct Statistics {
    pub collections_count: u64,
    pub removed_collections_count: u64,
    pub indexes_count: u64,
    pub store: StoreStatistics,
}

pub fn get_statistics<K: Kv>(kv: &K, codec: &KeyCodec) -> Result<Statistics, EngineError> {
    let key = codec.schema_key();
    let txn = kv.begin(true)?;
    let record = load(&txn, &key)?
        .ok_or_else(|| EngineError::InvalidDocument("schema record missing".into()))?;

    let collections_count = record.collections.iter().filter(|c| !c.has_been_removed).count() as u64;
    let removed_collections_count = record.collections.iter().filter(|c| c.has_been_removed).count() as u64;
    let indexes_count = record
        .collections
        .iter()
        .filter(|c| !c.has_been_removed)
        .map(|c| c.indexes.len() as u64)
        .sum();

    let mut pairs_count = 1u64; // the schema record itself
    for pc in &record.collections {
        let doc_prefix = codec.collection_prefix(&pc.name);
        pairs_count += txn.count(&ScanRange::prefix(doc_prefix))?;
        for pi in &pc.indexes {
            let by_keys = Index::new(pi.keys.iter().map(|k| IndexProperty::Path(k.clone())).collect());
            let idx_prefix = codec.index_prefix(&pc.name, &by_keys);
            pairs_count += txn.count(&ScanRange::prefix(idx_prefix))?;
        }
    }

    Ok(Statistics {
        collections_count,
        removed_collections_count,
        indexes_count,
        store: StoreStatistics { pairs_count },
    })
}
