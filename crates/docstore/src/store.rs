//! `DocumentStore`: the public facade. Holds the declared schema and the
//! transactional KVS handle; delegates everything else to
//! `docstore_engine`. Modelled as two structs sharing the same
//! Executor-backed operation set by composition — a store-bound root and a
//! transaction-bound handle that carries a back-reference to it — rather
//! than the prototype-swap trick a dynamic language would use for this.

use std::cell::RefCell;
use std::sync::Mutex;

use bson::Document;
use docstore_engine::{
    Collection, DeclaredCollection, DeleteOptions, EngineError, Executor, FindOptions, FoundItem,
    GetOptions, InitOutcome, KeyCodec, PutOptions, Statistics, DEFAULT_BATCH_SIZE,
};
use docstore_engine::{destroy_all, get_statistics, initialize, remove_collections_marked_as_removed};
use docstore_kv::{Kv, KvTxn};

use crate::error::StoreError;
use crate::options::DocumentStoreOptions;

pub use docstore_engine::DocKey;

pub struct DocumentStore<K: Kv> {
    kv: K,
    codec: KeyCodec,
    collections: Vec<Collection>,
    declared: Vec<DeclaredCollection>,
    initialized: Mutex<bool>,
}

impl<K: Kv> DocumentStore<K> {
    pub fn new(kv: K, options: DocumentStoreOptions) -> Self {
        let codec = KeyCodec::new(options.name.clone());
        let collections = options
            .collections
            .iter()
            .map(|dc| Collection::new(dc.name.clone(), dc.indexes.clone()))
            .collect();
        Self {
            kv,
            codec,
            collections,
            declared: options.collections,
            initialized: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &str {
        self.codec.store_name()
    }

    /// `initializeDocumentStore` — idempotent; only ever exposed on the
    /// root handle, so calling it "inside a transaction" isn't something
    /// the type system lets a caller express (see `TransactionMisuse`).
    pub fn initialize_document_store(&self) -> Result<InitOutcome, StoreError> {
        self.do_initialize()
    }

    fn ensure_initialized(&self) -> Result<(), StoreError> {
        self.do_initialize().map(|_| ())
    }

    fn do_initialize(&self) -> Result<InitOutcome, StoreError> {
        let mut initialized = self.initialized.lock().unwrap();
        if *initialized {
            return Ok(InitOutcome::Reconciled { did_migrate: false });
        }
        let outcome = initialize(&self.kv, &self.codec, &self.declared)?;
        match &outcome {
            InitOutcome::Created => {
                tracing::info!(store = self.codec.store_name(), "didCreate");
            }
            InitOutcome::Reconciled { did_migrate: true } => {
                tracing::info!(store = self.codec.store_name(), "didMigrate");
            }
            InitOutcome::Reconciled { did_migrate: false } => {}
        }
        *initialized = true;
        Ok(outcome)
    }

    pub fn get_statistics(&self) -> Result<Statistics, StoreError> {
        self.ensure_initialized()?;
        Ok(get_statistics(&self.kv, &self.codec)?)
    }

    pub fn remove_collections_marked_as_removed(&self) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        Ok(remove_collections_marked_as_removed(&self.kv, &self.codec)?)
    }

    /// Drops every document, index entry and the schema record itself —
    /// only callable on the root handle, per `initializeDocumentStore`.
    pub fn destroy_all(&self) -> Result<(), StoreError> {
        destroy_all(&self.kv, &self.codec)?;
        *self.initialized.lock().unwrap() = false;
        Ok(())
    }

    pub fn close(&self) -> Result<(), StoreError> {
        Ok(self.kv.close()?)
    }

    /// Open a scoped ACID unit. Errors from `f` roll back the document
    /// write and every index side-effect together; nested calls from
    /// inside `f` reuse the active handle instead of opening a new one.
    pub fn transaction<'s, F, R>(&'s self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&DocumentStoreTransaction<'s, K>) -> Result<R, StoreError>,
    {
        self.ensure_initialized()?;
        let txn = self.kv.begin(false)?;
        let handle = DocumentStoreTransaction {
            root: self,
            txn,
        };
        match f(&handle) {
            Ok(value) => {
                handle.txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                let _ = handle.txn.rollback();
                Err(err)
            }
        }
    }

    fn read<'s, R>(
        &'s self,
        f: impl FnOnce(&Executor<'_, K::Txn<'s>>) -> Result<R, EngineError>,
    ) -> Result<R, StoreError> {
        self.ensure_initialized()?;
        let txn = self.kv.begin(true)?;
        let executor = Executor::new(&self.codec, &self.collections, &txn);
        let result = f(&executor)?;
        txn.rollback()?;
        Ok(result)
    }

    pub fn get(
        &self,
        collection: &str,
        key: &DocKey,
        opts: GetOptions,
    ) -> Result<Option<Document>, StoreError> {
        self.read(|ex| ex.get(collection, key, &opts))
    }

    pub fn get_many(
        &self,
        collection: &str,
        keys: &[DocKey],
        opts: GetOptions,
    ) -> Result<Vec<Option<Document>>, StoreError> {
        self.read(|ex| ex.get_many(collection, keys, &opts))
    }

    pub fn count(&self, collection: &str, opts: FindOptions) -> Result<u64, StoreError> {
        self.read(|ex| ex.count(collection, &opts))
    }

    pub fn find(&self, collection: &str, opts: FindOptions) -> Result<Vec<FoundItem>, StoreError> {
        self.read(|ex| ex.find(collection, &opts))
    }

    pub fn put(
        &self,
        collection: &str,
        key: &DocKey,
        doc: Document,
        opts: PutOptions,
    ) -> Result<Option<Document>, StoreError> {
        self.transaction(|t| t.put(collection, key, doc, opts))
    }

    pub fn delete(
        &self,
        collection: &str,
        key: &DocKey,
        opts: DeleteOptions,
    ) -> Result<bool, StoreError> {
        self.transaction(|t| t.delete(collection, key, opts))
    }

    pub fn for_each(
        &self,
        collection: &str,
        opts: FindOptions,
        batch_size: usize,
        f: impl FnMut(&FoundItem) -> Result<(), StoreError>,
    ) -> Result<u64, StoreError> {
        self.transaction(|t| t.for_each(collection, opts, batch_size, f))
    }

    pub fn find_and_delete(
        &self,
        collection: &str,
        opts: FindOptions,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        self.transaction(|t| t.find_and_delete(collection, opts, batch_size))
    }
}

/// The transaction-bound handle: same operation set as `DocumentStore`,
/// scoped to one KVS transaction. `root` is the back-reference used for
/// `inside_transaction`.
pub struct DocumentStoreTransaction<'s, K: Kv + 's> {
    root: &'s DocumentStore<K>,
    txn: K::Txn<'s>,
}

impl<'s, K: Kv + 's> DocumentStoreTransaction<'s, K> {
    pub fn inside_transaction(&self) -> bool {
        true
    }

    fn executor(&self) -> Executor<'_, K::Txn<'s>> {
        Executor::new(&self.root.codec, &self.root.collections, &self.txn)
    }

    /// Nested `transaction()` calls don't open a second KVS transaction —
    /// they just reuse this one.
    pub fn transaction<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&DocumentStoreTransaction<'s, K>) -> Result<R, StoreError>,
    {
        f(self)
    }

    pub fn get(
        &self,
        collection: &str,
        key: &DocKey,
        opts: GetOptions,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.executor().get(collection, key, &opts)?)
    }

    pub fn get_many(
        &self,
        collection: &str,
        keys: &[DocKey],
        opts: GetOptions,
    ) -> Result<Vec<Option<Document>>, StoreError> {
        Ok(self.executor().get_many(collection, keys, &opts)?)
    }

    pub fn put(
        &self,
        collection: &str,
        key: &DocKey,
        doc: Document,
        opts: PutOptions,
    ) -> Result<Option<Document>, StoreError> {
        Ok(self.executor().put(collection, key, doc, &opts)?)
    }

    pub fn delete(
        &self,
        collection: &str,
        key: &DocKey,
        opts: DeleteOptions,
    ) -> Result<bool, StoreError> {
        Ok(self.executor().delete(collection, key, &opts)?)
    }

    pub fn count(&self, collection: &str, opts: FindOptions) -> Result<u64, StoreError> {
        Ok(self.executor().count(collection, &opts)?)
    }

    pub fn find(&self, collection: &str, opts: FindOptions) -> Result<Vec<FoundItem>, StoreError> {
        Ok(self.executor().find(collection, &opts)?)
    }

    /// Batched iteration; the callback's error aborts the whole batch and
    /// is surfaced verbatim (the engine-level `for_each` only knows how to
    /// carry an `EngineError`, so a failing callback's real error rides
    /// along in `captured` and is unwrapped once the scan unwinds).
    pub fn for_each(
        &self,
        collection: &str,
        opts: FindOptions,
        batch_size: usize,
        mut f: impl FnMut(&FoundItem) -> Result<(), StoreError>,
    ) -> Result<u64, StoreError> {
        let captured: RefCell<Option<StoreError>> = RefCell::new(None);
        let result = self.executor().for_each(collection, opts, batch_size, |item| {
            f(item).map_err(|e| {
                *captured.borrow_mut() = Some(e);
                EngineError::InvalidDocument("callback aborted the batch".into())
            })
        });
        match result {
            Ok(visited) => Ok(visited),
            Err(engine_err) => Err(captured.into_inner().unwrap_or_else(|| engine_err.into())),
        }
    }

    pub fn find_and_delete(
        &self,
        collection: &str,
        opts: FindOptions,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        Ok(self.executor().find_and_delete(collection, opts, batch_size)?)
    }
}
