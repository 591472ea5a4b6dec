mod error;
mod options;
mod store;

pub use docstore_engine::{
    Cursor, DeleteOptions, FindOptions, FoundItem, GetOptions, Index, IndexProperty, InitOutcome,
    Properties, PutOptions, Statistics, DEFAULT_BATCH_SIZE,
};
pub use docstore_kv::{Kv, KvTxn, MemoryKv};

pub use error::StoreError;
pub use options::{collection, compound_index, computed_index, path_index, DocumentStoreOptions};
pub use store::{DocKey, DocumentStore, DocumentStoreTransaction};
