mod codec;
mod collection;
mod error;
mod executor;
mod index;
mod key;
mod maintainer;
mod planner;
mod schema;

pub use codec::{scan_range, Cursor, KeyCodec};
pub use collection::Collection;
pub use error::EngineError;
pub use executor::{
    decode_document, encode_document, DeleteOptions, Executor, FindOptions, FoundItem,
    GetOptions, PutOptions, DEFAULT_BATCH_SIZE,
};
pub use index::{Index, IndexProperty};
pub use key::DocKey;
pub use maintainer::IndexChanges;
pub use planner::Properties;
pub use schema::{
    destroy_all, get_statistics, initialize, remove_collections_marked_as_removed,
    DeclaredCollection, InitOutcome, PersistedCollection, PersistedIndex, SchemaRecord,
    Statistics, StoreStatistics, CURRENT_SCHEMA_VERSION,
};
