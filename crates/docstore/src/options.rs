//! Construction options. A `collections` entry is a name plus zero or more
//! indexes; an index is a simple path, a compound list of paths, or a
//! computed function — built with the helpers below instead of JSON-style
//! dynamic dispatch, since Rust already gives each form its own type.

use std::sync::Arc;

use bson::{Bson, Document};
use docstore_engine::{DeclaredCollection, Index, IndexProperty};

use crate::error::StoreError;

/// A single-property index on a (possibly dotted) path.
pub fn path_index(path: impl Into<String>) -> Index {
    Index::new(vec![IndexProperty::Path(path.into())])
}

/// A compound index over several paths, in the given order.
pub fn compound_index(paths: &[&str]) -> Index {
    Index::new(
        paths
            .iter()
            .map(|p| IndexProperty::Path((*p).to_string()))
            .collect(),
    )
}

/// An index keyed on a user function rather than a document path. `name`
/// becomes the index's key and must be non-empty and stable across runs
/// (it's persisted in the schema record and can't be diffed like a path).
pub fn computed_index(
    name: impl Into<String>,
    f: impl Fn(&Document) -> Option<Bson> + Send + Sync + 'static,
) -> Result<Index, StoreError> {
    let name = name.into();
    if name.is_empty() {
        return Err(StoreError::ConfigError(
            "a computed index needs a non-empty, stable name".into(),
        ));
    }
    Ok(Index::new(vec![IndexProperty::Computed {
        name,
        f: Arc::new(f),
    }]))
}

/// A declared collection: a name plus its ordered indexes.
pub fn collection(name: impl Into<String>, indexes: Vec<Index>) -> DeclaredCollection {
    DeclaredCollection {
        name: name.into(),
        indexes,
    }
}

pub struct DocumentStoreOptions {
    pub name: String,
    pub collections: Vec<DeclaredCollection>,
}

impl DocumentStoreOptions {
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        if name.is_empty() {
            return Err(StoreError::ConfigError("name must be non-empty".into()));
        }
        Ok(Self {
            name,
            collections: Vec::new(),
        })
    }

    pub fn with_collections(mut self, collections: Vec<DeclaredCollection>) -> Self {
        self.collections = collections;
        self
    }
}
