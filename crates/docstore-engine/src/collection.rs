//! `Collection`: a name plus its ordered indexes, and the index-selection
//! rule every read goes through.

use std::collections::BTreeMap;

use bson::Bson;

use crate::error::EngineError;
use crate::index::Index;

pub struct Collection {
    pub name: String,
    pub indexes: Vec<Index>,
}

impl Collection {
    pub fn new(name: impl Into<String>, indexes: Vec<Index>) -> Self {
        Self {
            name: name.into(),
            indexes: indexes,
        }
    }

    /// Pick the first declared index whose leading property keys equal
    /// `query`'s keys (as a set — `query` is unordered) and whose remaining
    /// keys equal `order` exactly, in order. Declaration order breaks ties;
    /// the first match wins when a key could satisfy more than one index.
    pub fn find_index_for_query_and_order(
        &self,
        query: &BTreeMap<String, Bson>,
        order: &[String],
    ) -> Result<&Index, EngineError> {
        for index in &self.indexes {
            let keys = index.keys();
            if keys.len() < query.len() {
                continue;
            }
            let (prefix, tail) = keys.split_at(query.len());
            let prefix_matches = prefix.len() == query.len()
                && prefix.iter().all(|k| query.contains_key(k));
            if !prefix_matches {
                continue;
            }
            if tail == order {
                return Ok(index);
            }
        }
        Err(EngineError::IndexNotFound(format!(
            "no index on {} satisfies query keys {:?} with order {:?}",
            self.name,
            query.keys().collect::<Vec<_>>(),
            order
        )))
    }

    /// In declared-query-key order, the values `query` supplies for the
    /// chosen index's leading properties (used to build the scan prefix).
    pub fn query_values_in_index_order(
        index: &Index,
        query: &BTreeMap<String, Bson>,
    ) -> Vec<Bson> {
        index
            .keys()
            .iter()
            .take(query.len())
            .map(|k| query.get(k).cloned().unwrap_or(Bson::Null))
            .collect()
    }
}
