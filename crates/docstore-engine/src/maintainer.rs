//! `IndexMaintainer`: given a document's old and new state, compute which
//! index entries to delete and which to write. Pure — no KVS access — so the
//! diff algorithm can be tested directly; the caller applies the resulting
//! `IndexChanges` inside its own transaction.

use bson::Document;

use crate::codec::KeyCodec;
use crate::index::Index;
use crate::key::DocKey;

#[derive(Debug, Default)]
pub struct IndexChanges {
    pub puts: Vec<(Vec<u8>, Vec<u8>)>,
    pub deletes: Vec<Vec<u8>>,
}

impl IndexChanges {
    fn merge(&mut self, other: IndexChanges) {
        self.puts.extend(other.puts);
        self.deletes.extend(other.deletes);
    }
}

/// Diff one index's old/new entry for a single document.
///
/// Mirrors the write-path contract directly: delete the old entry iff its
/// values changed and none of them was undefined; write the new entry iff
/// either the values or the projection changed and none of the new values
/// is undefined.
fn diff_one(
    codec: &KeyCodec,
    collection: &str,
    index: &Index,
    key: &DocKey,
    old_doc: Option<&Document>,
    new_doc: Option<&Document>,
) -> IndexChanges {
    let old_values = index.extract_values(old_doc);
    let new_values = index.extract_values(new_doc);
    let old_projection = index.extract_projection(old_doc);
    let new_projection = index.extract_projection(new_doc);

    let values_differ = old_values != new_values;
    let projection_differs = old_projection != new_projection;

    let old_complete = old_values.iter().all(Option::is_some);
    let new_complete = new_values.iter().all(Option::is_some);

    let mut changes = IndexChanges::default();

    if values_differ && old_complete {
        let entry_key = codec.index_key(collection, index, old_values, key);
        changes.deletes.push(entry_key);
    }

    if (values_differ || projection_differs) && new_complete {
        let entry_key = codec.index_key(collection, index, new_values, key);
        let value = match &new_projection {
            Some(doc) => bson::serialize_to_vec(doc).unwrap_or_default(),
            None => Vec::new(),
        };
        changes.puts.push((entry_key, value));
    }

    changes
}

/// Diff every index in `collection_indexes` for one document write/delete.
pub fn diff(
    codec: &KeyCodec,
    collection: &str,
    collection_indexes: &[Index],
    key: &DocKey,
    old_doc: Option<&Document>,
    new_doc: Option<&Document>,
) -> IndexChanges {
    let mut changes = IndexChanges::default();
    for index in collection_indexes {
        changes.merge(diff_one(codec, collection, index, key, old_doc, new_doc));
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexProperty;
    use bson::doc;

    fn codec() -> KeyCodec {
        KeyCodec::new("store")
    }

    fn simple_index(key: &str) -> Index {
        Index::new(vec![IndexProperty::Path(key.into())])
    }

    #[test]
    fn insert_writes_one_entry_per_index() {
        let idx = simple_index("country");
        let new_doc = doc! { "country": "USA" };
        let changes = diff(
            &codec(),
            "people",
            &[idx],
            &DocKey::String("aaa".into()),
            None,
            Some(&new_doc),
        );
        assert_eq!(changes.puts.len(), 1);
        assert!(changes.deletes.is_empty());
    }

    #[test]
    fn value_change_deletes_old_and_writes_new() {
        let idx = simple_index("country");
        let old_doc = doc! { "country": "USA" };
        let new_doc = doc! { "country": "France" };
        let changes = diff(
            &codec(),
            "people",
            &[idx],
            &DocKey::String("aaa".into()),
            Some(&old_doc),
            Some(&new_doc),
        );
        assert_eq!(changes.puts.len(), 1);
        assert_eq!(changes.deletes.len(), 1);
        assert_ne!(changes.puts[0].0, changes.deletes[0]);
    }

    #[test]
    fn field_missing_in_new_doc_deletes_without_inserting() {
        let idx = simple_index("country");
        let old_doc = doc! { "country": "USA" };
        let new_doc = doc! { "other": 1 };
        let changes = diff(
            &codec(),
            "people",
            &[idx],
            &DocKey::String("aaa".into()),
            Some(&old_doc),
            Some(&new_doc),
        );
        assert!(changes.puts.is_empty());
        assert_eq!(changes.deletes.len(), 1);
    }

    #[test]
    fn field_missing_in_old_doc_only_inserts() {
        let idx = simple_index("country");
        let old_doc = doc! { "other": 1 };
        let new_doc = doc! { "country": "USA" };
        let changes = diff(
            &codec(),
            "people",
            &[idx],
            &DocKey::String("aaa".into()),
            Some(&old_doc),
            Some(&new_doc),
        );
        assert_eq!(changes.puts.len(), 1);
        assert!(changes.deletes.is_empty());
    }

    #[test]
    fn delete_with_no_new_doc_only_deletes() {
        let idx = simple_index("country");
        let old_doc = doc! { "country": "USA" };
        let changes = diff(
            &codec(),
            "people",
            &[idx],
            &DocKey::String("aaa".into()),
            Some(&old_doc),
            None,
        );
        assert!(changes.puts.is_empty());
        assert_eq!(changes.deletes.len(), 1);
    }

    #[test]
    fn unchanged_values_and_projection_produce_no_changes() {
        let idx = simple_index("country");
        let doc_both = doc! { "country": "USA" };
        let changes = diff(
            &codec(),
            "people",
            &[idx],
            &DocKey::String("aaa".into()),
            Some(&doc_both),
            Some(&doc_both),
        );
        assert!(changes.puts.is_empty());
        assert!(changes.deletes.is_empty());
    }

    #[test]
    fn projection_only_change_rewrites_entry_with_same_key() {
        let idx = simple_index("country").with_projection(vec!["name".into()]);
        let old_doc = doc! { "country": "USA", "name": "Ada" };
        let new_doc = doc! { "country": "USA", "name": "Bea" };
        let changes = diff(
            &codec(),
            "people",
            &[idx],
            &DocKey::String("aaa".into()),
            Some(&old_doc),
            Some(&new_doc),
        );
        assert_eq!(changes.puts.len(), 1);
        assert!(changes.deletes.is_empty());
    }
}
