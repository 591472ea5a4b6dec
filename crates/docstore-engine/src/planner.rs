//! Turn a `(query, order)` request into a scan plan: which index (if any)
//! to read from, the byte prefix that bounds the scan, and whether the
//! index's projection can answer the request without a second fetch.

use std::collections::BTreeMap;

use bson::Bson;

use crate::codec::KeyCodec;
use crate::collection::Collection;
use crate::error::EngineError;
use crate::index::Index;

/// What value each result row should carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Properties {
    /// Full documents (a second fetch past any index projection).
    All,
    /// Only these fields — satisfied from an index projection when every
    /// field is in it, otherwise forces a full fetch. An empty list means
    /// "keys only".
    Fields(Vec<String>),
}

pub struct Plan<'c> {
    /// `None` means "no index — scan the collection's document prefix".
    pub index: Option<&'c Index>,
    pub prefix: Vec<u8>,
    /// True when `properties` can be answered purely from the chosen
    /// index's stored projection.
    pub satisfied_by_projection: bool,
}

pub fn plan<'c>(
    codec: &KeyCodec,
    collection: &'c Collection,
    query: &BTreeMap<String, Bson>,
    order: &[String],
    properties: &Properties,
) -> Result<Plan<'c>, EngineError> {
    if query.is_empty() && order.is_empty() {
        return Ok(Plan {
            index: None,
            prefix: codec.collection_prefix(&collection.name),
            satisfied_by_projection: false,
        });
    }

    let index = collection.find_index_for_query_and_order(query, order)?;
    let query_values = Collection::query_values_in_index_order(index, query);
    let prefix = codec.index_prefix_for_query(&collection.name, index, &query_values);

    let satisfied_by_projection = match properties {
        Properties::All => false,
        Properties::Fields(fields) => match &index.projection {
            Some(projected) => fields.iter().all(|f| projected.contains(f)),
            None => fields.is_empty(),
        },
    };

    Ok(Plan {
        index: Some(index),
        prefix,
        satisfied_by_projection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexProperty;

    fn collection() -> Collection {
        Collection::new(
            "people",
            vec![Index::new(vec![
                IndexProperty::Path("country".into()),
                IndexProperty::Path("city".into()),
            ])
            .with_projection(vec!["firstName".into()])],
        )
    }

    #[test]
    fn empty_query_and_order_scans_document_prefix() {
        let codec = KeyCodec::new("s");
        let c = collection();
        let p = plan(&codec, &c, &BTreeMap::new(), &[], &Properties::All).unwrap();
        assert!(p.index.is_none());
    }

    #[test]
    fn projection_satisfies_subset_of_fields() {
        let codec = KeyCodec::new("s");
        let c = collection();
        let mut query = BTreeMap::new();
        query.insert("country".to_string(), Bson::String("USA".into()));
        let order = vec!["city".to_string()];
        let props = Properties::Fields(vec!["firstName".into()]);
        let p = plan(&codec, &c, &query, &order, &props).unwrap();
        assert!(p.satisfied_by_projection);

        let props = Properties::Fields(vec!["firstName".into(), "age".into()]);
        let p = plan(&codec, &c, &query, &order, &props).unwrap();
        assert!(!p.satisfied_by_projection);
    }
}
