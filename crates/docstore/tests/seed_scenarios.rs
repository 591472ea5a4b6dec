use std::sync::Arc;

use bson::doc;
use docstore::{
    collection, compound_index, computed_index, path_index, DeleteOptions, DocKey,
    DocumentStoreOptions, FindOptions, GetOptions, MemoryKv, Properties, PutOptions,
};
use docstore::DocumentStore;

fn store(collections: Vec<docstore_engine::DeclaredCollection>) -> DocumentStore<Arc<MemoryKv>> {
    reopen(Arc::new(MemoryKv::new()), collections)
}

/// Build a facade over `kv` with a freshly declared schema — used to model
/// "reopening" a store with a changed collection/index list against data a
/// previous facade instance already wrote.
fn reopen(
    kv: Arc<MemoryKv>,
    collections: Vec<docstore_engine::DeclaredCollection>,
) -> DocumentStore<Arc<MemoryKv>> {
    let options = DocumentStoreOptions::new("seed-test")
        .unwrap()
        .with_collections(collections);
    DocumentStore::new(kv, options)
}

#[test]
fn empty_collection_creation() {
    let db = store(vec![collection("People", vec![])]);
    db.initialize_document_store().unwrap();
    assert_eq!(db.get_statistics().unwrap().store.pairs_count, 1);
}

#[test]
fn one_document() {
    let db = store(vec![collection("C", vec![])]);
    db.put(
        "C",
        &DocKey::String("aaa".into()),
        doc! { "p": "v" },
        PutOptions::default(),
    )
    .unwrap();
    assert_eq!(db.get_statistics().unwrap().store.pairs_count, 2);
}

#[test]
fn collection_add_then_remove() {
    let kv = Arc::new(MemoryKv::new());

    let with_c1 = reopen(kv.clone(), vec![collection("C1", vec![])]);
    with_c1.initialize_document_store().unwrap();

    let with_both = reopen(
        kv.clone(),
        vec![collection("C1", vec![]), collection("C2", vec![])],
    );
    with_both.initialize_document_store().unwrap();
    assert_eq!(with_both.get_statistics().unwrap().collections_count, 2);

    let with_c2_only = reopen(kv.clone(), vec![collection("C2", vec![])]);
    with_c2_only.initialize_document_store().unwrap();
    let stats = with_c2_only.get_statistics().unwrap();
    assert_eq!(stats.collections_count, 1);
    assert_eq!(stats.removed_collections_count, 1);

    with_c2_only.remove_collections_marked_as_removed().unwrap();
    let stats = with_c2_only.get_statistics().unwrap();
    assert_eq!(stats.removed_collections_count, 0);
}

#[test]
fn index_add_then_remove() {
    let kv = Arc::new(MemoryKv::new());

    let without_index = reopen(kv.clone(), vec![collection("People", vec![])]);
    without_index
        .put(
            "People",
            &DocKey::String("aaa".into()),
            doc! { "property1": "value1" },
            PutOptions::default(),
        )
        .unwrap();

    let with_index = reopen(
        kv.clone(),
        vec![collection("People", vec![path_index("property1")])],
    );
    with_index.initialize_document_store().unwrap();
    let stats = with_index.get_statistics().unwrap();
    assert_eq!(stats.indexes_count, 1);
    assert_eq!(stats.store.pairs_count, 3);

    with_index
        .put(
            "People",
            &DocKey::String("bbb".into()),
            doc! { "property1": "value2" },
            PutOptions::default(),
        )
        .unwrap();
    assert_eq!(with_index.get_statistics().unwrap().store.pairs_count, 5);

    let without_index_again = reopen(kv, vec![collection("People", vec![])]);
    without_index_again.initialize_document_store().unwrap();
    let stats = without_index_again.get_statistics().unwrap();
    assert_eq!(stats.indexes_count, 0);
    assert_eq!(stats.store.pairs_count, 3);
}

#[test]
fn query_and_order_with_reverse() {
    let db = store(vec![collection(
        "People",
        vec![compound_index(&["country", "city"])],
    )]);
    for (key, city) in [
        ("aaa", "Paris"),
        ("bbb", "Boston"),
        ("ccc", "Austin"),
        ("ddd", "Lyon"),
        ("eee", "Berlin"),
        ("fff", "Dallas"),
    ] {
        let country = if matches!(key, "aaa" | "ddd" | "eee") {
            "France"
        } else {
            "USA"
        };
        db.put(
            "People",
            &DocKey::String(key.into()),
            doc! { "country": country, "city": city },
            PutOptions::default(),
        )
        .unwrap();
    }

    let mut opts = FindOptions::default();
    opts.query.insert("country".to_string(), bson::Bson::String("USA".into()));
    opts.order = vec!["city".to_string()];
    let found = db.find("People", opts.clone()).unwrap();
    let keys: Vec<String> = found.iter().map(|f| f.key.to_string()).collect();
    assert_eq!(keys, vec!["ccc", "bbb", "fff"]);

    opts.cursor.reverse = true;
    let found = db.find("People", opts).unwrap();
    let keys: Vec<String> = found.iter().map(|f| f.key.to_string()).collect();
    assert_eq!(keys, vec!["fff", "bbb", "ccc"]);
}

#[test]
fn projection_falls_back_to_full_fetch_when_insufficient() {
    let db = store(vec![collection(
        "People",
        vec![path_index("country")
            .with_projection(vec!["firstName".to_string(), "lastName".to_string()])],
    )]);
    db.put(
        "People",
        &DocKey::String("aaa".into()),
        doc! { "country": "France", "firstName": "Ada", "lastName": "Lovelace", "age": 36 },
        PutOptions::default(),
    )
    .unwrap();

    let mut opts = FindOptions::default();
    opts.query.insert("country".to_string(), bson::Bson::String("France".into()));
    opts.properties = Properties::Fields(vec!["firstName".into(), "lastName".into()]);
    let found = db.find("People", opts).unwrap();
    let value = found[0].value.as_ref().unwrap();
    assert_eq!(value.get_str("firstName").unwrap(), "Ada");
    assert!(value.get("age").is_none());

    let mut opts = FindOptions::default();
    opts.query.insert("country".to_string(), bson::Bson::String("France".into()));
    opts.properties = Properties::Fields(vec!["firstName".into(), "lastName".into(), "age".into()]);
    let found = db.find("People", opts).unwrap();
    let value = found[0].value.as_ref().unwrap();
    assert_eq!(value.get_i32("age").unwrap(), 36);
}

#[test]
fn computed_index_orders_by_derived_key() {
    fn sort_key(doc: &bson::Document) -> Option<bson::Bson> {
        let last = doc.get_str("lastName").ok()?;
        let first = doc.get_str("firstName").ok()?;
        Some(bson::Bson::String(format!("{last}|{first}")))
    }

    let index = computed_index("fullNameSortKey", sort_key).unwrap();
    let db = store(vec![collection("People", vec![index])]);

    let people = [
        ("aaa", "Park", "Alice"),
        ("bbb", "Lee", "Bo"),
        ("ccc", "Kim", "Charlie"),
        ("ddd", "Park", "Zoe"),
        ("eee", "Lee", "Eve"),
        ("fff", "Nguyen", "Frank"),
    ];
    for (key, last, first) in people {
        db.put(
            "People",
            &DocKey::String(key.into()),
            doc! { "firstName": first, "lastName": last },
            PutOptions::default(),
        )
        .unwrap();
    }

    let mut opts = FindOptions::default();
    opts.order = vec!["fullNameSortKey".to_string()];
    let found = db.find("People", opts).unwrap();
    let keys: Vec<String> = found.iter().map(|f| f.key.to_string()).collect();
    assert_eq!(keys, vec!["ccc", "bbb", "eee", "fff", "aaa", "ddd"]);
}

#[test]
fn transaction_abort_rolls_back_the_write() {
    let db = store(vec![collection("People", vec![])]);
    db.put(
        "People",
        &DocKey::String("aaa".into()),
        doc! { "firstName": "Manuel" },
        PutOptions::default(),
    )
    .unwrap();

    let result: Result<(), docstore::StoreError> = db.transaction(|t| {
        t.put(
            "People",
            &DocKey::String("aaa".into()),
            doc! { "firstName": "Someone Else" },
            PutOptions::default(),
        )?;
        Err(docstore::StoreError::InvalidDocument("forced abort".into()))
    });
    assert!(result.is_err());

    let doc = db
        .get("People", &DocKey::String("aaa".into()), GetOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(doc.get_str("firstName").unwrap(), "Manuel");
}

#[test]
fn delete_removes_document_and_index_entries() {
    let db = store(vec![collection("People", vec![path_index("country")])]);
    db.put(
        "People",
        &DocKey::String("aaa".into()),
        doc! { "country": "USA" },
        PutOptions::default(),
    )
    .unwrap();

    let deleted = db
        .delete("People", &DocKey::String("aaa".into()), DeleteOptions::default())
        .unwrap();
    assert!(deleted);
    assert_eq!(db.get_statistics().unwrap().store.pairs_count, 1);

    let missing = db
        .get(
            "People",
            &DocKey::String("aaa".into()),
            GetOptions { error_if_missing: false },
        )
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn find_and_delete_removes_every_match() {
    let db = store(vec![collection("People", vec![path_index("country")])]);
    for key in ["aaa", "bbb", "ccc"] {
        db.put(
            "People",
            &DocKey::String(key.into()),
            doc! { "country": "USA" },
            PutOptions::default(),
        )
        .unwrap();
    }
    db.put(
        "People",
        &DocKey::String("ddd".into()),
        doc! { "country": "France" },
        PutOptions::default(),
    )
    .unwrap();

    let mut opts = FindOptions::default();
    opts.query.insert("country".to_string(), bson::Bson::String("USA".into()));
    let deleted = db.find_and_delete("People", opts, 2).unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(db.get_statistics().unwrap().collections_count, 1);
    assert!(db
        .get("People", &DocKey::String("ddd".into()), GetOptions::default())
        .unwrap()
        .is_some());
}

/// `order_key_tail` used to re-derive a batch's cursor values from
/// `item.value`, which is incomplete (or absent) whenever the index's
/// projection doesn't cover every order field — exactly the case here
/// (ordered by `country`+`city`, projected on `firstName` only). With a
/// `batch_size` smaller than the match count this corrupted `startAfter` and
/// skipped or re-visited documents across batch boundaries.
#[test]
fn for_each_paginates_correctly_when_projection_excludes_an_order_field() {
    let db = store(vec![collection(
        "People",
        vec![compound_index(&["country", "city"])
            .with_projection(vec!["firstName".to_string()])],
    )]);
    let people = [
        ("aaa", "France", "Paris", "Ada"),
        ("bbb", "USA", "Boston", "Bo"),
        ("ccc", "USA", "Austin", "Cy"),
        ("ddd", "France", "Lyon", "Dee"),
        ("eee", "USA", "Dallas", "Eve"),
        ("fff", "USA", "Reno", "Finn"),
    ];
    for (key, country, city, first) in people {
        db.put(
            "People",
            &DocKey::String(key.into()),
            doc! { "country": country, "city": city, "firstName": first },
            PutOptions::default(),
        )
        .unwrap();
    }
    let mut expected: Vec<String> = people.iter().map(|(k, ..)| k.to_string()).collect();
    expected.sort();

    // satisfied-by-projection reads: `item.value` only carries `firstName`.
    let mut opts = FindOptions::default();
    opts.order = vec!["country".to_string(), "city".to_string()];
    opts.properties = Properties::Fields(vec!["firstName".to_string()]);

    let mut visited = Vec::new();
    let count = db
        .for_each("People", opts.clone(), 2, |item| {
            visited.push(item.key.to_string());
            Ok(())
        })
        .unwrap();
    assert_eq!(count, 6);
    visited.sort();
    assert_eq!(visited, expected, "every document visited exactly once");

    // keys-only reads: `item.value` is always `None`.
    opts.properties = Properties::Fields(vec![]);
    let mut visited_keys_only = Vec::new();
    let count = db
        .for_each("People", opts, 2, |item| {
            visited_keys_only.push(item.key.to_string());
            Ok(())
        })
        .unwrap();
    assert_eq!(count, 6);
    visited_keys_only.sort();
    assert_eq!(visited_keys_only, expected);
}

#[test]
fn find_and_delete_paginates_correctly_when_projection_excludes_an_order_field() {
    let db = store(vec![collection(
        "People",
        vec![compound_index(&["country", "city"])
            .with_projection(vec!["firstName".to_string()])],
    )]);
    let people = [
        ("aaa", "France", "Paris", "Ada"),
        ("bbb", "USA", "Boston", "Bo"),
        ("ccc", "USA", "Austin", "Cy"),
        ("ddd", "France", "Lyon", "Dee"),
        ("eee", "USA", "Dallas", "Eve"),
        ("fff", "USA", "Reno", "Finn"),
    ];
    for (key, country, city, first) in people {
        db.put(
            "People",
            &DocKey::String(key.into()),
            doc! { "country": country, "city": city, "firstName": first },
            PutOptions::default(),
        )
        .unwrap();
    }

    let mut opts = FindOptions::default();
    opts.query.insert("country".to_string(), bson::Bson::String("USA".into()));
    opts.order = vec!["city".to_string()];
    opts.properties = Properties::Fields(vec!["firstName".to_string()]);

    let deleted = db.find_and_delete("People", opts, 2).unwrap();
    assert_eq!(deleted, 4);
    for key in ["bbb", "ccc", "eee", "fff"] {
        assert!(db
            .get(
                "People",
                &DocKey::String(key.into()),
                GetOptions { error_if_missing: false },
            )
            .unwrap()
            .is_none());
    }
    for key in ["aaa", "ddd"] {
        assert!(db
            .get("People", &DocKey::String(key.into()), GetOptions::default())
            .unwrap()
            .is_some());
    }
}
