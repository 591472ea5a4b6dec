//! `Index` value objects and the dotted-path/computed extraction they're
//! built from.

use std::sync::Arc;

use bson::{Bson, Document};

/// One property an index is keyed on: either a (possibly dotted) path into
/// the flattened document, or a user function over the un-flattened one.
#[derive(Clone)]
pub enum IndexProperty {
    Path(String),
    Computed {
        name: String,
        f: Arc<dyn Fn(&Document) -> Option<Bson> + Send + Sync>,
    },
}

impl IndexProperty {
    pub fn key(&self) -> &str {
        match self {
            IndexProperty::Path(p) => p,
            IndexProperty::Computed { name, .. } => name,
        }
    }

    /// Extract this property's value from a document. `None` stands for
    /// "undefined" (path absent / function returned nothing).
    pub fn extract(&self, doc: &Document) -> Option<Bson> {
        match self {
            IndexProperty::Path(path) => extract_path(doc, path),
            IndexProperty::Computed { f, .. } => f(doc),
        }
    }
}

/// Walk a dotted path (`"a.b.c"`) through nested documents.
pub fn extract_path(doc: &Document, path: &str) -> Option<Bson> {
    let mut current = Bson::Document(doc.clone());
    for segment in path.split('.') {
        current = match current {
            Bson::Document(d) => d.get(segment).cloned()?,
            _ => return None,
        };
    }
    Some(current)
}

#[derive(Clone)]
pub struct Index {
    pub properties: Vec<IndexProperty>,
    pub projection: Option<Vec<String>>,
    pub version: Option<i64>,
}

impl Index {
    pub fn new(properties: Vec<IndexProperty>) -> Self {
        Self {
            properties,
            projection: None,
            version: None,
        }
    }

    pub fn with_projection(mut self, projection: Vec<String>) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// The index's identity within its collection: its property keys, in
    /// declared order.
    pub fn keys(&self) -> Vec<String> {
        self.properties.iter().map(|p| p.key().to_string()).collect()
    }

    /// Property keys joined by `+`, used as the KVS name segment.
    pub fn name(&self) -> String {
        self.keys().join("+")
    }

    /// `(values, none_undefined)` for every property against `doc`.
    pub fn extract_values(&self, doc: Option<&Document>) -> Vec<Option<Bson>> {
        match doc {
            None => vec![None; self.properties.len()],
            Some(doc) => self.properties.iter().map(|p| p.extract(doc)).collect(),
        }
    }

    /// The projection payload for `doc`, or `None` if unset or every
    /// projected field is absent.
    pub fn extract_projection(&self, doc: Option<&Document>) -> Option<Document> {
        let paths = self.projection.as_ref()?;
        let doc = doc?;
        let mut out = Document::new();
        for path in paths {
            if let Some(value) = extract_path(doc, path) {
                if !matches!(value, Bson::Null) {
                    out.insert(path.clone(), value);
                }
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}
