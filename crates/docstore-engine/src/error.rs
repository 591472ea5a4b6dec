use std::fmt;

use docstore_kv::KvError;

#[derive(Debug)]
pub enum EngineError {
    Kv(KvError),
    InvalidKey(String),
    InvalidDocument(String),
    IndexNotFound(String),
    CollectionNotFound(String),
    DocumentNotFound(String),
    DocumentExists(String),
    ReAddNotSupported(String),
    CannotDowngrade { persisted: u32, current: u32 },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kv(e) => write!(f, "kv error: {e}"),
            Self::InvalidKey(msg) => write!(f, "invalid key: {msg}"),
            Self::InvalidDocument(msg) => write!(f, "invalid document: {msg}"),
            Self::IndexNotFound(msg) => write!(f, "no index satisfies query: {msg}"),
            Self::CollectionNotFound(name) => write!(f, "collection not found: {name}"),
            Self::DocumentNotFound(msg) => write!(f, "document not found: {msg}"),
            Self::DocumentExists(msg) => write!(f, "document already exists: {msg}"),
            Self::ReAddNotSupported(name) => {
                write!(f, "collection {name} was removed and cannot be re-added")
            }
            Self::CannotDowngrade { persisted, current } => write!(
                f,
                "persisted schema version {persisted} is newer than code version {current}"
            ),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<KvError> for EngineError {
    fn from(e: KvError) -> Self {
        Self::Kv(e)
    }
}
