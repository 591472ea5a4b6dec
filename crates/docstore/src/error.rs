use std::fmt;

use docstore_engine::EngineError;
use docstore_kv::KvError;

#[derive(Debug)]
pub enum StoreError {
    ConfigError(String),
    IndexNotFound(String),
    DocumentNotFound(String),
    DocumentExists(String),
    InvalidKey(String),
    InvalidDocument(String),
    ReAddNotSupported(String),
    CannotDowngrade { persisted: u32, current: u32 },
    TransactionMisuse(String),
    BackendError(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "config error: {msg}"),
            Self::IndexNotFound(msg) => write!(f, "index not found: {msg}"),
            Self::DocumentNotFound(msg) => write!(f, "document not found: {msg}"),
            Self::DocumentExists(msg) => write!(f, "document already exists: {msg}"),
            Self::InvalidKey(msg) => write!(f, "invalid key: {msg}"),
            Self::InvalidDocument(msg) => write!(f, "invalid document: {msg}"),
            Self::ReAddNotSupported(name) => {
                write!(f, "collection {name} was removed and cannot be re-added")
            }
            Self::CannotDowngrade { persisted, current } => write!(
                f,
                "persisted schema version {persisted} is newer than code version {current}"
            ),
            Self::TransactionMisuse(msg) => write!(f, "transaction misuse: {msg}"),
            Self::BackendError(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<EngineError> for StoreError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Kv(kv) => StoreError::BackendError(kv.to_string()),
            EngineError::InvalidKey(msg) => StoreError::InvalidKey(msg),
            EngineError::InvalidDocument(msg) => StoreError::InvalidDocument(msg),
            EngineError::IndexNotFound(msg) => StoreError::IndexNotFound(msg),
            EngineError::CollectionNotFound(name) => StoreError::ConfigError(format!(
                "collection not declared: {name}"
            )),
            EngineError::DocumentNotFound(msg) => StoreError::DocumentNotFound(msg),
            EngineError::DocumentExists(msg) => StoreError::DocumentExists(msg),
            EngineError::ReAddNotSupported(name) => StoreError::ReAddNotSupported(name),
            EngineError::CannotDowngrade { persisted, current } => {
                StoreError::CannotDowngrade { persisted, current }
            }
        }
    }
}

impl From<KvError> for StoreError {
    fn from(e: KvError) -> Self {
        StoreError::BackendError(e.to_string())
    }
}
