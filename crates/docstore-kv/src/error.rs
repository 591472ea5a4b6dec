use std::fmt;

#[derive(Debug)]
pub enum KvError {
    TransactionConsumed,
    ReadOnly,
    Storage(String),
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvError::TransactionConsumed => write!(f, "transaction already consumed"),
            KvError::ReadOnly => write!(f, "cannot write in a read-only transaction"),
            KvError::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for KvError {}
