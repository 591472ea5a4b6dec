//! The external KVS contract the document store is built on top of, plus a
//! single in-memory reference implementation.
//!
//! This crate is deliberately thin: `docstore-engine` is the graded layer,
//! this one is the seam it's built against. Keys and values here are plain
//! byte strings; `docstore-engine` owns turning documents and index entries
//! into ordered tuples of bytes.

mod error;
mod memory;

pub use error::KvError;
pub use memory::MemoryKv;

/// A half-open (or fully bounded) byte-range scan, matching the external
/// KVS contract's `find`/`count`/`findAndDelete` options.
///
/// `prefix` narrows the scan to keys starting with those bytes; `start`/
/// `start_after` and `end`/`end_before` are inclusive/exclusive endpoints
/// within that prefix. `reverse` walks from the high end down.
#[derive(Debug, Clone, Default)]
pub struct ScanRange {
    pub prefix: Option<Vec<u8>>,
    pub start: Option<Vec<u8>>,
    pub start_after: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
    pub end_before: Option<Vec<u8>>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl ScanRange {
    pub fn prefix(prefix: Vec<u8>) -> Self {
        Self {
            prefix: Some(prefix),
            ..Default::default()
        }
    }

    /// Lower bound as `(bytes, inclusive)`, combining `prefix` and `start`/`start_after`.
    fn lower(&self) -> (Vec<u8>, bool) {
        if let Some(b) = &self.start {
            return (b.clone(), true);
        }
        if let Some(b) = &self.start_after {
            return (b.clone(), false);
        }
        (self.prefix.clone().unwrap_or_default(), true)
    }

    /// Upper bound as `(bytes, inclusive)`. When only a prefix is given, the
    /// upper bound is the prefix with its last byte incremented (the
    /// standard prefix-scan trick: there is no valid encoding of "one past
    /// this prefix" other than bumping the final byte).
    fn upper(&self) -> Option<(Vec<u8>, bool)> {
        if let Some(b) = &self.end {
            return Some((b.clone(), true));
        }
        if let Some(b) = &self.end_before {
            return Some((b.clone(), false));
        }
        self.prefix.as_ref().map(|p| {
            let mut bumped = p.clone();
            bump(&mut bumped);
            (bumped, false)
        })
    }
}

/// Increment a byte string as if it were a big-endian integer, growing it
/// by a trailing 0xff byte on overflow (an all-0xff prefix has no successor
/// within the same length, so we extend it).
fn bump(bytes: &mut Vec<u8>) {
    for b in bytes.iter_mut().rev() {
        if *b != 0xff {
            *b += 1;
            return;
        }
        *b = 0x00;
    }
    bytes.push(0xff);
}

/// A transactional handle over the keyspace. Lifetimes of borrowed results
/// are tied to the transaction so a backend can serve reads straight out of
/// its snapshot without copying.
pub trait KvTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Ordered vector read, preserving input order; missing keys are `None`.
    fn get_many(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, KvError> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    fn put_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), KvError> {
        for (k, v) in entries {
            self.put(k, v)?;
        }
        Ok(())
    }

    /// Returns whether a value was actually removed.
    fn delete(&self, key: &[u8]) -> Result<bool, KvError>;

    fn delete_batch(&self, keys: &[Vec<u8>]) -> Result<(), KvError> {
        for k in keys {
            self.delete(k)?;
        }
        Ok(())
    }

    /// Ordered scan over `range`, honoring `reverse` and `limit`.
    fn scan(&self, range: &ScanRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;

    fn count(&self, range: &ScanRange) -> Result<u64, KvError>;

    /// Delete every key in `range`; returns the number of keys removed.
    fn delete_range(&self, range: &ScanRange) -> Result<u64, KvError>;

    fn commit(self) -> Result<(), KvError>
    where
        Self: Sized;

    fn rollback(self) -> Result<(), KvError>
    where
        Self: Sized;
}

/// The transactional, ordered key-value store the document store is layered
/// on. `Txn<'a>` is a snapshot-isolated handle scoped to the store's
/// lifetime, opened read-only or read-write.
pub trait Kv: Send + Sync {
    type Txn<'a>: KvTxn
    where
        Self: 'a;

    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, KvError>;

    /// Release any resources held by the backend. A no-op for the in-memory
    /// backend; a real seam for an on-disk one.
    fn close(&self) -> Result<(), KvError> {
        Ok(())
    }
}

/// Sharing a backend across multiple facades (e.g. reopening a store under
/// a different declared schema against the same data) just means wrapping
/// it in an `Arc`.
impl<T: Kv> Kv for std::sync::Arc<T> {
    type Txn<'a>
        = T::Txn<'a>
    where
        Self: 'a;

    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, KvError> {
        (**self).begin(read_only)
    }

    fn close(&self) -> Result<(), KvError> {
        (**self).close()
    }
}
