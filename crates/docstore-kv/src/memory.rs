use std::cell::RefCell;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use imbl::OrdMap;

use crate::error::KvError;
use crate::{Kv, KvTxn, ScanRange};

type Tree = OrdMap<Vec<u8>, Vec<u8>>;

/// In-memory reference KVS. One writer at a time (`write_lock`), readers see
/// a lock-free snapshot via `ArcSwap`.
pub struct MemoryKv {
    data: ArcSwap<Tree>,
    write_lock: Mutex<()>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self {
            data: ArcSwap::new(Arc::new(Tree::new())),
            write_lock: Mutex::new(()),
        }
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire_write_lock(&self) -> Result<MutexGuard<'_, ()>, KvError> {
        self.write_lock
            .lock()
            .map_err(|e| KvError::Storage(format!("write lock poisoned: {e}")))
    }

    fn commit(&self, tree: Tree) {
        self.data.store(Arc::new(tree));
    }
}

impl Kv for MemoryKv {
    type Txn<'a> = MemoryTxn<'a>;

    fn begin(&self, read_only: bool) -> Result<Self::Txn<'_>, KvError> {
        if read_only {
            Ok(MemoryTxn::new_read_only(self))
        } else {
            let guard = self.acquire_write_lock()?;
            Ok(MemoryTxn::new_writable(self, guard))
        }
    }
}

pub struct MemoryTxn<'a> {
    store: &'a MemoryKv,
    /// Snapshot taken at `begin`; mutated in place for a writer, read
    /// straight through for a reader.
    snapshot: RefCell<Option<Tree>>,
    dirty: RefCell<bool>,
    read_only: bool,
    _write_guard: Option<MutexGuard<'a, ()>>,
}

impl<'a> MemoryTxn<'a> {
    fn new_read_only(store: &'a MemoryKv) -> Self {
        Self {
            store,
            snapshot: RefCell::new(Some((**store.data.load()).clone())),
            dirty: RefCell::new(false),
            read_only: true,
            _write_guard: None,
        }
    }

    fn new_writable(store: &'a MemoryKv, guard: MutexGuard<'a, ()>) -> Self {
        Self {
            store,
            snapshot: RefCell::new(Some((**store.data.load()).clone())),
            dirty: RefCell::new(false),
            read_only: false,
            _write_guard: Some(guard),
        }
    }

    fn check_writable(&self) -> Result<(), KvError> {
        if self.read_only {
            return Err(KvError::ReadOnly);
        }
        Ok(())
    }

    fn range_bounds(range: &ScanRange) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let (lo, lo_inclusive) = range.lower();
        let lower = if lo_inclusive {
            Bound::Included(lo)
        } else {
            Bound::Excluded(lo)
        };
        let upper = match range.upper() {
            Some((hi, true)) => Bound::Included(hi),
            Some((hi, false)) => Bound::Excluded(hi),
            None => Bound::Unbounded,
        };
        (lower, upper)
    }
}

impl<'a> KvTxn for MemoryTxn<'a> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let snap = self.snapshot.borrow();
        let tree = snap.as_ref().ok_or(KvError::TransactionConsumed)?;
        Ok(tree.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.check_writable()?;
        *self.dirty.borrow_mut() = true;
        let mut snap = self.snapshot.borrow_mut();
        let tree = snap.as_mut().ok_or(KvError::TransactionConsumed)?;
        tree.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool, KvError> {
        self.check_writable()?;
        *self.dirty.borrow_mut() = true;
        let mut snap = self.snapshot.borrow_mut();
        let tree = snap.as_mut().ok_or(KvError::TransactionConsumed)?;
        Ok(tree.remove(key).is_some())
    }

    fn scan(&self, range: &ScanRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        let snap = self.snapshot.borrow();
        let tree = snap.as_ref().ok_or(KvError::TransactionConsumed)?;
        let (lower, upper) = Self::range_bounds(range);
        let iter = tree.range((lower, upper));
        let mut out: Vec<(Vec<u8>, Vec<u8>)> = if range.reverse {
            if let Some(limit) = range.limit {
                iter.rev().take(limit).map(|(k, v)| (k.clone(), v.clone())).collect()
            } else {
                iter.rev().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
        } else if let Some(limit) = range.limit {
            iter.take(limit).map(|(k, v)| (k.clone(), v.clone())).collect()
        } else {
            iter.map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        out.shrink_to_fit();
        Ok(out)
    }

    fn count(&self, range: &ScanRange) -> Result<u64, KvError> {
        let snap = self.snapshot.borrow();
        let tree = snap.as_ref().ok_or(KvError::TransactionConsumed)?;
        let (lower, upper) = Self::range_bounds(range);
        Ok(tree.range((lower, upper)).count() as u64)
    }

    fn delete_range(&self, range: &ScanRange) -> Result<u64, KvError> {
        self.check_writable()?;
        let keys: Vec<Vec<u8>> = {
            let snap = self.snapshot.borrow();
            let tree = snap.as_ref().ok_or(KvError::TransactionConsumed)?;
            let (lower, upper) = Self::range_bounds(range);
            tree.range((lower, upper)).map(|(k, _)| k.clone()).collect()
        };
        *self.dirty.borrow_mut() = true;
        let mut snap = self.snapshot.borrow_mut();
        let tree = snap.as_mut().ok_or(KvError::TransactionConsumed)?;
        for k in &keys {
            tree.remove(k);
        }
        Ok(keys.len() as u64)
    }

    fn commit(self) -> Result<(), KvError> {
        if self.read_only {
            return Ok(());
        }
        let tree = self.snapshot.into_inner().ok_or(KvError::TransactionConsumed)?;
        if *self.dirty.borrow() {
            self.store.commit(tree);
        }
        Ok(())
    }

    fn rollback(self) -> Result<(), KvError> {
        if self.snapshot.into_inner().is_none() {
            return Err(KvError::TransactionConsumed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let kv = MemoryKv::new();
        let txn = kv.begin(false).unwrap();
        txn.put(b"a", b"1").unwrap();
        assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
        txn.commit().unwrap();

        let txn = kv.begin(true).unwrap();
        assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_discards_writes() {
        let kv = MemoryKv::new();
        let txn = kv.begin(false).unwrap();
        txn.put(b"a", b"1").unwrap();
        txn.rollback().unwrap();

        let txn = kv.begin(true).unwrap();
        assert_eq!(txn.get(b"a").unwrap(), None);
    }

    #[test]
    fn prefix_scan_respects_reverse_and_limit() {
        let kv = MemoryKv::new();
        let txn = kv.begin(false).unwrap();
        for k in ["a1", "a2", "a3", "b1"] {
            txn.put(k.as_bytes(), b"v").unwrap();
        }
        txn.commit().unwrap();

        let txn = kv.begin(true).unwrap();
        let range = ScanRange::prefix(b"a".to_vec());
        let keys: Vec<_> = txn
            .scan(&range)
            .unwrap()
            .into_iter()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect();
        assert_eq!(keys, vec!["a1", "a2", "a3"]);

        let mut rev = range.clone();
        rev.reverse = true;
        rev.limit = Some(2);
        let keys: Vec<_> = txn
            .scan(&rev)
            .unwrap()
            .into_iter()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect();
        assert_eq!(keys, vec!["a3", "a2"]);
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let kv = MemoryKv::new();
        let txn = kv.begin(true).unwrap();
        assert!(matches!(txn.put(b"a", b"1"), Err(KvError::ReadOnly)));
    }
}
