//! Per-record lock table.

use crate::id::RecordId;
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Striped mutexes keyed by record id.
///
/// Writes to the same record are mutually exclusive; writes to records in
/// different stripes proceed in parallel. Two ids may share a stripe, which
/// only costs some contention.
///
/// Locks are not reentrant: code holding a guard must not lock the same id
/// again.
#[derive(Debug)]
pub struct LockTable {
    stripes: Vec<Mutex<()>>,
}

impl LockTable {
    /// Creates a table with `stripes` mutexes (at least one).
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Blocks until the record's stripe is free.
    pub fn lock(&self, id: &RecordId) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(id)].lock()
    }

    /// Returns the number of stripes.
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false; a table has at least one stripe.
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    fn stripe_of(&self, id: &RecordId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn same_id_is_exclusive() {
        let table = Arc::new(LockTable::new(8));
        let id = RecordId::new();
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = table.lock(&id);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn different_stripes_do_not_block() {
        let table = LockTable::new(1024);
        let a = RecordId::from_bytes([1u8; 16]);
        let b = (0u8..=255)
            .map(|n| RecordId::from_bytes([n; 16]))
            .find(|b| table.stripe_of(b) != table.stripe_of(&a))
            .unwrap();

        let _ga = table.lock(&a);
        assert!(table.stripes[table.stripe_of(&b)].try_lock().is_some());
    }

    #[test]
    fn zero_stripes_is_clamped() {
        assert_eq!(LockTable::new(0).len(), 1);
    }
}
