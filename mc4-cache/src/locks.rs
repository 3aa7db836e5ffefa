//! Per-coordinate locks for callers that need atomic read-modify-write on
//! one block or one node's metadata.

use mc4_map::MapPos;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub type SharedGuard = ArcRwLockReadGuard<RawRwLock, ()>;
pub type UniqueGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

const MIN_PURGE_AT: usize = 64;

struct Table {
    entries: HashMap<MapPos, Weak<RwLock<()>>>,
    purge_at: usize,
}

/// Entries are created on demand and dropped once no guard holds them.
pub struct BlockLocks {
    table: Mutex<Table>,
}

impl Default for BlockLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockLocks {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                entries: HashMap::new(),
                purge_at: MIN_PURGE_AT,
            }),
        }
    }

    fn entry(&self, pos: MapPos) -> Arc<RwLock<()>> {
        let mut table = self.table.lock();
        if let Some(lock) = table.entries.get(&pos).and_then(Weak::upgrade) {
            return lock;
        }
        if table.entries.len() >= table.purge_at {
            table.entries.retain(|_, weak| weak.strong_count() > 0);
            table.purge_at = (table.entries.len() * 2).max(MIN_PURGE_AT);
        }
        let lock = Arc::new(RwLock::new(()));
        table.entries.insert(pos, Arc::downgrade(&lock));
        lock
    }

    /// Blocks until no unique guard is held for `pos`.
    pub fn lock_shared(&self, pos: MapPos) -> SharedGuard {
        self.entry(pos).read_arc()
    }

    /// Blocks until no other guard is held for `pos`.
    pub fn lock_unique(&self, pos: MapPos) -> UniqueGuard {
        self.entry(pos).write_arc()
    }

    pub fn try_lock_unique(&self, pos: MapPos) -> Option<UniqueGuard> {
        self.entry(pos).try_write_arc()
    }

    /// Number of table entries, including ones not yet purged.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
