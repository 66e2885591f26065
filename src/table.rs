use crate::{
    bucket::{BucketArray, Chain},
    expansion::ExpansionCoordinator,
    locks::BucketLocks,
    stats::StatsRecorder,
    IndexEntry, IndexError,
};

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, RwLock};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[cfg(test)]
use std::sync::atomic::AtomicBool;

/// The bucket arrays of the index.
///
/// `previous` is `Some` if and only if an expansion is in progress, and then
/// `current` is exactly twice its length.
pub(crate) struct Tables<E> {
    pub(crate) current: BucketArray<E>,
    pub(crate) previous: Option<BucketArray<E>>,
}

impl<E> Tables<E> {
    /// Selects the authoritative bucket for `hash`.
    ///
    /// While expanding, a hash whose bucket in the previous table has not been
    /// reached by the migration cursor still lives in the previous table.
    /// Everything else lives in the current table.
    pub(crate) fn select(&self, hash: u32, cursor: usize) -> &Mutex<Chain<E>> {
        if let Some(previous) = &self.previous {
            let index = hash as usize & previous.mask();
            if index >= cursor {
                return previous.bucket(index);
            }
        }
        self.current.bucket(hash as usize & self.current.mask())
    }

    pub(crate) fn byte_size(&self) -> u64 {
        self.current.byte_size() + self.previous.as_ref().map_or(0, BucketArray::byte_size)
    }
}

pub(crate) struct Inner<E> {
    // Workers hold the read side for the duration of every operation. Taking the
    // write side pauses all of them.
    pub(crate) tables: RwLock<Tables<E>>,
    // The next bucket of the previous table to migrate. Only the migration worker
    // writes it, and only while holding the stripe of that bucket.
    pub(crate) cursor: CachePadded<AtomicUsize>,
    pub(crate) locks: BucketLocks,
    pub(crate) coordinator: ExpansionCoordinator,
    pub(crate) stats: Arc<dyn StatsRecorder>,
    pub(crate) bulk_move: usize,
    #[cfg(test)]
    pub(crate) fail_next_grow: AtomicBool,
    #[cfg(test)]
    pub(crate) allocated_under_write_lock: AtomicBool,
}

impl<E> Inner<E> {
    pub(crate) fn new(
        hash_power: u8,
        lock_power: u8,
        max_hash_power: u8,
        bulk_move: usize,
        stats: Arc<dyn StatsRecorder>,
    ) -> Result<Self, IndexError> {
        let current = BucketArray::try_with_hash_power(hash_power)?;
        stats.record_table_size(hash_power, current.byte_size());
        stats.record_expanding(false);

        Ok(Self {
            tables: RwLock::new(Tables {
                current,
                previous: None,
            }),
            cursor: CachePadded::new(AtomicUsize::new(0)),
            locks: BucketLocks::new(lock_power.min(hash_power)),
            coordinator: ExpansionCoordinator::new(max_hash_power),
            stats,
            bulk_move,
            #[cfg(test)]
            fail_next_grow: AtomicBool::new(false),
            #[cfg(test)]
            allocated_under_write_lock: AtomicBool::new(false),
        })
    }

    #[inline]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub(crate) fn is_expanding(&self) -> bool {
        self.tables.read().previous.is_some()
    }
}

// The `*_locked` methods must be called with the stripe of `hash` held.
impl<E: IndexEntry> Inner<E> {
    pub(crate) fn find_locked(&self, tables: &Tables<E>, key: &[u8], hash: u32) -> Option<Arc<E>> {
        tables.select(hash, self.cursor()).lock().find(key).cloned()
    }

    pub(crate) fn insert_locked(&self, tables: &Tables<E>, entry: Arc<E>, hash: u32) {
        {
            let mut chain = tables.select(hash, self.cursor()).lock();
            debug_assert!(
                chain.find(entry.key()).is_none(),
                "inserted a key that is already indexed"
            );
            chain.push(entry, hash);
        }

        let current = &tables.current;
        self.coordinator.entry_added(current.len(), current.hash_power());
    }

    pub(crate) fn delete_locked(
        &self,
        tables: &Tables<E>,
        key: &[u8],
        hash: u32,
    ) -> Result<Arc<E>, IndexError> {
        let removed = tables.select(hash, self.cursor()).lock().remove(key);
        match removed {
            Some(entry) => {
                self.coordinator.entry_removed();
                Ok(entry)
            }
            None => {
                log::debug!("Delete of an unindexed key (hash {hash:#010x})");
                Err(IndexError::KeyNotFound)
            }
        }
    }
}
