use crate::{
    expansion::ExpansionState,
    migrator::MigrationWorker,
    stats::IndexStats,
    table::{Inner, Tables},
    IndexEntry, IndexError,
};

use parking_lot::{Mutex, MutexGuard, RwLockReadGuard};
use std::{fmt, sync::Arc};

mod builder;

pub use builder::KeyIndexBuilder;

/// A concurrent index from cache keys to cache entries.
///
/// `KeyIndex` is a chained hash table whose bucket count is a power of two. When
/// the number of live entries exceeds one and a half times the bucket count, a
/// background migration worker doubles the table and moves the entries of the
/// old table into the new one a few buckets at a time. Lookups, insertions and
/// deletions keep working during the move: each operation picks the old or the
/// new table depending on whether its bucket has been migrated yet.
///
/// Hashes are supplied by the caller. The same 32-bit hash must be passed for a
/// key on every call.
///
/// # Examples
///
/// ```rust
/// use cache_index::KeyIndex;
/// use std::sync::Arc;
///
/// let index = KeyIndex::builder().hash_power(4).build().unwrap();
/// index.start_migration_worker().unwrap();
///
/// let entry = Arc::new(b"user:42".to_vec());
/// index.insert(Arc::clone(&entry), 0x2a);
/// assert!(index.find(b"user:42", 0x2a).is_some());
///
/// index.delete(b"user:42", 0x2a).unwrap();
/// assert!(index.find(b"user:42", 0x2a).is_none());
///
/// index.stop_migration_worker().unwrap();
/// ```
///
/// # Deadlocks
///
/// A [`BucketGuard`] holds the lock stripe of its hash and keeps the table from
/// growing. Do not call any other method of the same index on the thread that
/// holds a guard.
pub struct KeyIndex<E> {
    inner: Arc<Inner<E>>,
    worker: Mutex<Option<MigrationWorker>>,
}

impl<E> Drop for KeyIndex<E> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            if let Err(e) = worker.stop(&self.inner.coordinator) {
                log::error!("Failed to stop the migration worker: {e}");
            }
        }
    }
}

impl<E> fmt::Debug for KeyIndex<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyIndex")
            .field("len", &self.len())
            .field("hash_power", &self.hash_power())
            .field("expansion_state", &self.expansion_state())
            .finish()
    }
}

impl<E: IndexEntry> KeyIndex<E> {
    /// Creates an index with `2^hash_power` buckets and default settings.
    ///
    /// An error means the initial table could not be allocated; the caller has
    /// nothing to serve from.
    ///
    /// # Panics
    ///
    /// Panics if `hash_power` is zero or larger than `MAX_HASH_POWER`.
    pub fn new(hash_power: u8) -> Result<Self, IndexError> {
        KeyIndexBuilder::default().hash_power(hash_power).build()
    }
}

impl<E> KeyIndex<E> {
    pub fn builder() -> KeyIndexBuilder<E> {
        KeyIndexBuilder::default()
    }

    pub(crate) fn from_inner(inner: Inner<E>) -> Self {
        Self {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
        }
    }

    /// Acquires the lock stripe covering `hash` and returns a guard to run
    /// operations on that hash.
    ///
    /// Use this when several operations on one key must not interleave with other
    /// workers, e.g. a lookup followed by a delete.
    pub fn lock(&self, hash: u32) -> BucketGuard<'_, E> {
        let tables = self.inner.tables.read();
        let stripe = self.inner.locks.lock(hash);
        BucketGuard {
            inner: &self.inner,
            tables,
            _stripe: stripe,
            hash,
        }
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> u64 {
        self.inner.coordinator.live_entries()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the hash power of the current table.
    pub fn hash_power(&self) -> u8 {
        self.inner.tables.read().current.hash_power()
    }

    pub fn expansion_state(&self) -> ExpansionState {
        self.inner.coordinator.state()
    }

    /// Asks the migration worker to double the table regardless of the load
    /// factor. Returns `false` if an expansion is already requested or in
    /// progress.
    pub fn request_expansion(&self) -> bool {
        self.inner.coordinator.start()
    }

    /// Returns a snapshot of the table statistics.
    pub fn stats(&self) -> IndexStats {
        self.inner.stats.snapshot()
    }

    /// Returns the number of buckets the migration worker moves per iteration.
    pub fn bulk_move(&self) -> usize {
        self.inner.bulk_move
    }

    pub fn is_migration_worker_running(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl<E: IndexEntry> KeyIndex<E> {
    /// Returns the entry with the given key, if any.
    pub fn find(&self, key: &[u8], hash: u32) -> Option<Arc<E>> {
        self.lock(hash).find(key)
    }

    /// Adds an entry. The key must not be indexed already; inserting a duplicate
    /// key leaves two entries in one chain.
    pub fn insert(&self, entry: Arc<E>, hash: u32) {
        self.lock(hash).insert(entry)
    }

    /// Removes the entry with the given key and returns it.
    ///
    /// Returns `IndexError::KeyNotFound` if the key is not indexed, which happens
    /// when two workers race to delete the same key.
    pub fn delete(&self, key: &[u8], hash: u32) -> Result<Arc<E>, IndexError> {
        self.lock(hash).delete(key)
    }
}

impl<E> KeyIndex<E>
where
    E: IndexEntry + Send + Sync + 'static,
{
    /// Spawns the background thread that grows the table and migrates entries.
    pub fn start_migration_worker(&self) -> Result<(), IndexError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(IndexError::WorkerAlreadyRunning);
        }
        *worker = Some(MigrationWorker::start(&self.inner)?);
        Ok(())
    }

    /// Stops the migration worker and blocks until its thread has exited. Does
    /// nothing if no worker is running.
    ///
    /// An expansion in progress is left as is; the index stays correct and a new
    /// worker resumes the migration where this one stopped.
    pub fn stop_migration_worker(&self) -> Result<(), IndexError> {
        match self.worker.lock().take() {
            Some(worker) => worker.stop(&self.inner.coordinator),
            None => Ok(()),
        }
    }
}

/// Exclusive access to the bucket of one hash. Returned by [`KeyIndex::lock`].
///
/// While a guard is alive, the migration worker cannot move the bucket of its
/// hash and the table cannot be swapped.
pub struct BucketGuard<'a, E> {
    inner: &'a Inner<E>,
    tables: RwLockReadGuard<'a, Tables<E>>,
    _stripe: MutexGuard<'a, ()>,
    hash: u32,
}

impl<'a, E> BucketGuard<'a, E> {
    pub fn hash(&self) -> u32 {
        self.hash
    }
}

impl<'a, E: IndexEntry> BucketGuard<'a, E> {
    pub fn find(&self, key: &[u8]) -> Option<Arc<E>> {
        self.inner.find_locked(&self.tables, key, self.hash)
    }

    pub fn insert(&self, entry: Arc<E>) {
        self.inner.insert_locked(&self.tables, entry, self.hash)
    }

    pub fn delete(&self, key: &[u8]) -> Result<Arc<E>, IndexError> {
        self.inner.delete_locked(&self.tables, key, self.hash)
    }
}

#[cfg(test)]
impl<E> KeyIndex<E> {
    pub(crate) fn inner(&self) -> &Inner<E> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::KeyIndex;
    use crate::{
        common::available_parallelism, migrator::MigrationStep, ExpansionState, IndexEntry,
        IndexError,
    };

    use std::{
        collections::HashSet,
        sync::{atomic::AtomicBool, Arc, Barrier},
        thread,
        time::Duration,
    };

    #[derive(Debug, PartialEq, Eq)]
    struct Item {
        key: Vec<u8>,
        value: u32,
    }

    impl IndexEntry for Item {
        fn key(&self) -> &[u8] {
            &self.key
        }
    }

    fn item(i: u32) -> Arc<Item> {
        Arc::new(Item {
            key: format!("key-{i}").into_bytes(),
            value: i,
        })
    }

    fn key(i: u32) -> Vec<u8> {
        format!("key-{i}").into_bytes()
    }

    // Spreads consecutive integers over every bucket of any table size.
    fn hash(i: u32) -> u32 {
        i.wrapping_mul(0x9e37_79b9)
    }

    fn index(hash_power: u8) -> KeyIndex<Item> {
        KeyIndex::builder()
            .hash_power(hash_power)
            .bulk_move(1)
            .build()
            .unwrap()
    }

    fn drain_all(index: &KeyIndex<Item>) {
        let shutdown = AtomicBool::new(false);
        while index.inner().migrate_next_bucket(&shutdown) == MigrationStep::Moved {}
    }

    fn count_chain_entries(index: &KeyIndex<Item>, key: &[u8]) -> usize {
        let tables = index.inner().tables.read();
        let mut count = 0;
        for array in std::iter::once(&tables.current).chain(tables.previous.as_ref()) {
            for i in 0..array.len() {
                count += array
                    .bucket(i)
                    .lock()
                    .keys()
                    .iter()
                    .filter(|k| k.as_slice() == key)
                    .count();
            }
        }
        count
    }

    #[test]
    fn find_insert_delete() {
        let index = index(4);
        assert!(index.is_empty());
        assert!(index.find(&key(1), hash(1)).is_none());

        for i in 0..10 {
            index.insert(item(i), hash(i));
        }
        assert_eq!(index.len(), 10);

        for i in 0..10 {
            assert_eq!(index.find(&key(i), hash(i)).map(|e| e.value), Some(i));
        }
        assert!(index.find(&key(10), hash(10)).is_none());

        let removed = index.delete(&key(3), hash(3)).unwrap();
        assert_eq!(removed.value, 3);
        assert!(index.find(&key(3), hash(3)).is_none());
        assert_eq!(index.len(), 9);
    }

    #[test]
    fn keys_colliding_on_a_bucket_are_compared_exactly() {
        let index = index(2);
        // Same hash, different lengths and contents.
        for k in ["a", "ab", "abc", "abd"] {
            index.insert(
                Arc::new(Item {
                    key: k.as_bytes().to_vec(),
                    value: k.len() as u32,
                }),
                7,
            );
        }
        assert_eq!(index.find(b"ab", 7).unwrap().key, b"ab");
        assert_eq!(index.find(b"abd", 7).unwrap().key, b"abd");
        assert!(index.find(b"abe", 7).is_none());
        assert!(index.find(b"", 7).is_none());

        index.delete(b"abc", 7).unwrap();
        assert!(index.find(b"abd", 7).is_some());
        assert!(index.find(b"abc", 7).is_none());
    }

    #[test]
    fn delete_after_insert_restores_the_count() {
        let index = index(4);
        index.insert(item(1), hash(1));
        let before = index.len();

        index.insert(item(2), hash(2));
        index.delete(&key(2), hash(2)).unwrap();

        assert!(index.find(&key(2), hash(2)).is_none());
        assert_eq!(index.len(), before);
    }

    #[test]
    fn delete_of_unknown_key_is_reported() {
        let index = index(4);
        index.insert(item(1), hash(1));

        assert!(matches!(
            index.delete(&key(2), hash(2)),
            Err(IndexError::KeyNotFound)
        ));
        index.delete(&key(1), hash(1)).unwrap();
        assert!(matches!(
            index.delete(&key(1), hash(1)),
            Err(IndexError::KeyNotFound)
        ));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn seventh_insert_into_four_buckets_requests_expansion() {
        let index = index(2);
        for i in 0..6 {
            index.insert(item(i), hash(i));
            assert_eq!(index.expansion_state(), ExpansionState::Idle);
        }
        index.insert(item(6), hash(6));
        assert_eq!(index.len(), 7);
        assert_eq!(index.expansion_state(), ExpansionState::Requested);
    }

    #[test]
    fn bucket_selection_follows_the_cursor() {
        let index = index(2);
        // Previous bucket 3 and new bucket 7.
        let h = 0b111;
        index.insert(
            Arc::new(Item {
                key: b"seven".to_vec(),
                value: 7,
            }),
            h,
        );
        assert!(index.inner().try_grow());

        let shutdown = AtomicBool::new(false);
        assert_eq!(
            index.inner().migrate_next_bucket(&shutdown),
            MigrationStep::Moved
        );
        assert_eq!(index.inner().cursor(), 1);
        {
            let tables = index.inner().tables.read();
            let previous = tables.previous.as_ref().unwrap();
            assert!(std::ptr::eq(tables.select(h, 1), previous.bucket(3)));
            assert!(previous.bucket(3).lock().find(b"seven").is_some());
        }
        assert!(index.find(b"seven", h).is_some());

        drain_all(&index);
        assert_eq!(index.inner().cursor(), 4);
        {
            let tables = index.inner().tables.read();
            assert!(tables.previous.is_none());
            assert!(std::ptr::eq(tables.select(h, 4), tables.current.bucket(7)));
            assert!(tables.current.bucket(7).lock().find(b"seven").is_some());
        }
        assert!(index.find(b"seven", h).is_some());
    }

    #[test]
    fn lookups_are_stable_at_every_migration_step() {
        let index = index(3);
        let n = 40;
        for i in 0..n {
            index.insert(item(i), hash(i));
        }
        // Delete a few so the logical key set has holes.
        for i in (0..n).step_by(7) {
            index.delete(&key(i), hash(i)).unwrap();
        }
        let expected = (0..n).filter(|i| i % 7 != 0).collect::<HashSet<_>>();

        let check = |index: &KeyIndex<Item>| {
            for i in 0..n + 10 {
                let found = index.find(&key(i), hash(i)).map(|e| e.value);
                assert_eq!(found.is_some(), expected.contains(&i), "key {i}");
            }
        };

        assert!(index.inner().try_grow());
        let shutdown = AtomicBool::new(false);
        let mut last_cursor = 0;
        loop {
            check(&index);
            let step = index.inner().migrate_next_bucket(&shutdown);
            if step == MigrationStep::Finished {
                break;
            }
            assert_eq!(step, MigrationStep::Moved);
            let cursor = index.inner().cursor();
            assert_eq!(cursor, last_cursor + 1);
            assert!(cursor < 8);
            last_cursor = cursor;
        }
        check(&index);

        for i in &expected {
            assert_eq!(count_chain_entries(&index, &key(*i)), 1);
        }
        assert_eq!(index.len(), expected.len() as u64);
    }

    #[test]
    fn operations_during_drain_pick_the_right_table() {
        let index = index(3);
        for i in 0..10 {
            index.insert(item(i), hash(i));
        }
        assert!(index.inner().try_grow());

        let shutdown = AtomicBool::new(false);
        index.inner().migrate_next_bucket(&shutdown);
        index.inner().migrate_next_bucket(&shutdown);
        index.inner().migrate_next_bucket(&shutdown);

        for i in 10..30 {
            index.insert(item(i), hash(i));
        }
        for i in (0..30).step_by(3) {
            index.delete(&key(i), hash(i)).unwrap();
        }

        drain_all(&index);
        assert!(!index.inner().is_expanding());

        for i in 0..30 {
            let found = index.find(&key(i), hash(i));
            assert_eq!(found.is_some(), i % 3 != 0, "key {i}");
            if i % 3 != 0 {
                assert_eq!(count_chain_entries(&index, &key(i)), 1);
            }
        }
        assert_eq!(index.len(), 20);
    }

    #[test]
    fn grow_doubles_the_table() {
        let index = index(3);
        let before = index.hash_power();
        assert!(index.inner().try_grow());
        {
            let tables = index.inner().tables.read();
            let previous = tables.previous.as_ref().unwrap();
            assert_eq!(tables.current.len(), previous.len() * 2);
            assert_eq!(tables.current.hash_power(), before + 1);
        }
        assert_eq!(index.inner().cursor(), 0);
        assert_eq!(index.expansion_state(), ExpansionState::Expanding);

        let stats = index.stats();
        assert_eq!(stats.hash_power(), before + 1);
        assert!(stats.is_expanding());

        drain_all(&index);
        let stats = index.stats();
        assert!(!stats.is_expanding());
        assert_eq!(stats.hash_bytes(), index.inner().tables.read().current.byte_size());
    }

    #[test]
    fn allocation_failure_keeps_the_old_table() {
        let index = index(2);
        for i in 0..7 {
            index.insert(item(i), hash(i));
        }
        assert_eq!(index.expansion_state(), ExpansionState::Requested);

        index
            .inner()
            .fail_next_grow
            .store(true, std::sync::atomic::Ordering::Release);
        assert!(!index.inner().try_grow());

        assert_eq!(index.hash_power(), 2);
        assert!(!index.inner().is_expanding());
        assert_eq!(index.expansion_state(), ExpansionState::Idle);
        assert_eq!(index.stats().expansion_failure_count(), 1);

        for i in 0..7 {
            assert!(index.find(&key(i), hash(i)).is_some());
        }
        index.delete(&key(0), hash(0)).unwrap();

        // Over the threshold again: a new request goes through.
        index.insert(item(0), hash(0));
        assert_eq!(index.expansion_state(), ExpansionState::Requested);
        assert!(index.inner().try_grow());
        drain_all(&index);
        assert_eq!(index.hash_power(), 3);
        for i in 0..7 {
            assert!(index.find(&key(i), hash(i)).is_some());
        }
    }

    #[test]
    fn grow_at_max_hash_power_is_refused() {
        let index = KeyIndex::<Item>::builder()
            .hash_power(2)
            .max_hash_power(2)
            .build()
            .unwrap();
        for i in 0..20 {
            index.insert(item(i), hash(i));
        }
        assert_eq!(index.expansion_state(), ExpansionState::Idle);

        assert!(index.request_expansion());
        assert!(matches!(
            index.inner().grow(),
            Err(IndexError::HashPowerLimit { hash_power: 2 })
        ));
    }

    #[test]
    fn bucket_guard_runs_several_operations() {
        let index = index(4);
        index.insert(item(5), hash(5));

        let guard = index.lock(hash(5));
        assert_eq!(guard.hash(), hash(5));
        let found = guard.find(&key(5)).unwrap();
        let removed = guard.delete(&found.key).unwrap();
        assert_eq!(removed, found);
        guard.insert(item(5));
        drop(guard);

        assert!(index.find(&key(5), hash(5)).is_some());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn concurrent_inserts_during_drain() {
        let index = Arc::new(index(4));
        for i in 0..24 {
            index.insert(item(i), hash(i));
        }
        assert!(index.inner().try_grow());

        let num_threads = available_parallelism().clamp(2, 8) as u32;
        let per_thread = 500;
        let barrier = Arc::new(Barrier::new(num_threads as usize + 1));

        let workers = (0..num_threads)
            .map(|t| {
                let index = Arc::clone(&index);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let base = 1_000 + t * per_thread;
                    for i in base..base + per_thread {
                        index.insert(item(i), hash(i));
                        assert!(index.find(&key(i), hash(i)).is_some());
                    }
                })
            })
            .collect::<Vec<_>>();

        barrier.wait();
        let shutdown = AtomicBool::new(false);
        while index.inner().migrate_next_bucket(&shutdown) == MigrationStep::Moved {
            thread::sleep(Duration::from_micros(10));
        }
        for w in workers {
            w.join().unwrap();
        }

        for i in 0..24 {
            assert!(index.find(&key(i), hash(i)).is_some());
        }
        for t in 0..num_threads {
            let base = 1_000 + t * per_thread;
            for i in base..base + per_thread {
                assert!(index.find(&key(i), hash(i)).is_some(), "key {i}");
            }
        }
        assert_eq!(index.len(), 24 + (num_threads * per_thread) as u64);
    }

    #[test]
    fn worker_lifecycle() {
        let index = index(2);
        assert!(!index.is_migration_worker_running());
        index.start_migration_worker().unwrap();
        assert!(index.is_migration_worker_running());
        assert!(matches!(
            index.start_migration_worker(),
            Err(IndexError::WorkerAlreadyRunning)
        ));

        index.stop_migration_worker().unwrap();
        assert!(!index.is_migration_worker_running());
        // Stopping twice is fine.
        index.stop_migration_worker().unwrap();

        index.start_migration_worker().unwrap();
        drop(index);
    }

    #[test]
    fn restarted_worker_resumes_a_partial_drain() {
        let index = index(3);
        // 20 entries fit 16 buckets, so one expansion is enough.
        for i in 0..20 {
            index.insert(item(i), hash(i));
        }
        assert!(index.inner().try_grow());
        let shutdown = AtomicBool::new(false);
        index.inner().migrate_next_bucket(&shutdown);
        index.inner().migrate_next_bucket(&shutdown);

        index.start_migration_worker().unwrap();
        let mut waited = 0;
        while index.inner().is_expanding() {
            assert!(waited < 5_000, "the worker did not resume the drain");
            thread::sleep(Duration::from_millis(1));
            waited += 1;
        }
        index.stop_migration_worker().unwrap();

        assert_eq!(index.hash_power(), 4);
        assert_eq!(index.expansion_state(), ExpansionState::Idle);
        for i in 0..20 {
            assert!(index.find(&key(i), hash(i)).is_some());
        }
    }
}
