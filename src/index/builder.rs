use super::KeyIndex;
use crate::{
    common::{
        self,
        builder_utils::ensure_hash_powers_or_panic,
        constants::{DEFAULT_HASH_POWER, DEFAULT_LOCK_POWER, MAX_HASH_POWER},
    },
    stats::{DefaultStatsRecorder, StatsRecorder},
    table::Inner,
    IndexEntry, IndexError,
};

use std::{marker::PhantomData, sync::Arc};

/// Builds a [`KeyIndex`][key-index] with various configuration knobs.
///
/// [key-index]: ./struct.KeyIndex.html
///
/// # Examples
///
/// ```rust
/// use cache_index::{DefaultStatsRecorder, KeyIndex};
/// use std::sync::Arc;
///
/// let index: KeyIndex<Vec<u8>> = KeyIndex::builder()
///     // Start with 2^10 buckets.
///     .hash_power(10)
///     // Move 16 buckets per migration iteration.
///     .bulk_move(16)
///     .stats_recorder(Arc::new(DefaultStatsRecorder::default()))
///     .build()
///     .unwrap();
///
/// assert_eq!(index.hash_power(), 10);
/// assert_eq!(index.stats().hash_power(), 10);
/// ```
///
pub struct KeyIndexBuilder<E> {
    hash_power: u8,
    lock_power: u8,
    max_hash_power: u8,
    bulk_move: Option<usize>,
    stats_recorder: Option<Arc<dyn StatsRecorder>>,
    index_type: PhantomData<E>,
}

impl<E> Default for KeyIndexBuilder<E> {
    fn default() -> Self {
        Self {
            hash_power: DEFAULT_HASH_POWER,
            lock_power: DEFAULT_LOCK_POWER,
            max_hash_power: MAX_HASH_POWER,
            bulk_move: None,
            stats_recorder: None,
            index_type: PhantomData,
        }
    }
}

impl<E: IndexEntry> KeyIndexBuilder<E> {
    /// Sets the hash power of the initial table, which will have `2^hash_power`
    /// buckets. Default: 16.
    pub fn hash_power(self, hash_power: u8) -> Self {
        Self { hash_power, ..self }
    }

    /// Sets the hash power of the lock stripe array. It is lowered to the initial
    /// hash power if larger. Default: 13.
    pub fn lock_power(self, lock_power: u8) -> Self {
        Self { lock_power, ..self }
    }

    /// Sets the hash power the table never grows beyond. Default: `MAX_HASH_POWER`.
    pub fn max_hash_power(self, max_hash_power: u8) -> Self {
        Self {
            max_hash_power,
            ..self
        }
    }

    /// Sets the number of buckets the migration worker moves per iteration. Zero
    /// is treated as one.
    ///
    /// When not set, the value of the `CACHE_INDEX_HASH_BULK_MOVE` environment
    /// variable is used, or one if it is unset or not a positive integer.
    pub fn bulk_move(self, bulk_move: usize) -> Self {
        Self {
            bulk_move: Some(bulk_move.max(1)),
            ..self
        }
    }

    /// Sets the recorder that receives table size changes. Default:
    /// `DefaultStatsRecorder`.
    pub fn stats_recorder(self, recorder: Arc<dyn StatsRecorder>) -> Self {
        Self {
            stats_recorder: Some(recorder),
            ..self
        }
    }

    /// Builds a `KeyIndex<E>`.
    ///
    /// Fails only if the initial table cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics if `hash_power` is zero, larger than `max_hash_power`, or if
    /// `max_hash_power` is larger than `MAX_HASH_POWER`.
    pub fn build(self) -> Result<KeyIndex<E>, IndexError> {
        ensure_hash_powers_or_panic(self.hash_power, self.max_hash_power);

        let bulk_move = self.bulk_move.unwrap_or_else(common::bulk_move_from_env);
        let stats: Arc<dyn StatsRecorder> = match self.stats_recorder {
            Some(recorder) => recorder,
            None => Arc::new(DefaultStatsRecorder::default()),
        };

        let inner = Inner::new(
            self.hash_power,
            self.lock_power,
            self.max_hash_power,
            bulk_move,
            stats,
        )?;
        log::debug!(
            "Created a key index with {} buckets, {} lock stripes and bulk move {}",
            1usize << self.hash_power,
            1usize << self.lock_power.min(self.hash_power),
            bulk_move
        );

        Ok(KeyIndex::from_inner(inner))
    }
}
