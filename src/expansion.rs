use crate::{
    bucket::BucketArray,
    common::constants::{LOAD_FACTOR_DENOMINATOR, LOAD_FACTOR_NUMERATOR},
    table::Inner,
    IndexError,
};

use parking_lot::{Condvar, Mutex};
use std::{
    mem,
    sync::atomic::{AtomicBool, Ordering},
};

/// The expansion state of a key index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpansionState {
    /// No expansion is requested or in progress.
    Idle,
    /// The table needs to grow and the migration worker has been signaled.
    Requested,
    /// The table has grown and the previous table is being drained.
    Expanding,
}

struct Counters {
    live_entries: u64,
    state: ExpansionState,
}

/// Tracks the live entry count and decides when the table should grow.
///
/// The count and the state share one lock so that the threshold check and the
/// request are a single step, and the migration worker waits on that lock's
/// condition variable while idle.
pub(crate) struct ExpansionCoordinator {
    counters: Mutex<Counters>,
    wakeup: Condvar,
    max_hash_power: u8,
}

impl ExpansionCoordinator {
    pub(crate) fn new(max_hash_power: u8) -> Self {
        Self {
            counters: Mutex::new(Counters {
                live_entries: 0,
                state: ExpansionState::Idle,
            }),
            wakeup: Condvar::new(),
            max_hash_power,
        }
    }

    pub(crate) fn max_hash_power(&self) -> u8 {
        self.max_hash_power
    }

    pub(crate) fn live_entries(&self) -> u64 {
        self.counters.lock().live_entries
    }

    pub(crate) fn state(&self) -> ExpansionState {
        self.counters.lock().state
    }

    pub(crate) fn entry_added(&self, table_len: usize, hash_power: u8) {
        let mut counters = self.counters.lock();
        counters.live_entries += 1;
        if counters.state == ExpansionState::Idle
            && self.is_over_threshold(counters.live_entries, table_len, hash_power)
        {
            self.start_locked(&mut counters);
        }
    }

    pub(crate) fn entry_removed(&self) {
        let mut counters = self.counters.lock();
        debug_assert!(counters.live_entries > 0);
        counters.live_entries = counters.live_entries.saturating_sub(1);
    }

    /// Requests an expansion and wakes the migration worker. Does nothing if one
    /// is already requested or in progress.
    pub(crate) fn start(&self) -> bool {
        self.start_locked(&mut self.counters.lock())
    }

    fn start_locked(&self, counters: &mut Counters) -> bool {
        if counters.state != ExpansionState::Idle {
            return false;
        }
        counters.state = ExpansionState::Requested;
        self.wakeup.notify_one();
        true
    }

    fn is_over_threshold(&self, live_entries: u64, table_len: usize, hash_power: u8) -> bool {
        hash_power < self.max_hash_power
            && live_entries.saturating_mul(LOAD_FACTOR_DENOMINATOR)
                > (table_len as u64).saturating_mul(LOAD_FACTOR_NUMERATOR)
    }

    /// Blocks until an expansion is requested or `shutdown` is set. Returns
    /// `false` on shutdown.
    pub(crate) fn wait_for_request(&self, shutdown: &AtomicBool) -> bool {
        let mut counters = self.counters.lock();
        loop {
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            if counters.state == ExpansionState::Requested {
                return true;
            }
            self.wakeup.wait(&mut counters);
        }
    }

    /// Wakes a waiting migration worker so it observes its shutdown flag.
    pub(crate) fn notify_shutdown(&self) {
        // Taking the lock orders the flag store before the waiter's next check.
        let _counters = self.counters.lock();
        self.wakeup.notify_all();
    }

    fn expansion_started(&self) {
        self.counters.lock().state = ExpansionState::Expanding;
    }

    fn expansion_aborted(&self) {
        self.counters.lock().state = ExpansionState::Idle;
    }

    /// Returns `true` if the entries added during the drain already call for the
    /// next expansion.
    fn expansion_finished(&self, table_len: usize, hash_power: u8) -> bool {
        let mut counters = self.counters.lock();
        counters.state = ExpansionState::Idle;
        if self.is_over_threshold(counters.live_entries, table_len, hash_power) {
            self.start_locked(&mut counters)
        } else {
            false
        }
    }
}

impl<E> Inner<E> {
    /// Replaces the current table with one twice its size and keeps the old one
    /// as the previous table.
    ///
    /// The new table is allocated before the write side of the table lock is
    /// taken. Workers are only paused for the swap itself. Only the migration
    /// worker changes the table size, so the size read here still holds when the
    /// write lock is acquired.
    pub(crate) fn grow(&self) -> Result<(), IndexError> {
        let hash_power = {
            let tables = self.tables.read();
            debug_assert!(tables.previous.is_none());
            tables.current.hash_power()
        };
        if hash_power >= self.coordinator.max_hash_power() {
            return Err(IndexError::HashPowerLimit { hash_power });
        }
        let new_hash_power = hash_power + 1;
        let new_table = self.allocate_table(new_hash_power)?;

        let byte_size = {
            let mut tables = self.tables.write();
            debug_assert_eq!(tables.current.hash_power(), hash_power);
            let previous = mem::replace(&mut tables.current, new_table);
            tables.previous = Some(previous);
            self.cursor.store(0, Ordering::Release);
            self.coordinator.expansion_started();
            tables.byte_size()
        };

        self.stats.record_table_size(new_hash_power, byte_size);
        self.stats.record_expanding(true);

        log::info!(
            "Expanding the key index from {} to {} buckets",
            1usize << hash_power,
            1usize << new_hash_power
        );
        Ok(())
    }

    fn allocate_table(&self, hash_power: u8) -> Result<BucketArray<E>, IndexError> {
        #[cfg(test)]
        {
            self.allocated_under_write_lock
                .fetch_or(self.tables.is_locked_exclusive(), Ordering::AcqRel);
            if self.fail_next_grow.swap(false, Ordering::AcqRel) {
                return Err(IndexError::Allocation { hash_power });
            }
        }

        BucketArray::try_with_hash_power(hash_power)
    }

    /// Grows the table for a pending request. On failure the index stays at its
    /// current size and a later request can try again.
    pub(crate) fn try_grow(&self) -> bool {
        match self.grow() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Continuing at the current table size: {e}");
                self.coordinator.expansion_aborted();
                self.stats.record_expansion_failure();
                false
            }
        }
    }

    /// Ends the expansion cycle once every bucket of the previous table has been
    /// migrated.
    pub(crate) fn finish_expansion(&self) {
        let (previous, requested) = {
            let mut tables = self.tables.write();
            let previous = tables.previous.take();
            let current = &tables.current;
            let requested = self
                .coordinator
                .expansion_finished(current.len(), current.hash_power());

            self.stats.record_table_size(current.hash_power(), current.byte_size());
            self.stats.record_expanding(false);

            log::info!(
                "Finished expanding the key index to {} buckets",
                current.len()
            );
            (previous, requested)
        };

        // Every bucket is empty by now. Free the array outside the write lock.
        debug_assert!(previous.is_some());
        drop(previous);

        if requested {
            log::debug!(
                "The key index is still over its load factor; requested another expansion"
            );
        }
    }
}
