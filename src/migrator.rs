use crate::{
    common::constants::LOCK_RETRY_INTERVAL_MICROS, expansion::ExpansionCoordinator, table::Inner,
    IndexEntry, IndexError,
};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

const WORKER_THREAD_NAME: &str = "cache-index-migrator";

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MigrationStep {
    /// The requested buckets were migrated and more remain.
    Moved,
    /// The last bucket was migrated and the expansion cycle has ended.
    Finished,
    /// There is no expansion in progress.
    Idle,
    /// Shutdown was requested while waiting for a bucket's stripe.
    Stopped,
}

impl<E: IndexEntry> Inner<E> {
    /// Moves up to `count` buckets, starting at the migration cursor, from the
    /// previous table into the current one, advancing the cursor after each.
    ///
    /// The whole batch runs under one read guard of the tables. Each bucket is
    /// moved as a unit under its stripe lock. If a stripe is busy, retries after a
    /// short sleep until it is free or `shutdown` is set.
    pub(crate) fn migrate_buckets(&self, count: usize, shutdown: &AtomicBool) -> MigrationStep {
        let tables = self.tables.read();
        let Some(previous) = &tables.previous else {
            return MigrationStep::Idle;
        };

        let mut cursor = self.cursor();
        for _ in 0..count.max(1) {
            let stripe = loop {
                if let Some(guard) = self.locks.try_lock_bucket(cursor) {
                    break guard;
                }
                if shutdown.load(Ordering::Acquire) {
                    return MigrationStep::Stopped;
                }
                log::trace!("Bucket {cursor} is locked; retrying");
                thread::sleep(Duration::from_micros(LOCK_RETRY_INTERVAL_MICROS));
            };

            previous.move_bucket(cursor, &tables.current);
            cursor += 1;
            self.cursor.store(cursor, Ordering::Release);
            drop(stripe);

            if cursor == previous.len() {
                drop(tables);
                self.finish_expansion();
                return MigrationStep::Finished;
            }
        }
        MigrationStep::Moved
    }

    #[cfg(test)]
    pub(crate) fn migrate_next_bucket(&self, shutdown: &AtomicBool) -> MigrationStep {
        self.migrate_buckets(1, shutdown)
    }

    /// Migrates buckets `bulk_move` at a time until the previous table is drained,
    /// yielding between batches. Returns `false` if it stopped early because of
    /// `shutdown`.
    fn drain(&self, shutdown: &AtomicBool) -> bool {
        loop {
            match self.migrate_buckets(self.bulk_move, shutdown) {
                MigrationStep::Moved => (),
                MigrationStep::Finished | MigrationStep::Idle => return true,
                MigrationStep::Stopped => return false,
            }
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            thread::yield_now();
        }
    }

    fn run_migration(&self, shutdown: &AtomicBool) {
        loop {
            // A worker stopped mid-cycle leaves the previous table in place. Resume
            // draining it before waiting for new requests.
            let started = if self.is_expanding() {
                Instant::now()
            } else {
                if !self.coordinator.wait_for_request(shutdown) {
                    break;
                }
                let started = Instant::now();
                if !self.try_grow() {
                    continue;
                }
                started
            };

            if !self.drain(shutdown) {
                break;
            }
            self.stats.record_expansion(started.elapsed());
        }
    }
}

/// The handle of the background thread that grows and drains the table.
pub(crate) struct MigrationWorker {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl MigrationWorker {
    pub(crate) fn start<E>(inner: &Arc<Inner<E>>) -> Result<Self, IndexError>
    where
        E: IndexEntry + Send + Sync + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn({
                let inner = Arc::clone(inner);
                let shutdown = Arc::clone(&shutdown);
                move || {
                    log::debug!("Migration worker started");
                    inner.run_migration(&shutdown);
                    log::debug!("Migration worker stopped");
                }
            })?;

        Ok(Self { shutdown, handle })
    }

    /// Signals the worker to stop and waits for its thread to exit. A bucket that
    /// is being moved is always moved completely first.
    pub(crate) fn stop(self, coordinator: &ExpansionCoordinator) -> Result<(), IndexError> {
        self.shutdown.store(true, Ordering::Release);
        coordinator.notify_shutdown();
        self.handle.join().map_err(|_| IndexError::WorkerPanicked)
    }
}
