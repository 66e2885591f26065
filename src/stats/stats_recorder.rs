use super::IndexStats;

use std::time::Duration;

use crossbeam_utils::atomic::AtomicCell;

pub(crate) fn saturating_add(counter: &AtomicCell<u64>, value: u64) {
    let mut v0 = counter.load();
    loop {
        let v1 = v0.saturating_add(value);
        match counter.compare_exchange(v0, v1) {
            Ok(_) => break,
            Err(v2) => v0 = v2,
        }
    }
}

/// Receives table size changes and expansion events from a key index.
///
/// Called from the thread that changes the table, which is the migration worker
/// for everything but the initial size. Implementations must not block.
pub trait StatsRecorder: Send + Sync {
    #[allow(unused_variables)]
    fn record_table_size(&self, hash_power: u8, byte_size: u64) {}

    #[allow(unused_variables)]
    fn record_expanding(&self, is_expanding: bool) {}

    #[allow(unused_variables)]
    fn record_expansion(&self, elapsed: Duration) {}

    fn record_expansion_failure(&self) {}

    fn snapshot(&self) -> IndexStats;
}

/// A `StatsRecorder` that does not record anything.
#[derive(Default)]
pub struct DisabledStatsRecorder;

impl StatsRecorder for DisabledStatsRecorder {
    fn snapshot(&self) -> IndexStats {
        // Return an `IndexStats` with all fields set to 0.
        IndexStats::default()
    }
}

#[derive(Default)]
pub struct DefaultStatsRecorder {
    hash_power: AtomicCell<u8>,
    hash_bytes: AtomicCell<u64>,
    is_expanding: AtomicCell<bool>,
    expansion_count: AtomicCell<u64>,
    expansion_failure_count: AtomicCell<u64>,
    total_expansion_time: AtomicCell<u64>,
}

impl StatsRecorder for DefaultStatsRecorder {
    fn record_table_size(&self, hash_power: u8, byte_size: u64) {
        self.hash_power.store(hash_power);
        self.hash_bytes.store(byte_size);
    }

    fn record_expanding(&self, is_expanding: bool) {
        self.is_expanding.store(is_expanding);
    }

    fn record_expansion(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        saturating_add(&self.expansion_count, 1);
        saturating_add(&self.total_expansion_time, nanos);
    }

    fn record_expansion_failure(&self) {
        saturating_add(&self.expansion_failure_count, 1);
    }

    fn snapshot(&self) -> IndexStats {
        let mut stats = IndexStats::default();
        stats
            .set_table_size(self.hash_power.load(), self.hash_bytes.load())
            .set_expanding(self.is_expanding.load())
            .set_expansion_counts(
                self.expansion_count.load(),
                self.expansion_failure_count.load(),
                self.total_expansion_time.load(),
            );
        stats
    }
}
