use std::fmt::{self, Debug};

/// A snapshot of the key index's table statistics.
///
/// The statistics are updated according to the following rules:
///
/// - `hash_power` and `hash_bytes` are set when the index is built and every
///   time the table size changes. While an expansion is in progress,
///   `hash_bytes` includes the previous table.
/// - `is_expanding` is `true` from a successful growth until the previous
///   table has been drained.
/// - `expansion_count` and `total_expansion_time_nanos` are updated when an
///   expansion cycle completes. The time covers growth and the whole drain. A
///   cycle resumed by a restarted migration worker is timed from the restart.
/// - `expansion_failure_count` is incremented when growth is refused, either
///   because the new table could not be allocated or because the table is at
///   its maximum hash power.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    hash_power: u8,
    hash_bytes: u64,
    is_expanding: bool,
    expansion_count: u64,
    expansion_failure_count: u64,
    total_expansion_time_nanos: u64,
}

impl Debug for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexStats")
            .field("hash_power", &self.hash_power)
            .field("hash_bytes", &self.hash_bytes)
            .field("is_expanding", &self.is_expanding)
            .field("expansion_count", &self.expansion_count)
            .field("expansion_failure_count", &self.expansion_failure_count)
            .field(
                "total_expansion_time_nanos",
                &self.total_expansion_time_nanos,
            )
            .field(
                "average_expansion_time_nanos",
                &self.average_expansion_time_nanos(),
            )
            .finish()
    }
}

impl IndexStats {
    pub fn set_table_size(&mut self, hash_power: u8, hash_bytes: u64) -> &mut Self {
        self.hash_power = hash_power;
        self.hash_bytes = hash_bytes;
        self
    }

    pub fn set_expanding(&mut self, is_expanding: bool) -> &mut Self {
        self.is_expanding = is_expanding;
        self
    }

    pub fn set_expansion_counts(
        &mut self,
        expansion_count: u64,
        expansion_failure_count: u64,
        total_expansion_time_nanos: u64,
    ) -> &mut Self {
        self.expansion_count = expansion_count;
        self.expansion_failure_count = expansion_failure_count;
        self.total_expansion_time_nanos = total_expansion_time_nanos;
        self
    }

    pub fn hash_power(&self) -> u8 {
        self.hash_power
    }

    pub fn hash_bytes(&self) -> u64 {
        self.hash_bytes
    }

    pub fn is_expanding(&self) -> bool {
        self.is_expanding
    }

    pub fn expansion_count(&self) -> u64 {
        self.expansion_count
    }

    pub fn expansion_failure_count(&self) -> u64 {
        self.expansion_failure_count
    }

    pub fn total_expansion_time_nanos(&self) -> u64 {
        self.total_expansion_time_nanos
    }

    pub fn average_expansion_time_nanos(&self) -> f64 {
        if self.expansion_count == 0 {
            0.0
        } else {
            self.total_expansion_time_nanos as f64 / self.expansion_count as f64
        }
    }
}
