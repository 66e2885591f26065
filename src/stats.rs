//! Statistics about the key index's bucket table and its expansions.

mod index_stats;
mod stats_recorder;

pub use index_stats::IndexStats;
pub use stats_recorder::{DefaultStatsRecorder, DisabledStatsRecorder, StatsRecorder};
