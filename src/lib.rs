#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! A concurrent key index for in-memory cache servers.
//!
//! [`KeyIndex`] maps cache keys to cache entries with a chained hash table that
//! is shared by many worker threads. It grows without stopping the world: when
//! the table gets too full, a background migration worker allocates a table
//! twice the size and moves the entries over bucket by bucket, while lookups,
//! insertions and deletions keep running against whichever table currently holds
//! their bucket.
//!
//! The index does not own the entries' lifecycle. Entries are shared as
//! `Arc<E>` where `E` implements [`IndexEntry`], and the caller supplies the
//! 32-bit hash of the key on every call.
//!
//! # Example
//!
//! ```rust
//! use cache_index::{IndexEntry, KeyIndex};
//! use std::sync::Arc;
//!
//! struct Item {
//!     key: Vec<u8>,
//!     value: String,
//! }
//!
//! impl IndexEntry for Item {
//!     fn key(&self) -> &[u8] {
//!         &self.key
//!     }
//! }
//!
//! // A toy hash. Real servers use a proper hash function over the key bytes.
//! fn hash(key: &[u8]) -> u32 {
//!     key.iter()
//!         .fold(0x811c_9dc5, |h, b| (h ^ *b as u32).wrapping_mul(0x0100_0193))
//! }
//!
//! let index = KeyIndex::new(4).unwrap();
//! index.start_migration_worker().unwrap();
//!
//! for i in 0..100 {
//!     let key = format!("item-{i}").into_bytes();
//!     let h = hash(&key);
//!     index.insert(Arc::new(Item { key, value: i.to_string() }), h);
//! }
//!
//! let found = index.find(b"item-42", hash(b"item-42")).unwrap();
//! assert_eq!(found.value, "42");
//! assert_eq!(index.len(), 100);
//!
//! index.stop_migration_worker().unwrap();
//! ```
//!
//! # Configuration
//!
//! The number of buckets the migration worker moves per iteration can be set
//! with [`KeyIndexBuilder::bulk_move`] or the `CACHE_INDEX_HASH_BULK_MOVE`
//! environment variable, which is read once per process.

pub(crate) mod bucket;
pub(crate) mod common;
mod entry;
mod error;
pub(crate) mod expansion;
mod index;
pub(crate) mod locks;
pub(crate) mod migrator;
pub mod stats;
pub(crate) mod table;

pub use common::constants::{BULK_MOVE_ENV_VAR, DEFAULT_HASH_POWER, MAX_HASH_POWER};
pub use entry::IndexEntry;
pub use error::IndexError;
pub use expansion::ExpansionState;
pub use index::{BucketGuard, KeyIndex, KeyIndexBuilder};
pub use stats::{DefaultStatsRecorder, DisabledStatsRecorder, IndexStats, StatsRecorder};
