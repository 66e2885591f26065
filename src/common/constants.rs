/// The default hash power of the initial bucket array (65,536 buckets).
pub const DEFAULT_HASH_POWER: u8 = 16;

/// The largest hash power a bucket array can grow to.
#[cfg(target_pointer_width = "64")]
pub const MAX_HASH_POWER: u8 = 32;

/// The largest hash power a bucket array can grow to.
#[cfg(not(target_pointer_width = "64"))]
pub const MAX_HASH_POWER: u8 = 30;

/// The environment variable that sets the number of buckets the migration
/// worker moves per iteration.
pub const BULK_MOVE_ENV_VAR: &str = "CACHE_INDEX_HASH_BULK_MOVE";

// 8,192 lock stripes. Clamped to the initial hash power.
pub(crate) const DEFAULT_LOCK_POWER: u8 = 13;

pub(crate) const DEFAULT_BULK_MOVE: usize = 1;

// Growth is requested once the live entries exceed 3/2 of the bucket count.
pub(crate) const LOAD_FACTOR_NUMERATOR: u64 = 3;
pub(crate) const LOAD_FACTOR_DENOMINATOR: u64 = 2;

pub(crate) const LOCK_RETRY_INTERVAL_MICROS: u64 = 50;
