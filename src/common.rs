use once_cell::sync::Lazy;

pub(crate) mod builder_utils;
pub(crate) mod constants;

use self::constants::{BULK_MOVE_ENV_VAR, DEFAULT_BULK_MOVE};

// Read once per process. Later changes to the environment are not observed.
static ENV_BULK_MOVE: Lazy<usize> =
    Lazy::new(|| parse_bulk_move(std::env::var(BULK_MOVE_ENV_VAR).ok().as_deref()));

/// The number of buckets the migration worker moves per iteration, as configured
/// by the `CACHE_INDEX_HASH_BULK_MOVE` environment variable.
pub(crate) fn bulk_move_from_env() -> usize {
    *ENV_BULK_MOVE
}

// Unset, unparsable, zero or negative values fall back to the default.
pub(crate) fn parse_bulk_move(value: Option<&str>) -> usize {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(DEFAULT_BULK_MOVE)
}

#[inline]
pub(crate) fn mask(hash_power: u8) -> usize {
    // `hash_power` never exceeds `MAX_HASH_POWER`, so the shift cannot overflow.
    (1usize << hash_power) - 1
}

#[cfg(test)]
pub(crate) fn available_parallelism() -> usize {
    use std::{num::NonZeroUsize, thread::available_parallelism};
    available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}
