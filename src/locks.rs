use crate::common;

use parking_lot::{Mutex, MutexGuard};

/// Striped per-bucket locks.
///
/// A stripe is selected by the low `lock_power` bits of a hash. Because
/// `lock_power` never exceeds the initial hash power, the stripe of a bucket in
/// the previous table also covers both of the buckets its entries move to in the
/// doubled table. Holding the stripe of a hash therefore pins the migration
/// cursor on one side of that hash's bucket.
pub(crate) struct BucketLocks {
    stripes: Box<[Mutex<()>]>,
    mask: usize,
}

impl BucketLocks {
    pub(crate) fn new(lock_power: u8) -> Self {
        let stripes = std::iter::repeat_with(|| Mutex::new(()))
            .take(1usize << lock_power)
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            stripes,
            mask: common::mask(lock_power),
        }
    }

    pub(crate) fn lock(&self, hash: u32) -> MutexGuard<'_, ()> {
        self.stripes[hash as usize & self.mask].lock()
    }

    /// Tries to lock the stripe covering bucket `bucket_index` of any table that is
    /// at least as large as the stripe array. Never blocks.
    pub(crate) fn try_lock_bucket(&self, bucket_index: usize) -> Option<MutexGuard<'_, ()>> {
        self.stripes[bucket_index & self.mask].try_lock()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.stripes.len()
    }
}
