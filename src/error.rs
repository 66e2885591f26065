/// The error type for the operations of [`KeyIndex`][key-index].
///
/// [key-index]: ./struct.KeyIndex.html
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// A bucket array of `2^hash_power` buckets could not be allocated.
    ///
    /// Returned from `build` when the initial table cannot be allocated. During
    /// an expansion this is recovered internally; the index keeps serving at
    /// its current size.
    #[error("Failed to allocate a bucket array with hash power {hash_power}")]
    Allocation { hash_power: u8 },

    /// The table is already at the configured maximum hash power.
    #[error("The bucket array cannot grow beyond hash power {hash_power}")]
    HashPowerLimit { hash_power: u8 },

    /// `delete` was called for a key that is not in the index. Two racing
    /// deletes of the same key end up here.
    #[error("The key was not found in the index")]
    KeyNotFound,

    /// `start_migration_worker` was called while a worker thread is running.
    #[error("The migration worker is already running")]
    WorkerAlreadyRunning,

    /// The migration worker thread panicked before it was stopped.
    #[error("The migration worker thread panicked")]
    WorkerPanicked,

    /// The OS refused to spawn the migration worker thread.
    #[error("Failed to spawn the migration worker thread: {0}")]
    SpawnWorker(#[from] std::io::Error),
}
