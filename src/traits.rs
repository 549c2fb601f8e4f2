use std::future::Future;
use std::time::Duration;

/// Cluster-wide mutual exclusion keyed by task name.
///
/// The lock is held only across the claim decision (a single compare-and-set),
/// never across task-body execution — implementations may safely use short
/// lease TTLs.
pub trait DistributedLock: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Try to acquire the lock, waiting at most `timeout`. `Ok(false)` means
    /// another member holds it — expected contention, not an error.
    fn try_lock(
        &self,
        key: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    fn unlock(&self, key: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Cluster-wide atomic integer store keyed by task name.
///
/// Entries are created lazily on first access; an absent key reads as 0.
pub trait AtomicCounterStore: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync;

    fn get(&self, key: &str) -> impl Future<Output = Result<i64, Self::Error>> + Send;

    fn set(&self, key: &str, value: i64)
        -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Atomically replace `expected` with `new`. `Ok(false)` means the stored
    /// value did not match — another member won the slot.
    fn compare_and_set(
        &self,
        key: &str,
        expected: i64,
        new: i64,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}
