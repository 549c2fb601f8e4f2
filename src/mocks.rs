//! In-memory coordination primitives for tests and cluster simulations.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! cluster-cron = { path = "...", features = ["test-support"] }
//! ```
//!
//! Clones of one [`MockCoordination`] share state, so handing clones to
//! several schedulers simulates a cluster over a single store.

use std::collections::{HashMap, HashSet};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::time::Duration;

use crate::traits::{AtomicCounterStore, DistributedLock};

#[derive(Debug)]
pub struct MockCoordinationError(pub &'static str);

impl std::fmt::Display for MockCoordinationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockCoordinationError {}

#[derive(Default)]
struct MockState {
    counters: HashMap<String, i64>,
    locks: HashSet<String>,
    /// Successful counter writes per key, in order, for monotonicity checks.
    write_history: HashMap<String, Vec<i64>>,
}

/// One in-memory store playing both coordination roles.
///
/// `deny_locks` simulates a lock held elsewhere forever; `fail_calls`
/// simulates a store outage (every call errors).
#[derive(Clone, Default)]
pub struct MockCoordination {
    state: Arc<Mutex<MockState>>,
    deny_locks: Arc<AtomicBool>,
    fail_calls: Arc<AtomicBool>,
    lock_attempts: Arc<AtomicU64>,
}

impl MockCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `try_lock` from now on returns false.
    pub fn deny_locks(&self) {
        self.deny_locks.store(true, Ordering::SeqCst);
    }

    pub fn allow_locks(&self) {
        self.deny_locks.store(false, Ordering::SeqCst);
    }

    /// Every lock and store call from now on fails, simulating an outage.
    pub fn fail_calls(&self) {
        self.fail_calls.store(true, Ordering::SeqCst);
    }

    pub fn restore_calls(&self) {
        self.fail_calls.store(false, Ordering::SeqCst);
    }

    /// Current counter value, 0 if absent.
    pub fn counter(&self, key: &str) -> i64 {
        self.state
            .lock()
            .unwrap()
            .counters
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Every value successfully written to `key`, in write order.
    pub fn write_history(&self, key: &str) -> Vec<i64> {
        self.state
            .lock()
            .unwrap()
            .write_history
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// How many `try_lock` calls were made, including denied ones.
    pub fn lock_attempts(&self) -> u64 {
        self.lock_attempts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), MockCoordinationError> {
        if self.fail_calls.load(Ordering::SeqCst) {
            Err(MockCoordinationError("coordination store unreachable"))
        } else {
            Ok(())
        }
    }

    fn record_write(state: &mut MockState, key: &str, value: i64) {
        state.counters.insert(key.to_string(), value);
        state
            .write_history
            .entry(key.to_string())
            .or_default()
            .push(value);
    }
}

impl DistributedLock for MockCoordination {
    type Error = MockCoordinationError;

    async fn try_lock(&self, key: &str, _timeout: Duration) -> Result<bool, MockCoordinationError> {
        self.lock_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.deny_locks.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.state.lock().unwrap().locks.insert(key.to_string()))
    }

    async fn unlock(&self, key: &str) -> Result<(), MockCoordinationError> {
        self.check_available()?;
        self.state.lock().unwrap().locks.remove(key);
        Ok(())
    }
}

impl AtomicCounterStore for MockCoordination {
    type Error = MockCoordinationError;

    async fn get(&self, key: &str) -> Result<i64, MockCoordinationError> {
        self.check_available()?;
        Ok(self.counter(key))
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), MockCoordinationError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        Self::record_write(&mut state, key, value);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, MockCoordinationError> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        let current = state.counters.get(key).copied().unwrap_or(0);
        if current != expected {
            return Ok(false);
        }
        Self::record_write(&mut state, key, new);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cas_succeeds_only_against_the_current_value() {
        let store = MockCoordination::new();
        assert!(store.compare_and_set("k", 0, 10).await.unwrap());
        assert!(!store.compare_and_set("k", 0, 20).await.unwrap());
        assert!(store.compare_and_set("k", 10, 20).await.unwrap());
        assert_eq!(store.counter("k"), 20);
    }

    #[tokio::test]
    async fn second_lock_attempt_fails_until_unlocked() {
        let store = MockCoordination::new();
        let timeout = Duration::from_millis(50);
        assert!(store.try_lock("lock.a", timeout).await.unwrap());
        assert!(!store.try_lock("lock.a", timeout).await.unwrap());
        store.unlock("lock.a").await.unwrap();
        assert!(store.try_lock("lock.a", timeout).await.unwrap());
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let store = MockCoordination::new();
        store.fail_calls();
        assert!(store.try_lock("lock.a", Duration::ZERO).await.is_err());
        assert!(store.get("k").await.is_err());
        assert!(store.set("k", 1).await.is_err());
        store.restore_calls();
        assert!(store.set("k", 1).await.is_ok());
    }
}
