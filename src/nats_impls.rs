use std::time::Duration;

use async_nats::jetstream::kv;
use bytes::Bytes;
use uuid::Uuid;

use crate::{
    error::SchedulerError,
    traits::{AtomicCounterStore, DistributedLock},
};

fn coordination_err(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Coordination(e.to_string())
}

/// `DistributedLock` backed by a NATS KV bucket with a TTL.
///
/// Acquire = atomic `create` of the lock key (fails while another member holds
/// it), release = `delete`. The bucket TTL reclaims locks from crashed holders.
#[derive(Clone)]
pub struct NatsTaskLock {
    store: kv::Store,
    holder_id: String,
}

impl NatsTaskLock {
    pub fn new(store: kv::Store) -> Self {
        Self {
            store,
            holder_id: Uuid::new_v4().to_string(),
        }
    }
}

impl DistributedLock for NatsTaskLock {
    type Error = SchedulerError;

    async fn try_lock(&self, key: &str, timeout: Duration) -> Result<bool, SchedulerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self
                .store
                .create(key, Bytes::from(self.holder_id.clone()))
                .await
            {
                Ok(_) => return Ok(true),
                // Held by another member. Poll again until the timeout.
                Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => {}
                // Anything else is a store failure, not contention.
                Err(e) => return Err(coordination_err(e)),
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            // Small jitter so contending members don't retry in lockstep.
            let backoff = Duration::from_millis(5 + rand::random::<u64>() % 10);
            tokio::time::sleep(backoff.min(deadline - now)).await;
        }
    }

    async fn unlock(&self, key: &str) -> Result<(), SchedulerError> {
        self.store
            .delete(key)
            .await
            .map(|_| ())
            .map_err(coordination_err)
    }
}

/// `AtomicCounterStore` backed by a NATS KV bucket.
///
/// Compare-and-set maps to a revision-guarded `update`: the revision read
/// together with the current value guarantees no interleaved write between
/// the read and the update.
#[derive(Clone)]
pub struct NatsCounterStore {
    store: kv::Store,
}

impl NatsCounterStore {
    pub fn new(store: kv::Store) -> Self {
        Self { store }
    }

    async fn current(&self, key: &str) -> Result<Option<(i64, u64)>, SchedulerError> {
        match self.store.entry(key).await.map_err(coordination_err)? {
            Some(entry) if entry.operation == kv::Operation::Put => {
                let value = std::str::from_utf8(&entry.value)
                    .map_err(coordination_err)?
                    .parse::<i64>()
                    .map_err(coordination_err)?;
                Ok(Some((value, entry.revision)))
            }
            _ => Ok(None),
        }
    }
}

impl AtomicCounterStore for NatsCounterStore {
    type Error = SchedulerError;

    async fn get(&self, key: &str) -> Result<i64, SchedulerError> {
        Ok(self.current(key).await?.map(|(value, _)| value).unwrap_or(0))
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), SchedulerError> {
        self.store
            .put(key, Bytes::from(value.to_string()))
            .await
            .map(|_| ())
            .map_err(coordination_err)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, SchedulerError> {
        match self.current(key).await? {
            Some((value, revision)) => {
                if value != expected {
                    return Ok(false);
                }
                match self
                    .store
                    .update(key, Bytes::from(new.to_string()), revision)
                    .await
                {
                    Ok(_) => Ok(true),
                    // Revision moved under us — another member won the slot.
                    Err(_) => Ok(false),
                }
            }
            None => {
                // Absent entry reads as 0.
                if expected != 0 {
                    return Ok(false);
                }
                match self.store.create(key, Bytes::from(new.to_string())).await {
                    Ok(_) => Ok(true),
                    Err(_) => Ok(false),
                }
            }
        }
    }
}
