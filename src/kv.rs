use std::time::Duration;

use async_nats::jetstream::{self, kv};

use crate::error::SchedulerError;

pub const LOCKS_BUCKET: &str = "cron_task_locks";
pub const COUNTERS_BUCKET: &str = "cron_task_counters";

pub const LOCK_KEY_PREFIX: &str = "lock.";
pub const CLAIM_KEY_PREFIX: &str = "claim.";
pub const LAST_SUCCESS_KEY_PREFIX: &str = "last-success.";

/// Lock entries older than this are purged, so a member that crashes between
/// `try_lock` and `unlock` cannot deadlock the claim decision for its peers.
const LOCK_TTL: Duration = Duration::from_secs(10);

pub fn lock_key(task_name: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{task_name}")
}

pub fn claim_key(task_name: &str) -> String {
    format!("{CLAIM_KEY_PREFIX}{task_name}")
}

pub fn last_success_key(task_name: &str) -> String {
    format!("{LAST_SUCCESS_KEY_PREFIX}{task_name}")
}

pub async fn get_or_create_locks_bucket(
    js: &jetstream::Context,
) -> Result<kv::Store, SchedulerError> {
    get_or_create(
        js,
        kv::Config {
            bucket: LOCKS_BUCKET.to_string(),
            history: 1,
            max_age: LOCK_TTL,
            ..Default::default()
        },
    )
    .await
}

pub async fn get_or_create_counters_bucket(
    js: &jetstream::Context,
) -> Result<kv::Store, SchedulerError> {
    get_or_create(
        js,
        kv::Config {
            bucket: COUNTERS_BUCKET.to_string(),
            history: 1,
            ..Default::default()
        },
    )
    .await
}

async fn get_or_create(
    js: &jetstream::Context,
    config: kv::Config,
) -> Result<kv::Store, SchedulerError> {
    let name = config.bucket.clone();
    match js.create_key_value(config).await {
        Ok(store) => Ok(store),
        Err(_) => js
            .get_key_value(&name)
            .await
            .map_err(|e| SchedulerError::Coordination(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_concern() {
        assert_eq!(lock_key("ReportService-generate"), "lock.ReportService-generate");
        assert_eq!(claim_key("ReportService-generate"), "claim.ReportService-generate");
        assert_eq!(
            last_success_key("ReportService-generate"),
            "last-success.ReportService-generate"
        );
    }
}
