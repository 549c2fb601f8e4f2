use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use crate::{config::TaskLoggingConfig, kv, traits::AtomicCounterStore};

const METRIC_START: &str = "cluster.scheduling.start_execution";
const METRIC_FINISHED: &str = "cluster.scheduling.finished_execution";
const METRIC_FAILED: &str = "cluster.scheduling.failed_execution";
const TAG_TASK_NAME: &str = "task_name";

/// Canonical task name: owning type plus operation, so every cluster member
/// computes the identical coordination keys.
pub fn task_name(owner: &str, operation: &str) -> String {
    format!("{owner}-{operation}")
}

/// Per-task bookkeeping visible through [`ExecutionProtocol::get_task_protocol`].
///
/// `cluster_last_success` is read back from the coordination store on demand;
/// divergence from `local_last_success` shows which member ran the last slot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskState {
    pub cron_expression: Option<String>,
    pub local_last_success: Option<DateTime<Utc>>,
    pub cluster_last_success: Option<DateTime<Utc>>,
}

/// Execution telemetry registry: counts start/finish/fail events, tracks
/// last-success timestamps locally and cluster-wide, and serves a read-back
/// snapshot for health reporting.
///
/// Owned by the scheduler and passed through explicitly — never a process-wide
/// singleton.
pub struct ExecutionProtocol<C> {
    store: C,
    logging: TaskLoggingConfig,
    tasks: Mutex<HashMap<String, TaskState>>,
}

impl<C: AtomicCounterStore> ExecutionProtocol<C> {
    pub fn new(store: C, logging: TaskLoggingConfig) -> Self {
        Self {
            store,
            logging,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Record static task metadata. Re-registration of the same name keeps the
    /// first entry.
    pub fn register_task(&self, name: &str, cron_expression: Option<&str>) {
        self.tasks
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| TaskState {
                cron_expression: cron_expression.map(str::to_string),
                ..TaskState::default()
            });
    }

    pub fn start_execution(&self, name: &str) {
        counter!(METRIC_START, TAG_TASK_NAME => name.to_string()).increment(1);
        if self.should_log(name) {
            tracing::info!(task = %name, "Task execution started");
        }
    }

    /// `completion` is the instant the winning member started the body; it is
    /// written to the cluster store so all members converge on the same
    /// last-success view.
    pub async fn finished_execution(&self, name: &str, completion: DateTime<Utc>) {
        if self.should_log(name) {
            tracing::info!(task = %name, "Task execution finished");
        }
        counter!(METRIC_FINISHED, TAG_TASK_NAME => name.to_string()).increment(1);

        {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(state) = tasks.get_mut(name) {
                state.local_last_success = Some(completion);
            }
        }

        let key = kv::last_success_key(name);
        if let Err(e) = self.store.set(&key, completion.timestamp_millis()).await {
            tracing::error!(task = %name, error = %e, "Failed to publish last-success time to the cluster store");
        }
    }

    pub fn failed_execution(&self, name: &str) {
        if self.should_log(name) {
            tracing::info!(task = %name, "Task execution failed");
        }
        counter!(METRIC_FAILED, TAG_TASK_NAME => name.to_string()).increment(1);
    }

    /// Snapshot of every registered task, with the cluster-wide last-success
    /// value read back from the coordination store (absent or 0 reads as none).
    pub async fn get_task_protocol(&self) -> HashMap<String, TaskState> {
        let names: Vec<String> = self.tasks.lock().unwrap().keys().cloned().collect();

        for name in names {
            let key = kv::last_success_key(&name);
            match self.store.get(&key).await {
                Ok(0) => {}
                Ok(millis) => {
                    if let Some(time) = DateTime::from_timestamp_millis(millis) {
                        let mut tasks = self.tasks.lock().unwrap();
                        if let Some(state) = tasks.get_mut(&name) {
                            state.cluster_last_success = Some(time);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(task = %name, error = %e, "Failed to read cluster last-success time");
                }
            }
        }

        self.tasks.lock().unwrap().clone()
    }

    fn should_log(&self, name: &str) -> bool {
        self.logging.enabled && !self.logging.ignored_tasks.iter().any(|t| t == name)
    }
}


#[cfg(all(test, feature = "test-support"))]
mod store_tests {
    use super::*;
    use crate::mocks::MockCoordination;

    #[tokio::test]
    async fn finished_execution_converges_local_and_cluster_views() {
        let store = MockCoordination::new();
        let protocol = ExecutionProtocol::new(store.clone(), TaskLoggingConfig::default());
        let completion = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();

        protocol.register_task("X-Y", Some("0 0 * * * ?"));
        protocol.start_execution("X-Y");
        protocol.finished_execution("X-Y", completion).await;

        let snapshot = protocol.get_task_protocol().await;
        let state = &snapshot["X-Y"];
        assert_eq!(state.cron_expression.as_deref(), Some("0 0 * * * ?"));
        assert_eq!(state.local_last_success, Some(completion));
        assert_eq!(state.cluster_last_success, Some(completion));
    }

    #[tokio::test]
    async fn unregistered_task_is_absent_from_protocol() {
        let store = MockCoordination::new();
        let protocol = ExecutionProtocol::new(store, TaskLoggingConfig::default());

        protocol.start_execution("ghost");
        protocol.failed_execution("ghost");

        assert!(protocol.get_task_protocol().await.is_empty());
    }

    #[tokio::test]
    async fn registration_keeps_first_metadata() {
        let store = MockCoordination::new();
        let protocol = ExecutionProtocol::new(store, TaskLoggingConfig::default());

        protocol.register_task("A-b", Some("0 * * * * *"));
        protocol.register_task("A-b", None);

        let snapshot = protocol.get_task_protocol().await;
        assert_eq!(snapshot["A-b"].cron_expression.as_deref(), Some("0 * * * * *"));
    }
}
