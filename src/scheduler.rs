use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    config::SchedulerConfig,
    error::SchedulerError,
    executor::InstrumentedExecutor,
    protocol::ExecutionProtocol,
    task::{ReschedulingTask, TaskDescriptor, TaskFn, TaskHandle},
    traits::{AtomicCounterStore, DistributedLock},
};

/// Registers recurring tasks and runs them so that each trigger firing
/// executes on at most one cluster member.
///
/// The telemetry registry and the instrumented pool are owned here and passed
/// through to every task explicitly.
pub struct ClusterScheduler<L, C> {
    lock: L,
    store: C,
    config: SchedulerConfig,
    protocol: Arc<ExecutionProtocol<C>>,
    executor: Arc<InstrumentedExecutor>,
    tasks: Mutex<Vec<TaskHandle>>,
    accepting: AtomicBool,
}

impl<L, C> ClusterScheduler<L, C>
where
    L: DistributedLock,
    C: AtomicCounterStore,
{
    pub fn new(lock: L, store: C, config: SchedulerConfig) -> Self {
        let protocol = Arc::new(ExecutionProtocol::new(
            store.clone(),
            config.logging.clone(),
        ));
        let executor = Arc::new(InstrumentedExecutor::new(config.pool_size));
        Self {
            lock,
            store,
            config,
            protocol,
            executor,
            tasks: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
        }
    }

    /// The execution telemetry registry, for health reporting.
    pub fn protocol(&self) -> &Arc<ExecutionProtocol<C>> {
        &self.protocol
    }

    /// The instrumented pool, for gauge snapshots.
    pub fn executor(&self) -> &Arc<InstrumentedExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register a task and start its rescheduling loop. Returns a cancellable
    /// handle. Fails once shutdown has begun.
    pub fn schedule(
        &self,
        descriptor: TaskDescriptor,
        task_fn: TaskFn,
    ) -> Result<TaskHandle, SchedulerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }

        self.protocol
            .register_task(descriptor.name(), descriptor.trigger().cron_expression());

        tracing::info!(task = %descriptor.name(), "Task scheduled");

        let task = ReschedulingTask {
            name: descriptor.name().to_string(),
            trigger: descriptor.trigger().clone(),
            task_fn,
            lock: self.lock.clone(),
            store: self.store.clone(),
            lock_timeout: self.config.lock_timeout(),
            protocol: self.protocol.clone(),
            executor: self.executor.clone(),
        };
        let handle = task.spawn();
        self.tasks.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    /// Cancel a task through the scheduler. Equivalent to `handle.cancel()`.
    pub fn cancel(&self, handle: &TaskHandle) {
        handle.cancel();
    }

    /// Stop accepting new tasks, cancel all pending timers, await in-flight
    /// executions up to `timeout`, then abort whatever is still running.
    pub async fn shutdown(&self, timeout: Duration) {
        self.accepting.store(false, Ordering::SeqCst);

        let handles: Vec<TaskHandle> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in &handles {
            handle.cancel();
        }

        let deadline = tokio::time::Instant::now() + timeout;
        for handle in &handles {
            let Some(mut join) = handle.take_join() else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut join).await.is_err() {
                tracing::warn!(task = %handle.name(), "Task did not stop within the shutdown timeout, aborting");
                join.abort();
            }
        }

        tracing::info!("Cluster scheduler shut down");
    }
}
