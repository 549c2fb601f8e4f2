use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

const METRIC_SUBMITTED: &str = "cluster.scheduling.submitted";
const METRIC_RUNNING: &str = "cluster.scheduling.running";
const METRIC_COMPLETED: &str = "cluster.scheduling.completed";
const METRIC_DURATION: &str = "cluster.scheduling.duration";
const METRIC_SCHEDULED_ONCE: &str = "cluster.scheduling.scheduled.once";
const METRIC_SCHEDULED_REPETITIVELY: &str = "cluster.scheduling.scheduled.repetitively";
const METRIC_SCHEDULED_OVERRUN: &str = "cluster.scheduling.scheduled.overrun";
const TAG_TASK_NAME: &str = "task_name";

const DEFAULT_BUCKET: &str = "default";

/// Explicit task identity threaded alongside every unit of work, so the
/// executor never has to recover a name from the work item itself.
#[derive(Debug, Clone)]
pub struct TaskContext {
    name: String,
}

impl TaskContext {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Bucket for work submitted without a task identity.
    pub fn default_bucket() -> Self {
        Self::named(DEFAULT_BUCKET)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default)]
struct TaskGauges {
    submitted: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    scheduled_once: AtomicU64,
    scheduled_repetitively: AtomicU64,
    scheduled_overrun: AtomicU64,
}

/// Point-in-time copy of one task's executor gauges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskGaugesSnapshot {
    pub submitted: u64,
    pub running: u64,
    pub completed: u64,
    pub scheduled_once: u64,
    pub scheduled_repetitively: u64,
    pub scheduled_overrun: u64,
}

/// Observability wrapper around the local worker pool.
///
/// Maintains per-task gauges and a duration histogram, and bounds how many
/// task bodies run concurrently. It never changes delay, ordering or retry
/// semantics of the work it runs.
pub struct InstrumentedExecutor {
    semaphore: Arc<Semaphore>,
    gauges: Mutex<HashMap<String, Arc<TaskGauges>>>,
}

impl InstrumentedExecutor {
    pub fn new(pool_size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    fn gauges_for(&self, name: &str) -> Arc<TaskGauges> {
        self.gauges
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Readable copy of a task's gauges, for tests and health reporting.
    pub fn snapshot(&self, name: &str) -> Option<TaskGaugesSnapshot> {
        let gauges = self.gauges.lock().unwrap().get(name)?.clone();
        Some(TaskGaugesSnapshot {
            submitted: gauges.submitted.load(Ordering::Relaxed),
            running: gauges.running.load(Ordering::Relaxed),
            completed: gauges.completed.load(Ordering::Relaxed),
            scheduled_once: gauges.scheduled_once.load(Ordering::Relaxed),
            scheduled_repetitively: gauges.scheduled_repetitively.load(Ordering::Relaxed),
            scheduled_overrun: gauges.scheduled_overrun.load(Ordering::Relaxed),
        })
    }

    /// Marks a task as entering a repeating schedule.
    pub fn scheduled_repetitively(&self, ctx: &TaskContext) {
        self.gauges_for(ctx.name())
            .scheduled_repetitively
            .fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_SCHEDULED_REPETITIVELY, TAG_TASK_NAME => ctx.name().to_string())
            .increment(1);
    }

    /// One-shot unit of work, instrumented the same way as periodic bodies.
    pub fn spawn_once<F>(&self, ctx: &TaskContext, fut: F) -> JoinHandle<Result<F::Output, JoinError>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.gauges_for(ctx.name())
            .scheduled_once
            .fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_SCHEDULED_ONCE, TAG_TASK_NAME => ctx.name().to_string()).increment(1);

        let ctx = ctx.clone();
        let semaphore = self.semaphore.clone();
        let gauges = self.gauges_for(ctx.name());
        tokio::spawn(async move {
            run_instrumented(&ctx, &semaphore, &gauges, None, fut).await
        })
    }

    /// Run one firing of a task body: submitted → running → duration →
    /// completed, with overrun detection for fixed-period work. The body runs
    /// on its own task so a panic surfaces as a `JoinError` instead of tearing
    /// down the caller.
    pub async fn run<F, T>(
        &self,
        ctx: &TaskContext,
        period: Option<Duration>,
        fut: F,
    ) -> Result<T, JoinError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let gauges = self.gauges_for(ctx.name());
        run_instrumented(ctx, &self.semaphore, &gauges, period, fut).await
    }
}

/// Decrements the running gauge when dropped, so a caller cancelled mid-await
/// still leaves the gauge consistent.
struct RunningGuard {
    gauges: Arc<TaskGauges>,
    name: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.gauges.running.fetch_sub(1, Ordering::Relaxed);
        gauge!(METRIC_RUNNING, TAG_TASK_NAME => self.name.clone()).decrement(1.0);
    }
}

/// Aborts the spawned body when the instrumented caller is dropped (a
/// force-cancelled shutdown, for instance), so no work keeps running detached.
/// Aborting an already-finished task is a no-op.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_instrumented<F, T>(
    ctx: &TaskContext,
    semaphore: &Arc<Semaphore>,
    gauges: &Arc<TaskGauges>,
    period: Option<Duration>,
    fut: F,
) -> Result<T, JoinError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    gauges.submitted.fetch_add(1, Ordering::Relaxed);
    counter!(METRIC_SUBMITTED, TAG_TASK_NAME => ctx.name().to_string()).increment(1);

    // The semaphore is never closed; an Err here only means the pool bound is
    // gone, in which case the work still runs.
    let _permit = semaphore.clone().acquire_owned().await.ok();

    gauges.running.fetch_add(1, Ordering::Relaxed);
    gauge!(METRIC_RUNNING, TAG_TASK_NAME => ctx.name().to_string()).increment(1.0);
    let running = RunningGuard {
        gauges: gauges.clone(),
        name: ctx.name().to_string(),
    };

    let started = tokio::time::Instant::now();
    let mut body = AbortOnDrop(tokio::spawn(fut));
    let result = (&mut body.0).await;
    let elapsed = started.elapsed();

    drop(running);
    gauges.completed.fetch_add(1, Ordering::Relaxed);
    counter!(METRIC_COMPLETED, TAG_TASK_NAME => ctx.name().to_string()).increment(1);
    histogram!(METRIC_DURATION, TAG_TASK_NAME => ctx.name().to_string())
        .record(elapsed.as_secs_f64());

    if period.is_some_and(|p| elapsed > p) {
        gauges.scheduled_overrun.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_SCHEDULED_OVERRUN, TAG_TASK_NAME => ctx.name().to_string()).increment(1);
        tracing::warn!(
            task = %ctx.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Periodic task overran its period"
        );
    }

    result
}
