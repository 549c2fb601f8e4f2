use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{
    executor::{InstrumentedExecutor, TaskContext},
    kv,
    protocol::{self, ExecutionProtocol},
    traits::{AtomicCounterStore, DistributedLock},
    trigger::{TriggerContext, TriggerSpec},
};

/// Error produced by a task body. Bodies never propagate out of the
/// scheduler; failures are converted to telemetry.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// The schedulable unit of work: an async callable producing a fresh future
/// per firing.
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync>;

/// Adapt an async closure into a [`TaskFn`].
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), TaskError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as BoxFuture<'static, Result<(), TaskError>>)
}

/// Immutable description of a recurring task: canonical name plus trigger.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    name: String,
    trigger: TriggerSpec,
}

impl TaskDescriptor {
    /// Name is derived from the owning type and operation, so every cluster
    /// member computes the identical coordination keys.
    pub fn new(owner: &str, operation: &str, trigger: TriggerSpec) -> Self {
        Self {
            name: protocol::task_name(owner, operation),
            trigger,
        }
    }

    /// Derive the owner from a type name (module path stripped).
    pub fn for_type<T: ?Sized>(operation: &str, trigger: TriggerSpec) -> Self {
        let full = std::any::type_name::<T>();
        let owner = full.rsplit("::").next().unwrap_or(full);
        Self::new(owner, operation, trigger)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> &TriggerSpec {
        &self.trigger
    }
}

/// Outcome of one claim decision for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimOutcome {
    /// This member's compare-and-set won the slot.
    Won,
    /// The claim was already advanced by another member.
    Lost,
    /// The lock was not acquired within the bound — another member is deciding.
    LockBusy,
    /// A lock or store call failed abnormally. Already logged at error level.
    StoreUnavailable,
}

struct TaskShared {
    name: String,
    cancel: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Cancellable handle to a scheduled task.
///
/// Cancellation is cooperative: it prevents the next rearm and any pending
/// timer, but never interrupts an in-flight body.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskShared>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Idempotent; a second call (or a call after the task already ended) is a
    /// no-op.
    pub fn cancel(&self) {
        let _ = self.inner.cancel.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    pub(crate) fn take_join(&self) -> Option<JoinHandle<()>> {
        self.inner.join.lock().unwrap().take()
    }
}

/// Per-task state machine: timer → claim → run or skip → rearm, forever,
/// until the trigger is exhausted or the handle is cancelled.
pub(crate) struct ReschedulingTask<L, C> {
    pub(crate) name: String,
    pub(crate) trigger: TriggerSpec,
    pub(crate) task_fn: TaskFn,
    pub(crate) lock: L,
    pub(crate) store: C,
    pub(crate) lock_timeout: Duration,
    pub(crate) protocol: Arc<ExecutionProtocol<C>>,
    pub(crate) executor: Arc<InstrumentedExecutor>,
}

impl<L, C> ReschedulingTask<L, C>
where
    L: DistributedLock,
    C: AtomicCounterStore,
{
    pub(crate) fn spawn(self) -> TaskHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let name = self.name.clone();
        self.executor
            .scheduled_repetitively(&TaskContext::named(&name));
        let join = tokio::spawn(self.run(cancel_rx));
        TaskHandle {
            inner: Arc::new(TaskShared {
                name,
                cancel: cancel_tx,
                join: Mutex::new(Some(join)),
            }),
        }
    }

    async fn run(self, mut cancel: watch::Receiver<bool>) {
        let ctx = TaskContext::named(&self.name);
        let claim_key = kv::claim_key(&self.name);
        let lock_key = kv::lock_key(&self.name);
        let mut trigger_ctx = TriggerContext::default();

        loop {
            let Some(scheduled) = self.trigger.next_fire_time(&trigger_ctx) else {
                tracing::info!(task = %self.name, "Trigger exhausted, task will not fire again");
                break;
            };
            let scheduled_millis = scheduled.timestamp_millis();

            // Arm the claim with the scheduled time. Every member writes the
            // same value, which seeds the compare-and-set expectation for this
            // slot even on a cold store.
            if let Err(e) = self.store.set(&claim_key, scheduled_millis).await {
                tracing::error!(task = %self.name, error = %e, "Failed to arm execution claim");
            }

            // Past-due slots fire immediately.
            let delay = (scheduled - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_cancelled(&mut cancel) => {
                    tracing::debug!(task = %self.name, "Task cancelled while waiting for next fire");
                    break;
                }
            }

            let actual = Utc::now();
            match self
                .try_claim(&lock_key, &claim_key, scheduled_millis, actual)
                .await
            {
                ClaimOutcome::Won => {
                    self.protocol.start_execution(&self.name);
                    let started = Utc::now();
                    let body = (self.task_fn)();
                    match self.executor.run(&ctx, self.trigger.period(), body).await {
                        Ok(Ok(())) => {
                            self.protocol.finished_execution(&self.name, started).await;
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(task = %self.name, error = %e, "Task body failed");
                            self.protocol.failed_execution(&self.name);
                        }
                        Err(e) => {
                            tracing::error!(task = %self.name, error = %e, "Task body panicked");
                            self.protocol.failed_execution(&self.name);
                        }
                    }
                }
                ClaimOutcome::Lost | ClaimOutcome::LockBusy => {
                    tracing::trace!(task = %self.name, scheduled_millis, "Slot claimed by another member, skipping");
                }
                // Degraded mode: the slot is skipped here but the schedule
                // keeps rearming. During a store outage or partition the
                // at-most-once property is not maintained.
                ClaimOutcome::StoreUnavailable => {}
            }

            trigger_ctx.update(scheduled, actual, Utc::now());

            if *cancel.borrow() {
                tracing::debug!(task = %self.name, "Task cancelled, not rearming");
                break;
            }
        }
    }

    /// The lock is held only across the single compare-and-set below and is
    /// released before the body runs, so slow bodies never block other
    /// members' next-tick decisions.
    async fn try_claim(
        &self,
        lock_key: &str,
        claim_key: &str,
        expected_millis: i64,
        actual: DateTime<Utc>,
    ) -> ClaimOutcome {
        match self.lock.try_lock(lock_key, self.lock_timeout).await {
            Ok(false) => ClaimOutcome::LockBusy,
            Ok(true) => {
                // max() keeps the claim non-decreasing even when this member's
                // clock lags the scheduled instant.
                let claim_value = actual.timestamp_millis().max(expected_millis) + 1;
                let claimed = self
                    .store
                    .compare_and_set(claim_key, expected_millis, claim_value)
                    .await;
                if let Err(e) = self.lock.unlock(lock_key).await {
                    tracing::error!(task = %self.name, error = %e, "Failed to release task lock");
                }
                match claimed {
                    Ok(true) => ClaimOutcome::Won,
                    Ok(false) => ClaimOutcome::Lost,
                    Err(e) => {
                        tracing::error!(task = %self.name, error = %e, "Coordination store unavailable during claim");
                        ClaimOutcome::StoreUnavailable
                    }
                }
            }
            Err(e) => {
                tracing::error!(task = %self.name, error = %e, "Coordination store unavailable while acquiring task lock");
                ClaimOutcome::StoreUnavailable
            }
        }
    }
}

/// Resolves when cancellation is requested. If the last handle is dropped
/// without cancelling, the schedule keeps running for the process lifetime.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    while cancel.changed().await.is_ok() {
        if *cancel.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct ReportService;

    #[test]
    fn descriptor_name_is_owner_dash_operation() {
        let trigger = TriggerSpec::interval(Duration::from_secs(60));
        let descriptor = TaskDescriptor::new("ReportService", "generate", trigger);
        assert_eq!(descriptor.name(), "ReportService-generate");
    }

    #[test]
    fn for_type_strips_the_module_path() {
        let trigger = TriggerSpec::interval(Duration::from_secs(60));
        let descriptor = TaskDescriptor::for_type::<ReportService>("generate", trigger);
        assert_eq!(descriptor.name(), "ReportService-generate");
    }
}
