//! # cluster-cron
//!
//! Cluster-safe recurring-task scheduler: several independent processes hold
//! the identical schedule for the same named tasks, and each trigger firing
//! executes its task body on **at most one** member.
//!
//! ## How a firing is decided
//!
//! - Every member arms a cluster-wide claim with the slot's *scheduled* time.
//! - At fire time a member takes a short distributed lock (tens of
//!   milliseconds), performs exactly one compare-and-set of the claim from the
//!   scheduled time to the actual time, and releases the lock immediately —
//!   the lock guards the decision, never the task body.
//! - The CAS winner runs the body; everyone else skips and rearms. Slow bodies
//!   never serialize other members' next-tick decisions.
//!
//! This is lock-assisted, best-effort at-most-once execution, not consensus:
//! if the coordination store is unreachable the slot is skipped (logged at
//! error level) and the schedule keeps rearming, accepting possible duplicate
//! execution under a store partition rather than halting the schedule.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cluster_cron::{
//!     ClusterScheduler, SchedulerConfig, TaskDescriptor, TriggerSpec, task_fn,
//! };
//! use cluster_cron::nats_impls::{NatsCounterStore, NatsTaskLock};
//!
//! #[tokio::main]
//! async fn main() {
//!     let nats = async_nats::connect("nats://localhost:4222").await.unwrap();
//!     let js = async_nats::jetstream::new(nats);
//!     let lock = NatsTaskLock::new(cluster_cron::kv::get_or_create_locks_bucket(&js).await.unwrap());
//!     let store = NatsCounterStore::new(cluster_cron::kv::get_or_create_counters_bucket(&js).await.unwrap());
//!
//!     let scheduler = ClusterScheduler::new(lock, store, SchedulerConfig::default());
//!     let trigger = TriggerSpec::cron("0 */5 * * * *").unwrap();
//!     let handle = scheduler
//!         .schedule(
//!             TaskDescriptor::new("ReportService", "generate", trigger),
//!             task_fn(|| async { Ok::<_, cluster_cron::TaskError>(()) }),
//!         )
//!         .unwrap();
//!
//!     tokio::time::sleep(Duration::from_secs(3600)).await;
//!     handle.cancel();
//!     scheduler.shutdown(Duration::from_secs(10)).await;
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod kv;
#[cfg(feature = "test-support")]
pub mod mocks;
pub mod nats_impls;
pub mod protocol;
pub mod scheduler;
pub mod task;
pub mod traits;
pub mod trigger;

pub use config::{SchedulerConfig, TaskLoggingConfig};
pub use error::SchedulerError;
pub use executor::{InstrumentedExecutor, TaskContext, TaskGaugesSnapshot};
pub use protocol::{ExecutionProtocol, TaskState};
pub use scheduler::ClusterScheduler;
pub use task::{TaskDescriptor, TaskError, TaskFn, TaskHandle, task_fn};
pub use traits::{AtomicCounterStore, DistributedLock};
pub use trigger::{TriggerContext, TriggerSpec};
