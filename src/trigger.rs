use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::SchedulerError;

/// Rolling record of a task's last scheduled/actual/completion times.
///
/// Owned by a single rescheduling task, never shared across processes.
#[derive(Debug, Clone, Default)]
pub struct TriggerContext {
    pub last_scheduled: Option<DateTime<Utc>>,
    pub last_actual: Option<DateTime<Utc>>,
    pub last_completion: Option<DateTime<Utc>>,
}

impl TriggerContext {
    pub fn update(
        &mut self,
        scheduled: DateTime<Utc>,
        actual: DateTime<Utc>,
        completion: DateTime<Utc>,
    ) {
        self.last_scheduled = Some(scheduled);
        self.last_actual = Some(actual);
        self.last_completion = Some(completion);
    }
}

#[derive(Debug, Clone)]
enum TriggerKind {
    Cron {
        expr: String,
        schedule: cron::Schedule,
    },
    Interval {
        period: Duration,
        /// First fire instant. `None` fires immediately on start, which means
        /// members started at different times run on different slot grids.
        start_at: Option<DateTime<Utc>>,
    },
}

/// Pure schedule function: computes the next fire instant from the trigger
/// context. Does no I/O.
#[derive(Debug, Clone)]
pub struct TriggerSpec {
    kind: TriggerKind,
}

impl TriggerSpec {
    /// 6-field cron expression ("0 */5 * * * *"), optional 7th year field.
    /// Invalid expressions are rejected here, at registration time.
    pub fn cron(expr: &str) -> Result<Self, SchedulerError> {
        let schedule =
            cron::Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidCronExpression {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            kind: TriggerKind::Cron {
                expr: expr.to_string(),
                schedule,
            },
        })
    }

    /// Fixed-period trigger. Fires immediately on start, then every `period`.
    pub fn interval(period: Duration) -> Self {
        Self {
            kind: TriggerKind::Interval {
                period,
                start_at: None,
            },
        }
    }

    /// Fixed-period trigger anchored at `start`. Members given the same anchor
    /// compute identical slot instants, so the cluster-wide claim tie-break
    /// applies to interval tasks exactly as it does to cron tasks.
    ///
    /// A member that starts after the anchor joins at the next grid point;
    /// elapsed slots are never replayed.
    pub fn interval_at(start: DateTime<Utc>, period: Duration) -> Self {
        Self {
            kind: TriggerKind::Interval {
                period,
                start_at: Some(start),
            },
        }
    }

    /// The source cron expression, if this is a cron trigger.
    pub fn cron_expression(&self) -> Option<&str> {
        match &self.kind {
            TriggerKind::Cron { expr, .. } => Some(expr),
            TriggerKind::Interval { .. } => None,
        }
    }

    /// Fixed period, if any. Feeds overrun detection in the executor.
    pub fn period(&self) -> Option<Duration> {
        match &self.kind {
            TriggerKind::Cron { .. } => None,
            TriggerKind::Interval { period, .. } => Some(*period),
        }
    }

    /// Next fire instant strictly after the last scheduled one (or now, if the
    /// task has never fired). `None` means the schedule is exhausted, which is
    /// terminal for the task.
    pub fn next_fire_time(&self, ctx: &TriggerContext) -> Option<DateTime<Utc>> {
        match &self.kind {
            TriggerKind::Cron { schedule, .. } => {
                let after = ctx.last_scheduled.unwrap_or_else(Utc::now);
                schedule.after(&after).next()
            }
            TriggerKind::Interval { period, start_at } => {
                let period = chrono::Duration::from_std(*period).ok()?;
                match (ctx.last_scheduled, start_at) {
                    (Some(last), _) => Some(last + period),
                    (None, Some(anchor)) => {
                        Some(first_grid_point_after(*anchor, period, Utc::now()))
                    }
                    (None, None) => Some(Utc::now()),
                }
            }
        }
    }
}

/// First instant on the anchor's grid strictly after `now`.
///
/// A member that starts (or restarts) after the anchor must not replay the
/// elapsed slots: arming a claim with a stale scheduled time would move the
/// cluster claim backwards and re-win slots the cluster already passed.
fn first_grid_point_after(
    anchor: DateTime<Utc>,
    period: chrono::Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if anchor > now {
        return anchor;
    }
    let period_us = period.num_microseconds().unwrap_or(i64::MAX).max(1);
    let elapsed_us = (now - anchor).num_microseconds().unwrap_or(0);
    let steps = elapsed_us / period_us + 1;
    anchor + chrono::Duration::microseconds(steps.saturating_mul(period_us))
}
