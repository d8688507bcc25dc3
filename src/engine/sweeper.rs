//! Lifecycle sweeper: periodic, timer-driven aging of tasks.
//!
//! Each tick runs two bulk conditional transitions against fresh cutoffs:
//!
//! 1. expire: `OPEN` tasks created at least 24h ago become `EXPIRED`;
//! 2. reopen: `IN_PROGRESS` tasks claimed at least 48h ago go back to `OPEN`.
//!
//! Audit entries are emitted for exactly the ids the store reports as
//! changed by each bulk update, never for a second query's results. The
//! loop is serial, so ticks never overlap; a failed tick is logged and the
//! next one starts from scratch.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info};

use crate::audit::AuditTrail;
use crate::clock::Clock;
use crate::error::Result;
use crate::model::{AuditAction, AuditActor, AuditLogEntry, Status, TaskId};
use crate::ratelimit::RateLimiter;
use crate::store::{ReleasedClaim, TaskStore};
use crate::telemetry::metrics;

/// Sweep timing.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Time between ticks. Operational; unrelated to the cutoffs.
    pub interval: std::time::Duration,
    /// Age after which an unclaimed task expires.
    pub expire_after: Duration,
    /// Claim age after which an uncompleted task is reopened.
    pub reopen_after: Duration,
}

impl LifecycleConfig {
    pub const EXPIRE_AFTER_HOURS: i64 = 24;
    pub const REOPEN_AFTER_HOURS: i64 = 48;

    pub fn with_interval(interval: std::time::Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            interval: std::time::Duration::from_secs(60),
            expire_after: Duration::hours(Self::EXPIRE_AFTER_HOURS),
            reopen_after: Duration::hours(Self::REOPEN_AFTER_HOURS),
        }
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub expired: Vec<TaskId>,
    pub reopened: Vec<ReleasedClaim>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.reopened.is_empty()
    }
}

#[derive(Clone)]
pub struct LifecycleSweeper {
    store: Arc<dyn TaskStore>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    limiter: Option<Arc<RateLimiter>>,
    shutdown: Arc<Notify>,
}

impl LifecycleSweeper {
    pub fn new(
        store: Arc<dyn TaskStore>,
        audit: AuditTrail,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            config,
            limiter: None,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Also drop idle rate-limit windows on every tick.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Signal the sweeper loop to stop after the current tick.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Tick on the configured interval until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs(),
            "lifecycle sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("lifecycle sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.tick().await {
                Ok(report) if report.is_empty() => {}
                Ok(report) => info!(
                    expired = report.expired.len(),
                    reopened = report.reopened.len(),
                    "sweep tick applied transitions"
                ),
                Err(e) => error!("sweep tick failed, retrying next interval: {e}"),
            }
        }
    }

    /// Run one sweep now.
    pub async fn tick(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let now = self.clock.now();
        let span = tracing::info_span!("lifecycle.sweep", "sweep.now" = %now);

        let result = self.sweep(now).instrument(span).await;

        if let Some(ref limiter) = self.limiter {
            let purged = limiter.purge_expired();
            if purged > 0 {
                debug!(purged, "dropped idle rate-limit windows");
            }
        }

        let label = if result.is_ok() { "ok" } else { "error" };
        metrics::sweep_ticks().add(1, &[KeyValue::new("result", label)]);
        metrics::sweep_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[]);
        result
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self
            .store
            .expire_open(now - self.config.expire_after, now)
            .await?;
        let expire_details = format!(
            "Task expired automatically after {} hours",
            self.config.expire_after.num_hours()
        );
        for id in &expired {
            self.audit.record(AuditLogEntry::for_task(
                AuditAction::TaskExpired,
                AuditActor::System,
                *id,
                expire_details.clone(),
                now,
            ));
        }
        count_transitions(expired.len(), Status::Open, Status::Expired);

        let reopened = self
            .store
            .release_stale(now - self.config.reopen_after, now)
            .await?;
        for claim in &reopened {
            self.audit.record(AuditLogEntry::for_task(
                AuditAction::TaskReassigned,
                AuditActor::System,
                claim.id,
                format!(
                    "Task reopened automatically after {} hours stale (was held by {})",
                    self.config.reopen_after.num_hours(),
                    claim.previous_owner
                ),
                now,
            ));
        }
        count_transitions(reopened.len(), Status::InProgress, Status::Open);

        Ok(SweepReport { expired, reopened })
    }
}

fn count_transitions(n: usize, from: Status, to: Status) {
    if n > 0 {
        metrics::task_state_transitions().add(
            n as u64,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", to.as_str()),
            ],
        );
    }
}
