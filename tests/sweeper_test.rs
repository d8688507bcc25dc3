//! Integration tests for the lifecycle sweeper.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use cosmos_tasks::audit::AuditTrail;
use cosmos_tasks::clock::{Clock, ManualClock};
use cosmos_tasks::engine::{LifecycleConfig, LifecycleSweeper};
use cosmos_tasks::error::{Error, Result};
use cosmos_tasks::model::*;
use cosmos_tasks::store::{ClaimOutcome, MemoryStore, ReleasedClaim, TaskFilter, TaskStore};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

struct Fixture {
    store: Arc<MemoryStore>,
    audit: AuditTrail,
    clock: Arc<ManualClock>,
    sweeper: LifecycleSweeper,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let audit = AuditTrail::spawn(store.clone());
    let clock = Arc::new(ManualClock::new(t0()));
    let sweeper = LifecycleSweeper::new(
        store.clone(),
        audit.clone(),
        clock.clone(),
        LifecycleConfig::default(),
    );
    Fixture {
        store,
        audit,
        clock,
        sweeper,
    }
}

async fn open_task(f: &Fixture, title: &str) -> TaskId {
    let task = Task::open(NewTask::new("apollo", title), f.clock.now(), Duration::hours(24));
    f.store.insert(&task).await.unwrap();
    task.id
}

async fn claim(f: &Fixture, id: TaskId, user: &str) {
    let outcome = f
        .store
        .claim(id, &UserId::new(user), f.clock.now(), 2)
        .await
        .unwrap();
    assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
}

async fn status(f: &Fixture, id: TaskId) -> Status {
    f.store.get(id).await.unwrap().unwrap().status()
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unclaimed_task_expires_after_24_hours() {
    let f = fixture();
    let id = open_task(&f, "survey").await;

    f.clock.advance(Duration::hours(25));
    let report = f.sweeper.tick().await.unwrap();
    assert_eq!(report.expired, vec![id]);
    assert!(report.reopened.is_empty());

    let task = f.store.get(id).await.unwrap().unwrap();
    assert_eq!(task.status(), Status::Expired);
    assert_eq!(task.assigned_to(), None);
    assert_eq!(task.updated_at, t0() + Duration::hours(25));

    f.audit.flush().await;
    let entries = f.store.audit_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::TaskExpired);
    assert!(entries[0].is_system());
    assert_eq!(entries[0].resource_id, id.to_string());
    assert_eq!(entries[0].details, "Task expired automatically after 24 hours");
}

#[tokio::test]
async fn young_task_is_left_open() {
    let f = fixture();
    let id = open_task(&f, "survey").await;

    f.clock.advance(Duration::hours(24) - Duration::seconds(1));
    let report = f.sweeper.tick().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(status(&f, id).await, Status::Open);
}

#[tokio::test]
async fn expiry_cutoff_is_inclusive() {
    let f = fixture();
    let id = open_task(&f, "survey").await;

    f.clock.advance(Duration::hours(24));
    let report = f.sweeper.tick().await.unwrap();
    assert_eq!(report.expired, vec![id]);
}

#[tokio::test]
async fn second_sweep_changes_nothing() {
    let f = fixture();
    open_task(&f, "a").await;
    open_task(&f, "b").await;

    f.clock.advance(Duration::hours(30));
    let first = f.sweeper.tick().await.unwrap();
    assert_eq!(first.expired.len(), 2);

    let second = f.sweeper.tick().await.unwrap();
    assert!(second.is_empty());

    f.audit.flush().await;
    assert_eq!(f.store.audit_entries().await.len(), 2);
}

#[tokio::test]
async fn claimed_task_is_not_expired() {
    let f = fixture();
    let id = open_task(&f, "survey").await;

    f.clock.advance(Duration::hours(23));
    claim(&f, id, "u1").await;

    f.clock.advance(Duration::hours(2));
    let report = f.sweeper.tick().await.unwrap();
    assert!(report.expired.is_empty());
    assert_eq!(status(&f, id).await, Status::InProgress);
}

// ---------------------------------------------------------------------------
// Stale-claim reopen
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stale_claim_is_reopened_after_48_hours() {
    let f = fixture();
    let id = open_task(&f, "survey").await;
    claim(&f, id, "u1").await;

    f.clock.advance(Duration::hours(49));
    let report = f.sweeper.tick().await.unwrap();
    assert!(report.expired.is_empty());
    assert_eq!(
        report.reopened,
        vec![ReleasedClaim {
            id,
            previous_owner: UserId::new("u1"),
        }]
    );

    let task = f.store.get(id).await.unwrap().unwrap();
    assert_eq!(task.status(), Status::Open);
    assert_eq!(task.assigned_to(), None);
    assert_eq!(task.claimed_at(), None);

    f.audit.flush().await;
    let entries = f.store.audit_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::TaskReassigned);
    assert!(entries[0].is_system());
    assert!(entries[0].details.starts_with("Task reopened automatically after 48 hours stale"));
    assert!(entries[0].details.contains("u1"));
}

#[tokio::test]
async fn fresh_claim_is_kept() {
    let f = fixture();
    let id = open_task(&f, "survey").await;
    f.clock.advance(Duration::hours(10));
    claim(&f, id, "u1").await;

    f.clock.advance(Duration::hours(47));
    let report = f.sweeper.tick().await.unwrap();
    assert!(report.reopened.is_empty());
    assert_eq!(status(&f, id).await, Status::InProgress);
}

#[tokio::test]
async fn reopened_task_past_its_lifetime_expires_next_tick() {
    let f = fixture();
    let id = open_task(&f, "survey").await;
    claim(&f, id, "u1").await;

    f.clock.advance(Duration::hours(49));
    let first = f.sweeper.tick().await.unwrap();
    assert_eq!(first.reopened.len(), 1);
    assert!(first.expired.is_empty());

    let second = f.sweeper.tick().await.unwrap();
    assert_eq!(second.expired, vec![id]);
    assert_eq!(status(&f, id).await, Status::Expired);
}

#[tokio::test]
async fn completed_tasks_are_never_swept() {
    let f = fixture();
    let id = open_task(&f, "survey").await;
    claim(&f, id, "u1").await;
    f.store
        .complete(id, &UserId::new("u1"), f.clock.now())
        .await
        .unwrap()
        .unwrap();

    f.clock.advance(Duration::days(30));
    let report = f.sweeper.tick().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(status(&f, id).await, Status::Completed);
}

// ---------------------------------------------------------------------------
// Audit exactness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_entries_match_exactly_the_changed_tasks() {
    let f = fixture();
    let old_open = open_task(&f, "old-open").await;
    let old_claimed = open_task(&f, "old-claimed").await;
    claim(&f, old_claimed, "u1").await;

    f.clock.advance(Duration::hours(30));
    let young_open = open_task(&f, "young-open").await;
    let young_claimed = open_task(&f, "young-claimed").await;
    claim(&f, young_claimed, "u2").await;

    f.clock.advance(Duration::hours(20));
    let report = f.sweeper.tick().await.unwrap();
    assert_eq!(report.expired, vec![old_open]);
    assert_eq!(report.reopened.len(), 1);
    assert_eq!(report.reopened[0].id, old_claimed);

    f.audit.flush().await;
    let entries = f.store.audit_entries().await;
    let expired: BTreeSet<String> = entries
        .iter()
        .filter(|e| e.action == AuditAction::TaskExpired)
        .map(|e| e.resource_id.clone())
        .collect();
    let reopened: BTreeSet<String> = entries
        .iter()
        .filter(|e| e.action == AuditAction::TaskReassigned)
        .map(|e| e.resource_id.clone())
        .collect();
    assert_eq!(expired, BTreeSet::from([old_open.to_string()]));
    assert_eq!(reopened, BTreeSet::from([old_claimed.to_string()]));

    assert_eq!(status(&f, young_open).await, Status::Open);
    assert_eq!(status(&f, young_claimed).await, Status::InProgress);

    // Tasks swept on earlier runs must not be re-audited.
    let filter = TaskFilter::default().status(Status::Expired);
    assert_eq!(f.store.count(&filter).await.unwrap(), 1);
    f.sweeper.tick().await.unwrap();
    f.audit.flush().await;
    let expired_entries = f
        .store
        .audit_entries()
        .await
        .into_iter()
        .filter(|e| e.action == AuditAction::TaskExpired && e.resource_id == old_open.to_string())
        .count();
    assert_eq!(expired_entries, 1);
}

// ---------------------------------------------------------------------------
// Failure and loop control
// ---------------------------------------------------------------------------

/// Delegates to a [`MemoryStore`] but can be told to fail bulk updates.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing: AtomicBool,
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        self.inner.insert(task).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: TaskId) -> Result<bool> {
        self.inner.delete(id).await
    }

    async fn list(&self, filter: &TaskFilter, offset: u64, limit: u64) -> Result<Vec<Task>> {
        self.inner.list(filter, offset, limit).await
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64> {
        self.inner.count(filter).await
    }

    async fn claim(
        &self,
        id: TaskId,
        user: &UserId,
        now: DateTime<Utc>,
        max_active: u32,
    ) -> Result<ClaimOutcome> {
        self.inner.claim(id, user, now, max_active).await
    }

    async fn complete(
        &self,
        id: TaskId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        self.inner.complete(id, user, now).await
    }

    async fn expire_open(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<TaskId>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Other("store unavailable".to_string()));
        }
        self.inner.expire_open(cutoff, now).await
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReleasedClaim>> {
        self.inner.release_stale(cutoff, now).await
    }
}

#[tokio::test]
async fn failed_tick_reports_error_and_next_tick_recovers() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        failing: AtomicBool::new(true),
    });
    let audit = AuditTrail::spawn(inner.clone());
    let clock = Arc::new(ManualClock::new(t0()));
    let sweeper = LifecycleSweeper::new(
        store.clone(),
        audit.clone(),
        clock.clone(),
        LifecycleConfig::default(),
    );

    let task = Task::open(NewTask::new("apollo", "survey"), t0(), Duration::hours(24));
    inner.insert(&task).await.unwrap();
    clock.advance(Duration::hours(25));

    assert!(sweeper.tick().await.is_err());
    assert_eq!(inner.get(task.id).await.unwrap().unwrap().status(), Status::Open);

    store.failing.store(false, Ordering::SeqCst);
    let report = sweeper.tick().await.unwrap();
    assert_eq!(report.expired, vec![task.id]);

    audit.flush().await;
    assert_eq!(inner.audit_entries().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_sweeps_until_shutdown() {
    let f = fixture();
    let id = open_task(&f, "survey").await;
    f.clock.advance(Duration::hours(25));

    let sweeper = f.sweeper.clone();
    let handle = tokio::spawn(async move { sweeper.run().await });

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(status(&f, id).await, Status::Expired);

    f.sweeper.shutdown();
    handle.await.unwrap();
}
