//! Integration tests for claim and complete.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use cosmos_tasks::audit::AuditTrail;
use cosmos_tasks::clock::{Clock, ManualClock};
use cosmos_tasks::engine::{ClaimConfig, ClaimCoordinator};
use cosmos_tasks::error::{Error, ErrorKind};
use cosmos_tasks::model::*;
use cosmos_tasks::store::{MemoryStore, TaskStore};

struct Fixture {
    store: Arc<MemoryStore>,
    audit: AuditTrail,
    clock: Arc<ManualClock>,
    coordinator: ClaimCoordinator,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let audit = AuditTrail::spawn(store.clone());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    ));
    let coordinator = ClaimCoordinator::new(
        store.clone(),
        audit.clone(),
        clock.clone(),
        ClaimConfig::default(),
    );
    Fixture {
        store,
        audit,
        clock,
        coordinator,
    }
}

fn user(id: &str) -> Actor {
    Actor::new(id, format!("{id}@example.com"), Role::User)
}

async fn open_task(f: &Fixture, title: &str) -> TaskId {
    let task = Task::open(
        NewTask::new("apollo", title),
        f.clock.now(),
        Duration::hours(24),
    );
    f.store.insert(&task).await.unwrap();
    task.id
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_moves_open_task_to_in_progress() {
    let f = fixture();
    let id = open_task(&f, "survey").await;

    let task = f.coordinator.claim(id, &user("u1")).await.unwrap();
    assert_eq!(task.status(), Status::InProgress);
    assert_eq!(task.assigned_to(), Some(&UserId::new("u1")));
    assert_eq!(task.claimed_at(), Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()));

    f.audit.flush().await;
    let entries = f.store.audit_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::TaskClaimed);
    assert_eq!(entries[0].resource_id, id.to_string());
    assert_eq!(entries[0].resource_type, "Task");
    assert!(matches!(
        entries[0].actor,
        AuditActor::User { ref user_id, .. } if user_id.as_str() == "u1"
    ));
}

#[tokio::test]
async fn claim_unknown_task_is_not_found() {
    let f = fixture();
    let err = f
        .coordinator
        .claim(TaskId::new(), &user("u1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn claim_taken_task_is_conflict() {
    let f = fixture();
    let id = open_task(&f, "survey").await;

    f.coordinator.claim(id, &user("u1")).await.unwrap();
    let err = f.coordinator.claim(id, &user("u2")).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(conflicted) if conflicted == id));
    assert_eq!(err.kind().http_status(), 409);

    let task = f.store.get(id).await.unwrap().unwrap();
    assert_eq!(task.assigned_to(), Some(&UserId::new("u1")));
}

#[tokio::test]
async fn claim_expired_task_is_conflict() {
    let f = fixture();
    let id = open_task(&f, "stale").await;
    let task = f.store.get(id).await.unwrap().unwrap();
    f.store
        .put(task.expired(task.created_at, task.created_at).unwrap())
        .await;

    let err = f.coordinator.claim(id, &user("u1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_exactly_one_winner() {
    let f = fixture();
    let id = open_task(&f, "contested").await;

    let mut handles = Vec::new();
    for n in 0..16 {
        let coordinator = f.coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.claim(id, &user(&format!("u{n}"))).await
        }));
    }

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(task) => winners.push(task),
            Err(Error::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, 15);

    let stored = f.store.get(id).await.unwrap().unwrap();
    assert_eq!(stored.assigned_to(), winners[0].assigned_to());

    f.audit.flush().await;
    let claimed: Vec<_> = f
        .store
        .audit_entries()
        .await
        .into_iter()
        .filter(|e| e.action == AuditAction::TaskClaimed)
        .collect();
    assert_eq!(claimed.len(), 1);
}

// ---------------------------------------------------------------------------
// Active-claim limit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn third_claim_exceeds_limit_and_writes_nothing() {
    let f = fixture();
    let a = open_task(&f, "a").await;
    let b = open_task(&f, "b").await;
    let c = open_task(&f, "c").await;
    let u1 = user("u1");

    f.coordinator.claim(a, &u1).await.unwrap();
    f.coordinator.claim(b, &u1).await.unwrap();

    let err = f.coordinator.claim(c, &u1).await.unwrap_err();
    match err {
        Error::LimitExceeded { user, active, limit } => {
            assert_eq!(user, UserId::new("u1"));
            assert_eq!(active, 2);
            assert_eq!(limit, 2);
        }
        other => panic!("expected LimitExceeded, got {other}"),
    }

    let untouched = f.store.get(c).await.unwrap().unwrap();
    assert_eq!(untouched.status(), Status::Open);
    assert_eq!(untouched.assigned_to(), None);

    f.audit.flush().await;
    assert_eq!(f.store.audit_entries().await.len(), 2);
}

#[tokio::test]
async fn completing_frees_a_claim_slot() {
    let f = fixture();
    let a = open_task(&f, "a").await;
    let b = open_task(&f, "b").await;
    let c = open_task(&f, "c").await;
    let u1 = user("u1");

    f.coordinator.claim(a, &u1).await.unwrap();
    f.coordinator.claim(b, &u1).await.unwrap();
    f.coordinator.complete(a, &u1).await.unwrap();

    assert_eq!(f.coordinator.guard().count_active(&u1.user_id).await.unwrap(), 1);
    f.coordinator.claim(c, &u1).await.unwrap();
}

#[tokio::test]
async fn limit_is_per_user() {
    let f = fixture();
    let ids = [
        open_task(&f, "a").await,
        open_task(&f, "b").await,
        open_task(&f, "c").await,
    ];

    f.coordinator.claim(ids[0], &user("u1")).await.unwrap();
    f.coordinator.claim(ids[1], &user("u1")).await.unwrap();
    f.coordinator.claim(ids[2], &user("u2")).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_by_one_user_respect_limit() {
    let f = fixture();
    let mut ids = Vec::new();
    for n in 0..8 {
        ids.push(open_task(&f, &format!("t{n}")).await);
    }

    let mut handles = Vec::new();
    for id in ids {
        let coordinator = f.coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.claim(id, &user("greedy")).await
        }));
    }

    let mut claimed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => claimed += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::LimitExceeded),
        }
    }
    assert_eq!(claimed, 2);

    let active = f
        .store
        .count_active(&UserId::new("greedy"))
        .await
        .unwrap();
    assert_eq!(active, 2);
}

// ---------------------------------------------------------------------------
// Complete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn owner_completes_task() {
    let f = fixture();
    let id = open_task(&f, "survey").await;
    let u1 = user("u1");
    f.coordinator.claim(id, &u1).await.unwrap();
    f.clock.advance(Duration::hours(3));

    let task = f.coordinator.complete(id, &u1).await.unwrap();
    assert_eq!(task.status(), Status::Completed);
    assert_eq!(task.assigned_to(), Some(&UserId::new("u1")));
    assert_eq!(task.claimed_at(), None);
    assert_eq!(
        task.completed_at(),
        Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    );

    f.audit.flush().await;
    let actions: Vec<_> = f
        .store
        .audit_entries()
        .await
        .iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, vec![AuditAction::TaskClaimed, AuditAction::TaskCompleted]);
}

#[tokio::test]
async fn non_owner_cannot_complete() {
    let f = fixture();
    let id = open_task(&f, "survey").await;
    f.coordinator.claim(id, &user("u1")).await.unwrap();

    let err = f.coordinator.complete(id, &user("u2")).await.unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(failed) if failed == id));
    assert_eq!(err.kind().http_status(), 412);

    let task = f.store.get(id).await.unwrap().unwrap();
    assert_eq!(task.status(), Status::InProgress);
    assert_eq!(task.assigned_to(), Some(&UserId::new("u1")));

    f.audit.flush().await;
    assert_eq!(f.store.audit_entries().await.len(), 1);
}

#[tokio::test]
async fn complete_requires_in_progress() {
    let f = fixture();
    let id = open_task(&f, "survey").await;

    let err = f.coordinator.complete(id, &user("u1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    let err = f
        .coordinator
        .complete(TaskId::new(), &user("u1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn completed_task_cannot_be_completed_again() {
    let f = fixture();
    let id = open_task(&f, "survey").await;
    let u1 = user("u1");
    f.coordinator.claim(id, &u1).await.unwrap();
    f.coordinator.complete(id, &u1).await.unwrap();

    let err = f.coordinator.complete(id, &u1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}
