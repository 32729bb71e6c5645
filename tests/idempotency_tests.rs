//! Execution-ledger tests: admission classification, once-only
//! completion, stale-record takeover, double finalization.


use std::time::Duration;

use chrono::Utc;
use soloist::{Admission, ExecutionState};
use test_harness::{InvocationCounter, TestFleet};

/// Repeated begin calls for one key admit exactly one caller.
#[tokio::test]
async fn begin_admits_first_caller_only() {
    let fleet = TestFleet::new();
    let ledger = fleet.ledger();

    assert_eq!(
        ledger.begin_execution("job", "k1", 1).await.unwrap(),
        Admission::Admitted
    );
    assert_eq!(
        ledger.begin_execution("job", "k1", 2).await.unwrap(),
        Admission::AlreadyInProgress
    );
    assert_eq!(
        ledger.begin_execution("job", "k1", 3).await.unwrap(),
        Admission::AlreadyInProgress
    );
}

/// Concurrent begins race the conditional insert; exactly one wins.
#[tokio::test]
async fn concurrent_begins_admit_exactly_one() {
    let fleet = TestFleet::new();
    let l1 = fleet.ledger();
    let l2 = fleet.ledger();

    let (r1, r2) = tokio::join!(
        l1.begin_execution("job", "k1", 1),
        l2.begin_execution("job", "k1", 2),
    );

    let admitted = [r1.unwrap(), r2.unwrap()]
        .iter()
        .filter(|a| **a == Admission::Admitted)
        .count();
    assert_eq!(admitted, 1);
}

/// Per key there is at most one Completed transition, no matter how many
/// finalization attempts arrive.
#[tokio::test]
async fn at_most_one_completed_transition() {
    let fleet = TestFleet::new();
    let ledger = fleet.ledger();

    ledger.begin_execution("job", "k1", 1).await.unwrap();

    assert!(ledger
        .finish_execution("job", "k1", ExecutionState::Completed, 1)
        .await
        .unwrap());
    // Double finalization is a no-op, in either direction.
    assert!(!ledger
        .finish_execution("job", "k1", ExecutionState::Completed, 1)
        .await
        .unwrap());
    assert!(!ledger
        .finish_execution("job", "k1", ExecutionState::Failed, 1)
        .await
        .unwrap());

    let record = fleet.store.record_snapshot("job", "k1").await.unwrap();
    assert_eq!(record.state, ExecutionState::Completed);
}

/// Finalizing a key that was never begun is a tolerated no-op.
#[tokio::test]
async fn finish_without_record_is_noop() {
    let fleet = TestFleet::new();
    let ledger = fleet.ledger();

    assert!(!ledger
        .finish_execution("job", "missing", ExecutionState::Completed, 1)
        .await
        .unwrap());
    assert!(fleet.store.record_snapshot("job", "missing").await.is_none());
}

/// A second, later leader observes AlreadyInProgress while the first
/// attempt is live and AlreadyCompleted once it finished.
#[tokio::test]
async fn later_leader_sees_progress_then_completion() {
    let fleet = TestFleet::new();
    let ledger = fleet.ledger();
    let key = "2026-02-28T02:00:00Z";

    assert_eq!(
        ledger.begin_execution("job", key, 5).await.unwrap(),
        Admission::Admitted
    );
    assert_eq!(
        ledger.begin_execution("job", key, 7).await.unwrap(),
        Admission::AlreadyInProgress
    );

    ledger
        .finish_execution("job", key, ExecutionState::Completed, 5)
        .await
        .unwrap();
    assert_eq!(
        ledger.begin_execution("job", key, 7).await.unwrap(),
        Admission::AlreadyCompleted
    );
}

/// A Failed key is terminal too: retries use a fresh key.
#[tokio::test]
async fn failed_key_is_terminal() {
    let fleet = TestFleet::new();
    let ledger = fleet.ledger();

    ledger.begin_execution("job", "k1", 1).await.unwrap();
    ledger
        .finish_execution("job", "k1", ExecutionState::Failed, 1)
        .await
        .unwrap();

    assert_eq!(
        ledger.begin_execution("job", "k1", 2).await.unwrap(),
        Admission::AlreadyCompleted
    );
    // The fresh retry key is wide open.
    assert_eq!(
        ledger.begin_execution("job", "k1-attempt-2", 2).await.unwrap(),
        Admission::Admitted
    );
}

/// A Started record older than the staleness threshold is presumed
/// abandoned and taken over; the new owner's fence is recorded.
#[tokio::test]
async fn stale_started_record_is_taken_over() {
    let fleet = TestFleet::frozen(Utc::now());
    let ledger = fleet.ledger();
    let threshold = fleet.config.staleness_threshold();

    ledger.begin_execution("job", "k1", 5).await.unwrap();

    // Just under the threshold: still considered in progress.
    fleet.store.advance(threshold - Duration::from_millis(1)).await;
    assert_eq!(
        ledger.begin_execution("job", "k1", 7).await.unwrap(),
        Admission::AlreadyInProgress
    );

    // Past it: the record is abandoned, a new leader takes over.
    fleet.store.advance(Duration::from_millis(2)).await;
    assert_eq!(
        ledger.begin_execution("job", "k1", 7).await.unwrap(),
        Admission::Admitted
    );

    let record = fleet.store.record_snapshot("job", "k1").await.unwrap();
    assert_eq!(record.owner_fence_token, 7);
    assert_eq!(record.state, ExecutionState::Started);
}

/// Once a stale record has been taken over, the original owner cannot
/// finalize it: its fence no longer matches, and only the takeover
/// owner's finalization lands.
#[tokio::test]
async fn deposed_owner_cannot_finalize_takeover() {
    let fleet = TestFleet::frozen(Utc::now());
    let ledger = fleet.ledger();

    ledger.begin_execution("job", "k1", 5).await.unwrap();
    fleet
        .store
        .advance(fleet.config.staleness_threshold() + Duration::from_millis(1))
        .await;
    assert_eq!(
        ledger.begin_execution("job", "k1", 7).await.unwrap(),
        Admission::Admitted
    );

    // The fence-5 holder wakes up late and tries to settle the key.
    assert!(!ledger
        .finish_execution("job", "k1", ExecutionState::Completed, 5)
        .await
        .unwrap());
    let record = fleet.store.record_snapshot("job", "k1").await.unwrap();
    assert_eq!(record.state, ExecutionState::Started);
    assert_eq!(record.owner_fence_token, 7);

    // The current owner still can.
    assert!(ledger
        .finish_execution("job", "k1", ExecutionState::Completed, 7)
        .await
        .unwrap());
}

/// End to end: executing the same key twice runs the business logic
/// exactly once; the second invocation is a skip.
#[tokio::test]
async fn execute_twice_runs_business_once() {
    let fleet = TestFleet::new();
    let runner = fleet.runner("h1");
    let counter = InvocationCounter::new();

    let c = counter.clone();
    let first = runner
        .execute("job", "occurrence-1", |_cancel| async move {
            c.record();
            Ok(())
        })
        .await
        .unwrap();
    assert!(first.is_completed());

    let c = counter.clone();
    let second = runner
        .execute("job", "occurrence-1", |_cancel| async move {
            c.record();
            Ok(())
        })
        .await
        .unwrap();
    assert!(second.is_skipped());

    assert_eq!(counter.count(), 1, "business logic must run exactly once");
}
