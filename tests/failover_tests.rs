//! Failover tests: crashed-holder takeover and mid-execution loss of
//! lease ownership.


use std::time::Duration;

use chrono::Utc;
use soloist::{CoordError, Exclusive, RunOutcome};
use test_harness::{assert_eventually, InvocationCounter, TestFleet};

/// Holder h1 acquires and crashes (stops renewing); once the lease
/// duration has passed, h2 acquires with a strictly greater fence token.
#[tokio::test]
async fn crashed_holder_is_superseded_after_expiry() {
    let fleet = TestFleet::frozen(Utc::now());
    let manager = fleet.lease_manager();
    let lease = Duration::from_secs(10);

    let fence1 = manager.try_acquire("daily-report", "h1", lease).await.unwrap();

    // h1 crashes at t=0: no renewals arrive. Just before expiry the
    // lease is still h1's.
    fleet.store.advance(lease - Duration::from_millis(1)).await;
    assert!(matches!(
        manager.try_acquire("daily-report", "h2", lease).await,
        Err(CoordError::LeaseDenied { .. })
    ));

    fleet.store.advance(Duration::from_millis(2)).await;
    let fence2 = manager.try_acquire("daily-report", "h2", lease).await.unwrap();
    assert!(fence2 > fence1, "takeover must advance the fence");
}

/// At the runner level: a crashed worker's lease lapses and a healthy
/// worker completes the occurrence exactly once.
#[tokio::test]
async fn healthy_worker_takes_over_after_crash() {
    let fleet = TestFleet::new();
    let lease = fleet.config.lease_duration;

    // Simulate h1 crashing right after acquisition, before it could
    // open a ledger record.
    let manager = fleet.lease_manager();
    manager.try_acquire("job", "h1-crashed", lease).await.unwrap();

    let h2 = fleet.runner("h2");
    let counter = InvocationCounter::new();

    // While h1's lease is live, h2 is not the leader.
    let c = counter.clone();
    let outcome = h2
        .execute("job", "occurrence-1", |_cancel| async move {
            c.record();
            Ok(())
        })
        .await
        .unwrap();
    assert!(outcome.is_skipped());
    assert_eq!(counter.count(), 0);

    // After expiry, h2 wins the lease and runs the business logic.
    let store = fleet.store.clone();
    assert_eventually(
        || {
            let store = store.clone();
            async move {
                match store.lease_snapshot("job").await {
                    Some(lease) => lease.is_expired_at(chrono::Utc::now()),
                    None => false,
                }
            }
        },
        lease * 3,
        "crashed holder's lease should lapse",
    )
    .await;

    let c = counter.clone();
    let outcome = h2
        .execute("job", "occurrence-1", |_cancel| async move {
            c.record();
            Ok(())
        })
        .await
        .unwrap();
    assert!(outcome.is_completed());
    assert_eq!(counter.count(), 1);
}

/// Renewal failure mid-execution fires the cancellation signal, the
/// cycle surfaces LeadershipLost, and no second holder gets admitted for
/// the same execution key while the first record is fresh.
#[tokio::test]
async fn renewal_loss_cancels_work_without_double_admission() {
    let fleet = TestFleet::new();
    let h1 = fleet.runner("h1");
    let h2 = fleet.runner("h2");

    let h2_counter = InvocationCounter::new();

    let store = fleet.store.clone();
    let h2_ref = &h2;
    let h2_c = h2_counter.clone();

    let result = h1
        .execute("job", "occurrence-1", |cancel| async move {
            // The lease expires out from under h1 (renewal latency spike).
            store.expire_lease("job").await;

            // The renewal loop must notice and revoke authority.
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    panic!("cancellation signal never fired");
                }
            }

            // A rival that now wins the lease must still be refused by
            // the ledger: the Started record is fresh, not stale.
            let c = h2_c.clone();
            let rival = h2_ref
                .execute("job", "occurrence-1", |_cancel| async move {
                    c.record();
                    Ok(())
                })
                .await
                .unwrap();
            assert!(rival.is_skipped());

            Err("stopping on revoked authority".into())
        })
        .await;

    assert!(matches!(result, Err(CoordError::LeadershipLost(_))));
    assert_eq!(h2_counter.count(), 0, "no concurrent second admission");
}

/// Work that finishes before any renewal failure is a completed cycle;
/// a loss detected afterwards does not rewrite history.
#[tokio::test]
async fn loss_after_completion_is_not_surfaced() {
    let fleet = TestFleet::new();
    let coord = fleet.coordinator("h1");

    let result = coord
        .run_exclusive("job", |guard| async move { guard.fence_token() })
        .await
        .unwrap();

    assert!(matches!(result, Exclusive::Completed(1)));
}

/// A store outage during a cycle is a hard failure of that cycle, never
/// silently retried by the core.
#[tokio::test]
async fn store_outage_fails_the_cycle() {
    let fleet = TestFleet::new();
    let runner = fleet.runner("h1");
    let counter = InvocationCounter::new();

    fleet.store.set_offline(true).await;
    let c = counter.clone();
    let result = runner
        .execute("job", "occurrence-1", |_cancel| async move {
            c.record();
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(CoordError::Store(_))));
    assert_eq!(counter.count(), 0);

    // Once the store is back, the same key runs normally.
    fleet.store.set_offline(false).await;
    let c = counter.clone();
    let outcome = runner
        .execute("job", "occurrence-1", |_cancel| async move {
            c.record();
            Ok(())
        })
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed));
    assert_eq!(counter.count(), 1);
}
