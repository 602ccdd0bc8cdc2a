use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::error::Error;
use crate::testkit::config as cfg;
use crate::testkit::connector::MockConnector;
use crate::testkit::events::RecordingSink;
use crate::testkit::make_pool;
use crate::testkit::txn::MapTransactionContext;
use crate::txn::NoTransactions;

fn pool_with(config: PoolConfig, connector: &MockConnector) -> Arc<ConnectionPool> {
    make_pool(
        "orders",
        config,
        &cfg::groomer(),
        Arc::new(connector.clone()),
        Arc::new(crate::events::NullEventSink),
    )
}

#[tokio::test]
async fn checkout_creates_inline_and_checkin_returns_to_free() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(1, 4), &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    assert_eq!(pool.active_len(), 1);
    assert_eq!(pool.free_len(), 0);
    assert_eq!(connector.connects(), 1);

    pool.checkin(&conn).await.unwrap();
    assert_eq!(pool.active_len(), 0);
    assert_eq!(pool.free_len(), 1);

    // Reuse instead of reconnecting.
    let again = pool.checkout(&NoTransactions).await.unwrap();
    assert_eq!(again.id(), conn.id());
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn checkout_fails_fast_at_max_connections() {
    let connector = MockConnector::new();
    let mut config = cfg::pool(1, 2);
    // No spike bumps: keep the live count deterministic.
    config.extra_capacity = 0;
    config.aging_headroom = Some(0);
    let pool = pool_with(config, &connector);

    let _a = pool.checkout(&NoTransactions).await.unwrap();
    let _b = pool.checkout(&NoTransactions).await.unwrap();
    let err = pool.checkout(&NoTransactions).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Pool(PoolError::CapacityExceeded { current: 2, max: 2, .. })
    ));
}

#[tokio::test]
async fn concurrent_checkouts_never_overshoot_max() {
    let connector = MockConnector::new();
    // Slow connects keep all four creations in flight at once.
    connector.set_connect_delay(Duration::from_millis(50));
    let mut config = cfg::pool(1, 2);
    config.extra_capacity = 0;
    config.aging_headroom = Some(0);
    let pool = pool_with(config, &connector);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move { pool.checkout_pooled().await }));
    }
    let mut granted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => granted += 1,
            Err(e) => assert!(matches!(
                e,
                Error::Pool(PoolError::CapacityExceeded { max: 2, .. })
            )),
        }
    }

    assert_eq!(granted, 2);
    assert_eq!(pool.live_count(), 2);
    assert_eq!(pool.active_len(), 2);
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn connect_failure_surfaces_as_connect_error() {
    let connector = MockConnector::new();
    connector.fail_next_connects(1);
    let pool = pool_with(cfg::pool(1, 4), &connector);

    let err = pool.checkout(&NoTransactions).await.unwrap_err();
    assert!(matches!(err, Error::Pool(PoolError::Connect { .. })));
    assert_eq!(pool.live_count(), 0);

    // The next attempt is not poisoned.
    assert!(pool.checkout(&NoTransactions).await.is_ok());
}

#[tokio::test]
async fn dirty_connection_rolls_back_on_checkin() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(1, 4), &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    conn.touch_statement(true);
    assert!(conn.is_dirty());

    pool.checkin(&conn).await.unwrap();
    assert_eq!(connector.rollbacks(), 1);
    assert!(!conn.is_dirty());
    assert_eq!(pool.free_len(), 1);
}

#[tokio::test]
async fn failed_rollback_on_checkin_destroys_instead_of_propagating() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(1, 4), &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    conn.touch_statement(true);
    connector.fail_rollbacks(true);

    pool.checkin(&conn).await.unwrap();
    assert!(conn.state().is_terminal());
    assert_eq!(pool.free_len(), 0);
    let snap = pool.snapshot();
    assert_eq!(snap.destroyed, 1);
    assert_eq!(snap.active_closed, 1);
}

#[tokio::test]
async fn recycle_age_retires_on_checkin() {
    let connector = MockConnector::new();
    let mut config = cfg::pool(1, 4);
    config.soft_recycle_ms = 30;
    config.hard_recycle_ms = 60;
    // No headroom: candidates retire as soon as they pass the soft limit.
    config.extra_capacity = 0;
    config.aging_headroom = Some(0);
    let pool = pool_with(config, &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.checkin(&conn).await.unwrap();

    assert!(conn.state().is_terminal());
    assert_eq!(pool.free_len(), 0);
    let snap = pool.snapshot();
    assert_eq!(snap.aged, 1);
    assert_eq!(snap.aged_closed, 1);
}

#[tokio::test]
async fn recycle_age_retires_on_checkout_and_caller_still_gets_a_connection() {
    let connector = MockConnector::new();
    let mut config = cfg::pool(1, 4);
    config.soft_recycle_ms = 30;
    config.hard_recycle_ms = 60;
    config.extra_capacity = 0;
    config.aging_headroom = Some(0);
    let pool = pool_with(config, &connector);

    let old = pool.checkout(&NoTransactions).await.unwrap();
    let old_id = old.id();
    pool.checkin(&old).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fresh = pool.checkout(&NoTransactions).await.unwrap();
    assert_ne!(fresh.id(), old_id);
    assert!(old.state().is_terminal());
    assert_eq!(pool.snapshot().aged_closed, 1);
}

#[tokio::test]
async fn aging_deferred_while_headroom_is_low() {
    let connector = MockConnector::new();
    let mut config = cfg::pool(1, 4);
    config.soft_recycle_ms = 30;
    config.hard_recycle_ms = 60_000;
    config.extra_capacity = 2;
    config.aging_headroom = Some(2);
    let pool = pool_with(config, &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Free queue is empty, below the headroom of 2, and the hard limit is
    // far away: retirement is deferred and the connection stays usable.
    pool.checkin(&conn).await.unwrap();
    assert_eq!(pool.free_len(), 1);
    assert_eq!(pool.snapshot().aged_closed, 0);
}

#[tokio::test]
async fn hard_recycle_overrides_headroom_deferral() {
    let connector = MockConnector::new();
    let mut config = cfg::pool(1, 4);
    config.soft_recycle_ms = 30;
    config.hard_recycle_ms = 60;
    config.extra_capacity = 2;
    config.aging_headroom = Some(2);
    let pool = pool_with(config, &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    // Free queue is below the headroom, but the connection is past the
    // hard limit: it must be retired anyway.
    pool.checkin(&conn).await.unwrap();

    assert!(conn.state().is_terminal());
    assert_eq!(pool.free_len(), 0);
    assert_eq!(pool.snapshot().aged_closed, 1);
}

#[tokio::test]
async fn checkout_skips_candidates_that_lose_the_claim_race() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(1, 4), &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    let stale_id = conn.id();
    pool.checkin(&conn).await.unwrap();

    // A concurrent teardown claims the queued candidate.
    assert!(conn.set_closed());

    let fresh = pool.checkout(&NoTransactions).await.unwrap();
    assert_ne!(fresh.id(), stale_id);
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn saturation_records_spike_and_bumps_capacity_once_per_interval() {
    let connector = MockConnector::new();
    let events = Arc::new(RecordingSink::new());
    let mut config = cfg::pool(1, 10);
    config.extra_capacity = 2;
    config.spike_adjust_interval_ms = 60_000; // one bump per test
    let pool = make_pool(
        "orders",
        config,
        &cfg::groomer(),
        Arc::new(connector.clone()),
        events.clone(),
    );

    let _a = pool.checkout(&NoTransactions).await.unwrap();
    assert_eq!(pool.current_size(), 1);

    // Second checkout observes active >= size.
    let _b = pool.checkout(&NoTransactions).await.unwrap();
    assert_eq!(pool.current_size(), 3);
    assert_eq!(events.count("pool_spike"), 1);

    // Still saturated, but inside the adjustment interval: the sample is
    // kept, the capacity is not bumped again.
    let _c = pool.checkout(&NoTransactions).await.unwrap();
    let _d = pool.checkout(&NoTransactions).await.unwrap();
    assert_eq!(pool.current_size(), 3);
    assert_eq!(events.count("pool_spike"), 1);

    let (sum, count) = pool.drain_spike_samples();
    assert!(count >= 2);
    assert!(sum >= count); // every sample saw at least one active connection
    assert_eq!(pool.drain_spike_samples(), (0, 0));
}

#[tokio::test]
async fn zero_extra_capacity_disables_spike_bumps() {
    let connector = MockConnector::new();
    let mut config = cfg::pool(1, 10);
    config.extra_capacity = 0;
    config.aging_headroom = Some(0);
    let pool = pool_with(config, &connector);

    let _a = pool.checkout(&NoTransactions).await.unwrap();
    let _b = pool.checkout(&NoTransactions).await.unwrap();
    assert_eq!(pool.current_size(), 1);
    // Samples are still recorded for the size adjuster.
    let (_, count) = pool.drain_spike_samples();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn destroy_is_idempotent_and_counts_once() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(1, 4), &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    assert!(pool.destroy(&conn, DestroyReason::Fault).await);
    assert!(!pool.destroy(&conn, DestroyReason::Fault).await);

    let snap = pool.snapshot();
    assert_eq!(snap.closed, 1);
    assert_eq!(snap.destroyed, 1);
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn checkin_after_out_of_band_destroy_is_a_noop() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(1, 4), &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    pool.destroy(&conn, DestroyReason::Orphan).await;

    pool.checkin(&conn).await.unwrap();
    assert_eq!(pool.free_len(), 0);
    assert_eq!(pool.snapshot().destroyed, 1);
}

#[tokio::test]
async fn remove_idle_reaps_only_timed_out_connections() {
    let connector = MockConnector::new();
    let mut config = cfg::pool(1, 4);
    config.idle_timeout_ms = 40;
    config.extra_capacity = 0;
    config.aging_headroom = Some(0);
    let pool = pool_with(config, &connector);

    let old = pool.checkout(&NoTransactions).await.unwrap();
    let young = pool.checkout(&NoTransactions).await.unwrap();
    pool.checkin(&old).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    pool.checkin(&young).await.unwrap();

    let removed = pool.remove_idle().await;
    assert_eq!(removed, 1);
    assert!(old.state().is_terminal());
    assert_eq!(pool.free_len(), 1);
    assert_eq!(pool.snapshot().idle_closed, 1);
}

#[tokio::test]
async fn remove_idle_keeps_fresh_connections_available() {
    let connector = MockConnector::new();
    let mut config = cfg::pool(3, 8);
    config.extra_capacity = 0;
    config.aging_headroom = Some(0);
    let pool = pool_with(config, &connector);

    let a = pool.checkout(&NoTransactions).await.unwrap();
    let b = pool.checkout(&NoTransactions).await.unwrap();
    let c = pool.checkout(&NoTransactions).await.unwrap();
    for conn in [&a, &b, &c] {
        pool.checkin(conn).await.unwrap();
    }

    // Each survivor is examined once and goes straight back; the sweep
    // terminates and leaves everything in circulation.
    assert_eq!(pool.remove_idle().await, 0);
    assert_eq!(pool.free_len(), 3);
    assert!(pool.checkout(&NoTransactions).await.is_ok());
    assert_eq!(connector.connects(), 3);
}

#[tokio::test]
async fn remove_orphans_force_destroys_long_held_connections() {
    let connector = MockConnector::new();
    let mut config = cfg::pool(1, 4);
    config.orphan_timeout_ms = 40;
    config.orphan_report_ms = Some(10);
    let pool = pool_with(config, &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    let id = conn.id();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let removed = pool.remove_orphans().await;
    assert_eq!(removed, 1);
    assert!(!pool.contains(id));
    assert!(conn.state().is_terminal());
    let snap = pool.snapshot();
    assert_eq!(snap.orphans, 1);
    assert_eq!(snap.active_closed, 1);
}

#[tokio::test]
async fn transaction_checkouts_share_the_pinned_connection() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(1, 4), &connector);
    let txn = MapTransactionContext::new();
    txn.begin();

    let first = pool.checkout(&txn).await.unwrap();
    let second = pool.checkout(&txn).await.unwrap();
    assert_eq!(first.id(), second.id());
    assert!(first.in_transaction());
    assert_eq!(txn.pin_count(), 1);
    assert_eq!(connector.connects(), 1);

    txn.end();
    pool.checkin(&first).await.unwrap();
    assert!(!first.in_transaction());
}

#[tokio::test]
async fn destroyed_pin_surfaces_stale() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(1, 4), &connector);
    let txn = MapTransactionContext::new();
    txn.begin();

    let pinned = pool.checkout(&txn).await.unwrap();
    pool.destroy(&pinned, DestroyReason::Orphan).await;

    let err = pool.checkout(&txn).await.unwrap_err();
    assert!(matches!(err, Error::Pool(PoolError::Stale { .. })));
}

#[tokio::test]
async fn close_all_destroys_free_and_active() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(2, 4), &connector);

    let held = pool.checkout(&NoTransactions).await.unwrap();
    let returned = pool.checkout(&NoTransactions).await.unwrap();
    pool.checkin(&returned).await.unwrap();

    pool.close_all().await;
    assert!(held.state().is_terminal());
    assert!(returned.state().is_terminal());
    assert_eq!(pool.live_count(), 0);
    assert_eq!(connector.closes(), 2);
}

#[tokio::test]
async fn fill_one_respects_the_capacity_target() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(1, 4), &connector);

    pool.fill_one(false).await;
    assert_eq!(pool.free_len(), 1);
    assert_eq!(pool.live_count(), 1);

    // Target met: a stale queued request opens nothing.
    pool.fill_one(false).await;
    assert_eq!(pool.live_count(), 1);
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn bootstrap_fills_to_min_in_the_background() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(3, 8), &connector);

    pool.bootstrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.free_len(), 3);
    assert_eq!(pool.snapshot().background_requests, 3);
}

#[tokio::test]
async fn ledger_drift_is_zero_in_steady_state() {
    let connector = MockConnector::new();
    let pool = pool_with(cfg::pool(2, 8), &connector);

    let a = pool.checkout(&NoTransactions).await.unwrap();
    let b = pool.checkout(&NoTransactions).await.unwrap();
    pool.checkin(&a).await.unwrap();
    assert_eq!(pool.snapshot().drift(), 0);
    pool.checkin(&b).await.unwrap();
    assert_eq!(pool.snapshot().drift(), 0);
}
