//! Integration tests for the background actors.
//!
//! The groomer, size adjuster, and state logger expose their per-tick
//! entry points (`sweep`, `observe`, `tick`), so most of these tests drive
//! them deterministically instead of waiting on wall-clock intervals.

use std::sync::Arc;
use std::time::Duration;

use tidepool::config::GroomerConfig;
use tidepool::events::{NullEventSink, Severity};
use tidepool::groomer::Groomer;
use tidepool::sizer::SizeAdjuster;
use tidepool::state_logger::StateLogger;
use tidepool::testkit;
use tidepool::testkit::connector::MockConnector;
use tidepool::testkit::events::RecordingSink;
use tidepool::testkit::make_pool;
use tidepool::txn::NoTransactions;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn quiet_pool(
    config: tidepool::config::PoolConfig,
    connector: &MockConnector,
) -> Arc<tidepool::ConnectionPool> {
    init_tracing();
    make_pool(
        "orders",
        config,
        &testkit::config::groomer(),
        Arc::new(connector.clone()),
        Arc::new(NullEventSink),
    )
}

// ---------------------------------------------------------------------------
// Test 1: Groomer sweep reaps idle connections and tops the pool back up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweep_reaps_idle_and_replenishes() {
    let connector = MockConnector::new();
    let mut config = testkit::config::pool(2, 8);
    config.idle_timeout_ms = 40;
    config.extra_capacity = 0;
    config.aging_headroom = Some(0);
    let pool = quiet_pool(config, &connector);

    let a = pool.checkout(&NoTransactions).await.unwrap();
    let b = pool.checkout(&NoTransactions).await.unwrap();
    pool.checkin(&a).await.unwrap();
    pool.checkin(&b).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let groomer = Groomer::new(testkit::config::groomer());
    groomer.register(pool.clone());
    groomer.sweep().await;

    assert!(a.state().is_terminal());
    assert!(b.state().is_terminal());
    assert_eq!(pool.snapshot().idle_closed, 2);

    // Replacements arrive asynchronously through the workers.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.free_len(), 2);
    assert_eq!(pool.live_count(), 2);
}

// ---------------------------------------------------------------------------
// Test 2: Groomer sweep force-destroys orphans; check-in becomes a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweep_force_destroys_orphans() {
    let connector = MockConnector::new();
    let mut config = testkit::config::pool(1, 8);
    config.orphan_timeout_ms = 40;
    config.orphan_report_ms = Some(10);
    let pool = quiet_pool(config, &connector);

    let leaked = pool.checkout(&NoTransactions).await.unwrap();
    let id = leaked.id();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let groomer = Groomer::new(testkit::config::groomer());
    groomer.register(pool.clone());
    groomer.sweep().await;

    assert!(!pool.contains(id));
    assert!(leaked.state().is_terminal());
    assert_eq!(pool.snapshot().orphans, 1);

    // The holder eventually returns it; nothing re-enters circulation.
    pool.checkin(&leaked).await.unwrap();
    assert_eq!(pool.free_len(), 0);
}

// ---------------------------------------------------------------------------
// Test 3: Size adjuster raises capacity from sustained load
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sustained_load_raises_capacity() {
    let connector = MockConnector::new();
    let pool = quiet_pool(testkit::config::pool(1, 16), &connector);

    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.checkout(&NoTransactions).await.unwrap());
    }

    // tracking 20ms x 5 samples = one full short window of active == 4.
    let sizer = SizeAdjuster::new(testkit::config::groomer());
    sizer.register(pool.clone());
    for _ in 0..5 {
        sizer.observe();
    }

    // ceil-mean 4 plus extra capacity 2.
    assert_eq!(pool.current_size(), 6);
}

// ---------------------------------------------------------------------------
// Test 4: Long window lowers capacity once load subsides
// ---------------------------------------------------------------------------

#[tokio::test]
async fn long_window_lowers_capacity() {
    let connector = MockConnector::new();
    let pool = quiet_pool(testkit::config::pool(1, 16), &connector);

    // Saturate once so the spike path bumps capacity above the target the
    // quiet long window will compute.
    let a = pool.checkout(&NoTransactions).await.unwrap();
    let b = pool.checkout(&NoTransactions).await.unwrap();
    assert_eq!(pool.current_size(), 3);
    pool.checkin(&a).await.unwrap();
    pool.checkin(&b).await.unwrap();

    // tracking 20ms x 20 samples = one full long window of active == 0.
    let sizer = SizeAdjuster::new(testkit::config::groomer());
    sizer.register(pool.clone());
    for _ in 0..20 {
        sizer.observe();
    }

    // ceil-mean 0 plus extra capacity 2, floored at min 1.
    assert_eq!(pool.current_size(), 2);
}

// ---------------------------------------------------------------------------
// Test 5: State logger raises an orphan alert and widens the threshold
// ---------------------------------------------------------------------------

#[tokio::test]
async fn orphan_alert_fires_once_then_widens() {
    let connector = MockConnector::new();
    let events = Arc::new(RecordingSink::new());
    let mut config = testkit::config::pool(1, 8);
    config.orphan_timeout_ms = 40;
    config.orphan_report_ms = Some(10);
    let pool = make_pool(
        "orders",
        config,
        &testkit::config::groomer(),
        Arc::new(connector.clone()),
        events.clone(),
    );

    for _ in 0..3 {
        let leaked = pool.checkout(&NoTransactions).await.unwrap();
        drop(leaked);
    }
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(pool.remove_orphans().await, 3);

    let logger = StateLogger::new(testkit::config::groomer(), events.clone());
    logger.register(pool.clone());

    // orphans == 3 crosses the initial threshold of 2.
    logger.tick(1);
    assert_eq!(events.count("orphan_alert"), 1);
    assert_eq!(
        events.last("orphan_alert").unwrap().severity,
        Severity::Critical
    );

    // Threshold doubled to 4: the same orphan count no longer alerts.
    logger.tick(2);
    assert_eq!(events.count("orphan_alert"), 1);
}

// ---------------------------------------------------------------------------
// Test 6: State logger emits the full detail dump on the configured cadence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn detail_dump_every_nth_tick() {
    let connector = MockConnector::new();
    let events = Arc::new(RecordingSink::new());
    let pool = make_pool(
        "orders",
        testkit::config::pool(1, 8),
        &testkit::config::groomer(),
        Arc::new(connector.clone()),
        events.clone(),
    );

    let logger = StateLogger::new(testkit::config::groomer(), events.clone());
    logger.register(pool.clone());

    // detail_every is 4: ticks 4 and 8 dump, the rest stay compact.
    for tick_no in 1..=8 {
        logger.tick(tick_no);
    }
    assert_eq!(events.count("pool_state"), 2);
}

// ---------------------------------------------------------------------------
// Test 7: Actors keep a registry pool healthy end-to-end on real intervals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn actors_maintain_pool_on_real_intervals() {
    use tidepool::registry::{DatasourceDef, PoolRegistry};

    let connector = MockConnector::new();
    let mut config = testkit::config::pool(2, 8);
    config.idle_timeout_ms = 60_000; // no reaping mid-test
    config.orphan_timeout_ms = 200;
    config.orphan_report_ms = Some(50);
    let registry = PoolRegistry::new(
        vec![DatasourceDef::new("orders", config)],
        testkit::config::groomer(),
        Arc::new(connector.clone()),
        Arc::new(NullEventSink),
    )
    .unwrap();
    let pool = registry.pool("orders").unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pool.live_count() >= 2, "bootstrap never reached the minimum");

    // Leak a connection; the groomer's own loop must claim it back.
    let leaked = pool.checkout(&NoTransactions).await.unwrap();
    let id = leaked.id();
    drop(leaked);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!pool.contains(id), "orphan survived the groomer loop");
    assert_eq!(pool.snapshot().orphans, 1);
    assert!(pool.live_count() >= 2, "pool not topped back up after reap");
}

// ---------------------------------------------------------------------------
// Test 8: Groomer replaces reaped connections, bounded by the target
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweep_replaces_reaped_up_to_target() {
    let connector = MockConnector::new();
    let mut config = testkit::config::pool(1, 8);
    config.idle_timeout_ms = 40;
    config.extra_capacity = 0;
    config.aging_headroom = Some(0);
    let pool = quiet_pool(config, &connector);

    let conn = pool.checkout(&NoTransactions).await.unwrap();
    pool.checkin(&conn).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    // The reap and the top-up both request a replacement; admission control
    // and the workers' target re-check keep the pool at exactly one.
    let groomer = Groomer::new(testkit::config::groomer());
    groomer.register(pool.clone());
    groomer.sweep().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(pool.snapshot().idle_closed, 1);
    assert_eq!(pool.live_count(), 1);
    assert_eq!(pool.free_len(), 1);
}

// ---------------------------------------------------------------------------
// Test 9: Zero-interval validation keeps the actors from ever starting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_groomer_config_is_rejected() {
    use tidepool::registry::{DatasourceDef, PoolRegistry};

    let mut bad = GroomerConfig::default();
    bad.groom_interval_ms = 0;
    let err = PoolRegistry::new(
        vec![DatasourceDef::new("orders", testkit::config::pool(1, 4))],
        bad,
        Arc::new(MockConnector::new()),
        Arc::new(NullEventSink),
    )
    .unwrap_err();
    assert!(matches!(err, tidepool::Error::Config(_)));
}
