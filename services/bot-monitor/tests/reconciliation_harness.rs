//! Multi-cycle reconciliation harness
//!
//! Drives the reconciler against the in-memory control plane and checks the
//! registry file, archive calls and notifications after each cycle.


use bot_monitor::observability::metrics;
use bot_monitor::{
    Disposition, ManualClock, MetricsCollector, MonitorRunner, Notification, PerformanceSummary,
    Reconciler, RegistryStore, RemotePhase, StopReason, TradeSide, TrackedBotRecord,
};
use chrono::{Duration, TimeZone, Utc};
use mock_control_plane::{snapshot, MockControlPlane, RecordingNotifier, RECIPIENT};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const BUY_FILL: &str = "The BUY order 1 amounting to 0.5/0.5 SOL has been filled at 150.25 USDC.";
const SELL_FILL: &str = "The SELL order 2 amounting to 0.5/0.5 SOL has been filled at 152.10 USDC.";

struct Harness {
    control_plane: Arc<MockControlPlane>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
    store: RegistryStore,
    reconciler: Reconciler,
    _dir: TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = RegistryStore::new(dir.path().join("active_trades.json"));
    let control_plane = Arc::new(MockControlPlane::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 8, 20, 12, 0, 0).unwrap(),
    ));

    let reconciler = Reconciler::new(
        control_plane.clone(),
        notifier.clone(),
        store.clone(),
        RECIPIENT,
    )
    .with_clock(clock.clone());

    Harness {
        control_plane,
        notifier,
        clock,
        store,
        reconciler,
        _dir: dir,
    }
}

fn names(records: &[TrackedBotRecord]) -> Vec<String> {
    let mut names: Vec<String> = records.iter().map(|r| r.instance_name.clone()).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_three_cycle_lifecycle() {
    let mut h = harness();
    for name in ["bot_a", "bot_b", "bot_c"] {
        h.control_plane.add_detail(name, "SOL-USDC");
    }

    // Cycle 1: three running bots are admitted and announced
    h.control_plane.set_statuses(vec![
        snapshot("bot_a", RemotePhase::Running, &["Bot started."]),
        snapshot("bot_b", RemotePhase::Running, &["Bot started."]),
        snapshot("bot_c", RemotePhase::Running, &["Bot started."]),
    ]);
    let report = h.reconciler.run_cycle().await;
    assert_eq!(report.records.len(), 3);
    assert_eq!(h.store.load().await.len(), 3);
    assert!(h.control_plane.archive_calls().is_empty());
    assert_eq!(h.notifier.of_kind("status_update").len(), 3);
    assert!(h.notifier.sent().iter().all(|(recipient, _)| recipient == RECIPIENT));

    // Cycle 2: bot_a completes its trade
    h.notifier.clear();
    h.clock.advance(Duration::seconds(10));
    h.control_plane.set_statuses(vec![
        snapshot(
            "bot_a",
            RemotePhase::Stopped,
            &["Bot started.", "Stopping the strategy...", "All positions closed."],
        ),
        snapshot("bot_b", RemotePhase::Running, &["Bot started."]),
        snapshot("bot_c", RemotePhase::Running, &["Bot started."]),
    ]);
    let report = h.reconciler.run_cycle().await;
    assert_eq!(report.count(Disposition::Archived), 1);
    assert_eq!(h.control_plane.archive_calls(), vec!["bot_a"]);
    assert_eq!(names(&h.store.load().await), vec!["bot_b", "bot_c"]);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    match &sent[0].1 {
        Notification::StatusUpdate {
            instance_name,
            stop_reason,
            ..
        } => {
            assert_eq!(instance_name, "bot_a");
            assert_eq!(stop_reason, &Some(StopReason::TradeCompleted));
        }
        other => panic!("unexpected notification {other:?}"),
    }

    // Cycle 3: the remaining bots disappear from the control plane
    h.notifier.clear();
    h.control_plane.set_statuses(vec![
        snapshot("bot_b", RemotePhase::NotFound, &[]),
        snapshot("bot_c", RemotePhase::NotFound, &[]),
    ]);
    let report = h.reconciler.run_cycle().await;
    assert_eq!(report.count(Disposition::Removed), 2);
    assert_eq!(h.control_plane.archive_calls(), vec!["bot_a", "bot_b", "bot_c"]);
    assert_eq!(h.notifier.of_kind("not_found_alert").len(), 2);
    assert_eq!(h.notifier.sent().len(), 2);
    assert!(h.store.load().await.is_empty());
}

#[tokio::test]
async fn test_trade_notifications_are_idempotent_across_replays() {
    let mut h = harness();
    h.control_plane.set_statuses(vec![snapshot(
        "bot_sol",
        RemotePhase::Running,
        &["Bot started.", BUY_FILL, "PnL: 0.1 USDC", SELL_FILL],
    )]);

    for _ in 0..5 {
        h.reconciler.run_cycle().await;
    }

    let trades = h.notifier.of_kind("trade_update");
    assert_eq!(trades.len(), 2);
    let sides: Vec<TradeSide> = trades
        .iter()
        .map(|n| match n {
            Notification::TradeUpdate(event) => event.side,
            other => panic!("unexpected notification {other:?}"),
        })
        .collect();
    assert_eq!(sides, vec![TradeSide::Buy, TradeSide::Sell]);
}

#[tokio::test]
async fn test_registry_converges_to_remote_keys() {
    let mut h = harness();
    let ghost = TrackedBotRecord::placeholder("ghost_bot", RECIPIENT);
    h.store.save(&[ghost]).await.unwrap();

    h.control_plane.set_statuses(vec![
        snapshot("bot_x", RemotePhase::Running, &[]),
        snapshot("bot_y", RemotePhase::Running, &[]),
    ]);
    let (records, snapshots) = h.reconciler.synchronize().await;
    assert_eq!(names(&records), vec!["bot_x", "bot_y"]);
    assert_eq!(snapshots.len(), 2);
    assert!(h.control_plane.archive_calls().is_empty());

    // Running it again admits nothing new
    let (records, _) = h.reconciler.synchronize().await;
    assert_eq!(records.len(), 2);
    assert_eq!(names(&h.store.load().await), vec!["bot_x", "bot_y"]);
}

#[tokio::test]
async fn test_heartbeat_cooldown() {
    let mut h = harness();
    h.control_plane.set_statuses(vec![snapshot(
        "bot_eth",
        RemotePhase::Running,
        &["PnL: 1.5 USDT", "Open Orders: 2"],
    )]);

    h.reconciler.run_cycle().await;
    assert_eq!(h.notifier.of_kind("status_update").len(), 1);

    h.clock.advance(Duration::seconds(100));
    h.reconciler.run_cycle().await;
    assert_eq!(h.notifier.of_kind("status_update").len(), 1);

    h.clock.advance(Duration::seconds(201));
    h.reconciler.run_cycle().await;
    let updates = h.notifier.of_kind("status_update");
    assert_eq!(updates.len(), 2);
    match &updates[1] {
        Notification::StatusUpdate { hints: Some(hints), .. } => {
            assert_eq!(hints.pnl_info, "PnL: 1.5 USDT");
            assert_eq!(hints.open_orders_info, "Open Orders: 2");
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_record_is_kept_and_reported() {
    let mut h = harness();
    h.notifier.fail_for_instance("bot_b");
    h.control_plane.set_statuses(vec![
        snapshot("bot_a", RemotePhase::Running, &[]),
        snapshot("bot_b", RemotePhase::Running, &[]),
        snapshot("bot_c", RemotePhase::Running, &[]),
    ]);

    let report = h.reconciler.run_cycle().await;
    assert_eq!(report.failures(), 1);
    assert_eq!(report.count(Disposition::Keep), 2);
    assert_eq!(names(&report.records), vec!["bot_a", "bot_b", "bot_c"]);
    assert_eq!(h.store.load().await.len(), 3);

    let errors = h.notifier.of_kind("error");
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        Notification::Error { message } => assert!(message.contains("bot_b")),
        other => panic!("unexpected notification {other:?}"),
    }
    assert_eq!(h.notifier.of_kind("status_update").len(), 2);
}

#[tokio::test]
async fn test_trade_send_failure_does_not_drop_later_fills() {
    let mut h = harness();
    h.notifier.fail_next_trades(1);
    h.control_plane.set_statuses(vec![snapshot(
        "bot_a",
        RemotePhase::Running,
        &[BUY_FILL, SELL_FILL],
    )]);

    let report = h.reconciler.run_cycle().await;
    assert_eq!(report.failures(), 1);
    assert_eq!(names(&report.records), vec!["bot_a"]);
    assert_eq!(h.notifier.of_kind("error").len(), 1);

    for _ in 0..2 {
        let report = h.reconciler.run_cycle().await;
        assert_eq!(report.failures(), 0);
    }

    // The failed BUY is not resent; the SELL behind it went out exactly once
    let trades = h.notifier.of_kind("trade_update");
    assert_eq!(trades.len(), 1);
    match &trades[0] {
        Notification::TradeUpdate(event) => assert_eq!(event.side, TradeSide::Sell),
        other => panic!("unexpected notification {other:?}"),
    }
    assert_eq!(h.reconciler.metrics().get_counter(metrics::TRADE_NOTIFIED).await, 1);
}

#[tokio::test]
async fn test_unwritable_registry_keeps_working_set() {
    let dir = tempfile::tempdir().unwrap();
    // A directory at the registry path makes every save fail
    let registry_path = dir.path().join("active_trades.json");
    std::fs::create_dir(&registry_path).unwrap();

    let control_plane = Arc::new(MockControlPlane::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let collector = MetricsCollector::new();
    let mut reconciler = Reconciler::new(
        control_plane.clone(),
        notifier.clone(),
        RegistryStore::new(registry_path.clone()),
        RECIPIENT,
    )
    .with_metrics(collector.clone());

    control_plane.set_statuses(vec![
        snapshot("bot_a", RemotePhase::Running, &[]),
        snapshot("bot_b", RemotePhase::Running, &[BUY_FILL]),
    ]);
    reconciler.run_cycle().await;

    // bot_b completes and is archived while saves keep failing
    control_plane.set_statuses(vec![
        snapshot("bot_a", RemotePhase::Running, &[]),
        snapshot(
            "bot_b",
            RemotePhase::Stopped,
            &[BUY_FILL, "All positions closed.", "Strategy stopped."],
        ),
    ]);
    let report = reconciler.run_cycle().await;
    assert_eq!(report.count(Disposition::Archived), 1);

    control_plane.set_statuses(vec![snapshot("bot_a", RemotePhase::Running, &[])]);
    let report = reconciler.run_cycle().await;
    assert_eq!(names(&report.records), vec!["bot_a"]);

    assert_eq!(control_plane.archive_calls(), vec!["bot_b"]);
    assert_eq!(notifier.of_kind("trade_update").len(), 1);
    assert_eq!(collector.get_counter(metrics::BOT_ADMITTED).await, 2);
    assert_eq!(collector.get_counter(metrics::CYCLES).await, 3);
    assert!(collector.get_counter(metrics::SAVE_FAILED).await >= 3);
}

#[tokio::test]
async fn test_success_phase_goes_through_classifier() {
    let mut h = harness();
    h.control_plane.set_statuses(vec![
        snapshot("bot_manual", RemotePhase::Success, &["Stopping the strategy..."]),
        snapshot("bot_done", RemotePhase::Success, &["Trade completed."]),
    ]);

    let report = h.reconciler.run_cycle().await;
    assert_eq!(report.count(Disposition::Keep), 1);
    assert_eq!(report.count(Disposition::Archived), 1);
    assert_eq!(names(&report.records), vec!["bot_manual"]);
    assert_eq!(h.control_plane.archive_calls(), vec!["bot_done"]);

    let manual = h
        .notifier
        .of_kind("status_update")
        .into_iter()
        .find(|n| matches!(n, Notification::StatusUpdate { instance_name, .. } if instance_name == "bot_manual"));
    match manual {
        Some(Notification::StatusUpdate { stop_reason, .. }) => {
            assert_eq!(stop_reason, Some(StopReason::ManualStop))
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_phase_is_kept_quietly() {
    let mut h = harness();
    h.control_plane.set_statuses(vec![snapshot(
        "bot_r",
        RemotePhase::Other("restarting".to_string()),
        &[],
    )]);

    let report = h.reconciler.run_cycle().await;
    assert_eq!(report.count(Disposition::Keep), 1);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.store.load().await.len(), 1);
}

#[tokio::test]
async fn test_status_fetch_failure_changes_nothing() {
    let mut h = harness();
    h.control_plane.set_statuses(vec![snapshot("bot_a", RemotePhase::Running, &[])]);
    h.reconciler.run_cycle().await;

    h.control_plane.fail_statuses();
    let report = h.reconciler.run_cycle().await;
    assert_eq!(report.count(Disposition::Skipped), 1);
    assert_eq!(names(&h.store.load().await), vec!["bot_a"]);
    assert!(h.control_plane.archive_calls().is_empty());
}

#[tokio::test]
async fn test_archive_failure_does_not_block_removal() {
    let mut h = harness();
    h.control_plane.fail_archive_for("bot_gone");
    h.control_plane.set_statuses(vec![snapshot("bot_gone", RemotePhase::NotFound, &[])]);

    let report = h.reconciler.run_cycle().await;
    assert_eq!(report.count(Disposition::Removed), 1);
    assert!(h.store.load().await.is_empty());
    assert_eq!(h.notifier.of_kind("not_found_alert").len(), 1);
}

#[tokio::test]
async fn test_detail_failure_admits_placeholder() {
    let mut h = harness();
    h.control_plane.add_detail("bot_known", "ETH-USDT");
    h.control_plane.set_statuses(vec![
        snapshot("bot_known", RemotePhase::Running, &[]),
        snapshot("bot_mystery", RemotePhase::Running, &[]),
    ]);

    let (records, _) = h.reconciler.synchronize().await;
    let pair = |name: &str| {
        records
            .iter()
            .find(|r| r.instance_name == name)
            .map(|r| r.trading_pair.clone())
    };
    assert_eq!(pair("bot_known").as_deref(), Some("ETH-USDT"));
    assert_eq!(pair("bot_mystery").as_deref(), Some("UNKNOWN"));
}

#[tokio::test]
async fn test_final_pnl_attached_to_completion_notice() {
    let mut h = harness();
    h.reconciler = Reconciler::new(
        h.control_plane.clone(),
        h.notifier.clone(),
        h.store.clone(),
        RECIPIENT,
    )
    .with_clock(h.clock.clone())
    .with_final_pnl(2, std::time::Duration::ZERO);

    h.control_plane.add_database(
        "bots/archived/bot_a/data/config_bot_a.sqlite",
        PerformanceSummary {
            final_net_pnl_quote: Some(json!(3.5)),
            total_volume_quote: Some(json!(200)),
            total_fees_quote: Some(json!(0.2)),
        },
    );
    h.control_plane.set_statuses(vec![snapshot(
        "bot_a",
        RemotePhase::Stopped,
        &["Take profit hit", "Stopping the strategy..."],
    )]);

    h.reconciler.run_cycle().await;
    match h.notifier.of_kind("status_update").first() {
        Some(Notification::StatusUpdate { final_pnl: Some(summary), .. }) => {
            assert_eq!(summary.final_net_pnl_quote, Some(json!(3.5)));
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn test_runner_stops_on_cancel_and_closes_gateway() {
    let h = harness();
    h.control_plane.set_statuses(vec![snapshot("bot_a", RemotePhase::Running, &[])]);

    let cancel = CancellationToken::new();
    let runner = MonitorRunner::new(
        h.reconciler,
        std::time::Duration::from_millis(10),
        cancel.clone(),
    );
    let handle = tokio::spawn(runner.run());

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cancel.cancel();
    let metrics = handle.await.unwrap();

    assert!(metrics.counters.get("reconcile_cycles_total").copied().unwrap_or(0) >= 1);
    assert!(h.control_plane.is_closed());
    assert_eq!(h.notifier.of_kind("status_update").len(), 1);
}

#[tokio::test]
async fn test_runner_cancelled_before_start_runs_no_cycle() {
    let h = harness();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let metrics = MonitorRunner::new(h.reconciler, std::time::Duration::from_secs(10), cancel)
        .run()
        .await;
    assert!(metrics.counters.is_empty());
    assert!(h.control_plane.is_closed());
}
