//! End-to-end scenarios against `ChainFacade`, backed by the fake
//! adapter in `tests/common` instead of a real Geth/Ganache binary.

mod common;

use std::net::TcpListener;
use std::time::Duration;

use chain_manager::{ChainConfig, ChainEvent, ChainFacade, ChainStatus, ChainType, Topic};

fn geth_config() -> ChainConfig {
    ChainConfig {
        id: None,
        chain_type: ChainType::Geth,
        accounts_requested: 2,
        block_mine_time_ms: 0,
        network_id: 999,
        db_path: None,
        http_port: None,
        ws_port: None,
        clean_on_stop: false,
        output_log_path: Default::default(),
        snapshot_id: None,
    }
}

/// Polls `f` until it returns `true` or the deadline passes, rather than
/// sleeping a fixed guess, since the worker's mailbox is processed
/// asynchronously, so the exact tick a status settles on isn't known.
async fn wait_until<F: Fn() -> bool>(f: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if f() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// S1: starting a chain registers it and publishes `started`.
#[tokio::test]
async fn start_brings_a_chain_to_active_and_emits_started() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_ok_factory())
        .unwrap();
    let mut api = facade.notifications().subscribe(Topic::Api);

    let id = facade.start(geth_config()).await.unwrap();

    // `set_status(Active)` fires before `emit_started` on the initial
    // launch path, so `status_changed` always precedes `started` here.
    assert!(matches!(
        api.recv().await.unwrap(),
        ChainEvent::StatusChanged { status: ChainStatus::Active, .. }
    ));
    let event = tokio::time::timeout(Duration::from_secs(2), api.recv())
        .await
        .expect("no event received")
        .expect("bus closed");
    let (accounts, coinbase) = match event {
        ChainEvent::Started { id: eid, accounts, coinbase, .. } => {
            assert_eq!(eid, id);
            (accounts, coinbase)
        }
        other => panic!("expected Started, got {:?}", other),
    };
    assert_eq!(accounts.len(), 2);
    assert_eq!(coinbase.as_deref(), Some(accounts[0].address.as_str()));

    let handle = facade.details(&id).await.unwrap();
    assert_eq!(handle.status, ChainStatus::Active);
    assert!(facade.alive(&id).await);
    assert_eq!(facade.version(&id).await.unwrap(), "fake");

    facade.stop(&id).await.unwrap();
}

// S2: snapshot take/revert round-trips the account set and produces the
// ordered event sequence `snapshot_taken, status_changed(active), started`.
#[tokio::test]
async fn snapshot_round_trip_restores_the_same_accounts_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_ok_factory())
        .unwrap();
    let mut api = facade.notifications().subscribe(Topic::Api);

    let id = facade.start(geth_config()).await.unwrap();
    assert!(matches!(
        api.recv().await.unwrap(),
        ChainEvent::StatusChanged { status: ChainStatus::Active, .. }
    ));
    assert!(matches!(api.recv().await.unwrap(), ChainEvent::Started { .. }));

    let before = facade.details(&id).await.unwrap().accounts;
    let details = facade.take_snapshot(&id, "checkpoint").await.unwrap();
    assert_eq!(details.chain_type, ChainType::Geth);

    assert!(matches!(api.recv().await.unwrap(), ChainEvent::SnapshotTaken { .. }));
    assert!(matches!(
        api.recv().await.unwrap(),
        ChainEvent::StatusChanged { status: ChainStatus::Active, .. }
    ));
    assert!(matches!(api.recv().await.unwrap(), ChainEvent::Started { .. }));

    let after_snapshot = facade.details(&id).await.unwrap().accounts;
    assert_eq!(before, after_snapshot);

    facade.revert_snapshot(&id, details).await.unwrap();
    assert!(matches!(api.recv().await.unwrap(), ChainEvent::SnapshotReverted { .. }));
    assert!(matches!(
        api.recv().await.unwrap(),
        ChainEvent::StatusChanged { status: ChainStatus::Active, .. }
    ));
    assert!(matches!(api.recv().await.unwrap(), ChainEvent::Started { .. }));

    let after_revert = facade.details(&id).await.unwrap().accounts;
    assert_eq!(before, after_revert);

    facade.stop(&id).await.unwrap();
}

// S3: a port already in use is rejected before any worker is registered,
// with no events published for it.
#[tokio::test]
async fn start_with_a_bound_port_is_rejected_as_a_resource_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_ok_factory())
        .unwrap();
    let mut api = facade.notifications().subscribe(Topic::Api);

    let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = held.local_addr().unwrap().port();

    let mut config = geth_config();
    config.http_port = Some(port);
    config.ws_port = Some(port + 1);

    let err = facade.start(config).await.unwrap_err();
    assert!(matches!(err, chain_manager::Error::ResourceConflict));
    assert!(facade.list().is_empty());

    drop(held);
    let result = tokio::time::timeout(Duration::from_millis(200), api.recv()).await;
    assert!(result.is_err(), "no event should have been published for a rejected start");
}

// S4: an EVM that never becomes ready fails the chain, which tears the
// worker down and leaves it not-alive (`error` then
// `status_changed(failed)`, then `alive?` settles on false per `spec.md` §8 S4).
#[tokio::test]
async fn a_failing_adapter_marks_the_chain_failed_and_not_alive() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_fail_factory())
        .unwrap();
    let mut api = facade.notifications().subscribe(Topic::Api);

    let id = facade.start(geth_config()).await.unwrap();

    // The failed-launch path describes why before it sets status, so
    // `error` precedes `status_changed(failed)` here.
    assert!(matches!(api.recv().await.unwrap(), ChainEvent::Error { .. }));
    assert!(matches!(
        api.recv().await.unwrap(),
        ChainEvent::StatusChanged { status: ChainStatus::Failed, .. }
    ));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while facade.alive(&id).await {
        assert!(tokio::time::Instant::now() < deadline, "chain never became not-alive");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!facade.list().contains(&id));
}

// S5: a stop issued right after a snapshot request is queued and only
// takes effect once the snapshot completes, with no commands lost.
#[tokio::test]
async fn stop_during_a_snapshot_is_queued_and_runs_after_it_completes() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_ok_factory())
        .unwrap();
    let mut api = facade.notifications().subscribe(Topic::Api);

    let id = facade.start(geth_config()).await.unwrap();
    assert!(matches!(
        api.recv().await.unwrap(),
        ChainEvent::StatusChanged { status: ChainStatus::Active, .. }
    ));
    assert!(matches!(api.recv().await.unwrap(), ChainEvent::Started { .. }));

    let snapshot_facade = facade.clone();
    let snapshot_id = id.clone();
    let snapshot_task =
        tokio::spawn(async move { snapshot_facade.take_snapshot(&snapshot_id, "pre-stop").await });
    // Give the spawned task a turn so its `TakeSnapshot` reaches the
    // mailbox before `stop` is sent, exercising the "queued behind an
    // in-flight op" path rather than racing for first place.
    tokio::task::yield_now().await;
    let stop_result = facade.stop(&id).await;

    snapshot_task.await.unwrap().unwrap();
    stop_result.unwrap();

    assert!(matches!(api.recv().await.unwrap(), ChainEvent::SnapshotTaken { .. }));
    assert!(matches!(
        api.recv().await.unwrap(),
        ChainEvent::StatusChanged { status: ChainStatus::Active, .. }
    ));
    assert!(matches!(api.recv().await.unwrap(), ChainEvent::Started { .. }));
    assert!(matches!(
        api.recv().await.unwrap(),
        ChainEvent::StatusChanged { status: ChainStatus::Terminating, .. }
    ));
    assert!(matches!(api.recv().await.unwrap(), ChainEvent::Stopped { .. }));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while facade.alive(&id).await {
        assert!(tokio::time::Instant::now() < deadline, "chain never became not-alive");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// S6: `clean_on_stop` removes the chain's data directory once stopped;
// without it, the directory survives.
#[tokio::test]
async fn clean_on_stop_removes_the_data_directory() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_ok_factory())
        .unwrap();

    let mut cleaned = geth_config();
    cleaned.clean_on_stop = true;
    let id = facade.start(cleaned).await.unwrap();
    wait_until(
        || facade.list().contains(&id),
        Duration::from_secs(1),
    )
    .await;
    let db_path = dir.path().join("chains").join(&id);
    wait_until(|| db_path.exists(), Duration::from_secs(2)).await;

    facade.stop(&id).await.unwrap();
    assert!(!db_path.exists(), "db_path should be removed when clean_on_stop is set");
}

#[tokio::test]
async fn without_clean_on_stop_the_data_directory_survives() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_ok_factory())
        .unwrap();

    let id = facade.start(geth_config()).await.unwrap();
    let db_path = dir.path().join("chains").join(&id);
    wait_until(|| db_path.exists(), Duration::from_secs(2)).await;

    facade.stop(&id).await.unwrap();
    assert!(db_path.exists(), "db_path should survive when clean_on_stop is unset");
}

// Two live chains never share a port or a data directory.
#[tokio::test]
async fn concurrently_started_chains_get_distinct_ports_and_paths() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_ok_factory())
        .unwrap();

    let a = facade.start(geth_config()).await.unwrap();
    let b = facade.start(geth_config()).await.unwrap();
    assert_ne!(a, b);

    let ha = facade.details(&a).await.unwrap();
    let hb = facade.details(&b).await.unwrap();
    assert_ne!(ha.rpc_url, hb.rpc_url);
    assert_ne!(ha.ws_url, hb.ws_url);

    facade.stop(&a).await.unwrap();
    facade.stop(&b).await.unwrap();
}

// Ganache always normalizes `ws_port` to equal `http_port`.
#[tokio::test]
async fn ganache_chains_use_the_same_port_for_http_and_ws() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_ok_factory())
        .unwrap();

    let mut config = geth_config();
    config.chain_type = ChainType::Ganache;
    let id = facade.start(config).await.unwrap();

    let handle = facade.details(&id).await.unwrap();
    assert_eq!(handle.rpc_url.rsplit(':').next(), handle.ws_url.rsplit(':').next());

    facade.stop(&id).await.unwrap();
}

// A chain with a `snapshot_id` reuses the snapshot's accounts rather than
// minting new ones.
#[tokio::test]
async fn starting_from_a_snapshot_seeds_the_data_directory_first() {
    let dir = tempfile::tempdir().unwrap();
    let facade = ChainFacade::with_adapter_factory(common::test_manager(dir.path()), common::always_ok_factory())
        .unwrap();

    let id = facade.start(geth_config()).await.unwrap();
    let original_accounts = facade.details(&id).await.unwrap().accounts;
    let snapshot = facade.take_snapshot(&id, "seed").await.unwrap();
    facade.stop(&id).await.unwrap();

    let mut seeded = geth_config();
    seeded.snapshot_id = Some(snapshot.id.clone());
    let seeded_id = facade.start(seeded).await.unwrap();
    wait_until(
        || facade.list().contains(&seeded_id),
        Duration::from_secs(1),
    )
    .await;

    let db_path = dir.path().join("chains").join(&seeded_id);
    wait_until(|| db_path.exists(), Duration::from_secs(2)).await;
    assert!(std::fs::read_dir(&db_path).unwrap().next().is_some());

    let handle = facade.details(&seeded_id).await.unwrap();
    assert_eq!(handle.accounts.len(), original_accounts.len());

    facade.stop(&seeded_id).await.unwrap();
}
