//! Integration tests for the respawn orchestrator: staging, spawning,
//! debouncing, trigger coalescing, aborts, and post-spawn replay.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scene_sync::config::{ClientConfig, TimingConfig};
use scene_sync::events::{DiagnosticLevel, Diagnostics, Subscription};
use scene_sync::process::Deployer;
use scene_sync::protocol::{Command, CommandSink};
use scene_sync::server::ConnectionEvent;
use scene_sync::session::{InterfaceId, SessionStore};
use scene_sync::state::StateMachine;
use scene_sync::watch::{CycleOutcome, CycleReport, Queued, RespawnDeps, RespawnOrchestrator, Trigger};

use super::test_helpers::{recording_deployer, DeployCall, RecordingDeployer, WAIT};

#[derive(Default)]
struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl CommandSink for RecordingSink {
    fn send_command<'a>(
        &'a self,
        command: &'a Command,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            self.lines
                .lock()
                .expect("lock")
                .push(command.encode().expect("encodable"));
            true
        })
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    assets: PathBuf,
    working: PathBuf,
    deployer: Arc<RecordingDeployer>,
    sink: Arc<RecordingSink>,
    store: Arc<tokio::sync::Mutex<SessionStore>>,
    state: Arc<StateMachine>,
    diagnostics: Arc<Diagnostics>,
    orchestrator: RespawnOrchestrator,
}

fn timing(resync_delay_ms: u64) -> TimingConfig {
    TimingConfig {
        replay_spacing_ms: 5,
        settle_delay_ms: 10,
        kill_grace_ms: 500,
        resync_delay_ms,
        ..TimingConfig::default()
    }
}

fn fixture_with(deployer: Arc<RecordingDeployer>, resync_delay_ms: u64) -> Fixture {
    let temp = tempfile::tempdir().expect("tempdir");
    let assets = temp.path().join("assets");
    let working = temp.path().join("client");
    std::fs::create_dir_all(&assets).expect("mkdir assets");
    std::fs::create_dir_all(&working).expect("mkdir client");

    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(tokio::sync::Mutex::new(SessionStore::new()));
    let state = Arc::new(StateMachine::new());
    let diagnostics = Arc::new(Diagnostics::new());
    let dyn_deployer: Arc<dyn Deployer> = deployer.clone();
    let dyn_sink: Arc<dyn CommandSink> = sink.clone();

    let orchestrator = RespawnOrchestrator::start(RespawnDeps {
        client: ClientConfig {
            executable: working.join("client.bin"),
            working_dir: working.clone(),
            args: vec!["--windowed".into()],
        },
        timing: timing(resync_delay_ms),
        deployer: dyn_deployer,
        sink: dyn_sink,
        store: Arc::clone(&store),
        state: Arc::clone(&state),
        diagnostics: Arc::clone(&diagnostics),
    });

    Fixture {
        _temp: temp,
        assets,
        working,
        deployer,
        sink,
        store,
        state,
        diagnostics,
        orchestrator,
    }
}

fn fixture() -> Fixture {
    let (deployer, _) = recording_deployer();
    fixture_with(deployer, 50)
}

fn write_asset(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"scene-bytes").expect("write asset");
    path
}

async fn next_cycle(cycles: &mut Subscription<CycleReport>) -> CycleReport {
    tokio::time::timeout(WAIT, cycles.recv())
        .await
        .expect("cycle before timeout")
        .expect("stream open")
}

// ── Cycle steps ───────────────────────────────────────────

/// An asset trigger copies into the working dir and spawns with the asset
/// name appended to the configured arguments.
#[tokio::test]
async fn asset_cycle_stages_and_spawns() {
    let fx = fixture();
    let mut cycles = fx.orchestrator.subscribe();
    let asset = write_asset(&fx.assets, "scene.kzb");

    assert!(fx.orchestrator.signal(asset.clone()));
    let report = next_cycle(&mut cycles).await;

    assert_eq!(report.trigger, Trigger::Asset(asset.clone()));
    assert_eq!(report.outcome, CycleOutcome::Completed(None));
    assert_eq!(
        fx.deployer.calls(),
        vec![
            DeployCall::Copy(asset, fx.working.join("scene.kzb")),
            DeployCall::Spawn(
                fx.working.join("client.bin"),
                vec!["--windowed".into(), "scene.kzb".into()],
                fx.working.clone()
            ),
        ]
    );
    let current = fx.orchestrator.current_process().expect("client tracked");
    assert!(current.is_running());

    fx.orchestrator.shutdown().await;
}

/// A second cycle kills the client the first one started.
#[tokio::test]
async fn second_cycle_kills_previous_client() {
    let fx = fixture();
    let mut cycles = fx.orchestrator.subscribe();
    let asset = write_asset(&fx.assets, "scene.kzb");

    fx.orchestrator.submit(Trigger::Asset(asset.clone()));
    next_cycle(&mut cycles).await;
    let first = fx.orchestrator.current_process().expect("first client");

    fx.orchestrator.submit(Trigger::Restart);
    let report = next_cycle(&mut cycles).await;
    assert!(matches!(report.outcome, CycleOutcome::Completed(_)));

    assert!(!first.is_running(), "previous client was stopped");
    assert!(first.kill_requested());
    let spawns = fx.deployer.spawns();
    assert_eq!(spawns.len(), 2);
    assert!(fx
        .deployer
        .calls()
        .contains(&DeployCall::Kill(first.pid().expect("pid"))));
    // Restart reuses the staged asset name.
    assert_eq!(
        spawns[1],
        DeployCall::Spawn(
            fx.working.join("client.bin"),
            vec!["--windowed".into(), "scene.kzb".into()],
            fx.working.clone()
        )
    );

    fx.orchestrator.shutdown().await;
}

/// Two signals for the same path inside the window run one cycle.
#[tokio::test]
async fn debounced_signals_run_one_cycle() {
    let fx = fixture();
    let mut cycles = fx.orchestrator.subscribe();
    let asset = write_asset(&fx.assets, "scene.kzb");

    assert!(fx.orchestrator.signal(asset.clone()));
    assert!(!fx.orchestrator.signal(asset.clone()));
    next_cycle(&mut cycles).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cycles.try_recv().is_none(), "no second cycle");
    assert_eq!(fx.deployer.spawns().len(), 1);

    fx.orchestrator.shutdown().await;
}

// ── Queueing ──────────────────────────────────────────────

/// While a cycle runs, only the newest waiting trigger survives.
#[tokio::test]
async fn waiting_trigger_is_replaced_by_newer_one() {
    let (deployer, _) = recording_deployer();
    let fx = fixture_with(deployer, 300);
    let mut cycles = fx.orchestrator.subscribe();
    let a = write_asset(&fx.assets, "a.kzb");
    let b = write_asset(&fx.assets, "b.kzb");
    let c = write_asset(&fx.assets, "c.kzb");

    fx.orchestrator.submit(Trigger::Asset(a.clone()));
    tokio::time::timeout(WAIT, async {
        while fx.deployer.spawns().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first cycle spawned");

    assert_eq!(fx.orchestrator.submit(Trigger::Asset(b)), Queued::Fresh);
    assert_eq!(fx.orchestrator.submit(Trigger::Asset(c.clone())), Queued::Replaced);

    assert_eq!(next_cycle(&mut cycles).await.trigger, Trigger::Asset(a));
    assert_eq!(next_cycle(&mut cycles).await.trigger, Trigger::Asset(c));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cycles.try_recv().is_none(), "replaced trigger never ran");

    fx.orchestrator.shutdown().await;
}

// ── Aborts ────────────────────────────────────────────────

/// An asset deleted before the settle delay ends aborts the cycle.
#[tokio::test]
async fn missing_asset_aborts_cycle() {
    let fx = fixture();
    let mut cycles = fx.orchestrator.subscribe();
    let mut lines = fx.diagnostics.subscribe();

    fx.orchestrator
        .submit(Trigger::Asset(fx.assets.join("gone.kzb")));
    let report = next_cycle(&mut cycles).await;

    let CycleOutcome::Aborted(reason) = report.outcome else {
        panic!("expected abort, got {:?}", report.outcome);
    };
    assert!(reason.contains("asset no longer exists"), "{reason}");
    assert!(fx.deployer.calls().is_empty(), "nothing copied or spawned");

    let warning = std::iter::from_fn(|| lines.try_recv())
        .find(|line| line.level == DiagnosticLevel::Warn)
        .expect("warning emitted");
    assert!(warning.message.starts_with("respawn aborted:"), "{}", warning.message);

    fx.orchestrator.shutdown().await;
}

#[tokio::test]
async fn copy_failure_aborts_before_spawn() {
    let fx = fixture_with(Arc::new(RecordingDeployer::failing_copy()), 50);
    let mut cycles = fx.orchestrator.subscribe();
    let asset = write_asset(&fx.assets, "scene.kzb");

    fx.orchestrator.submit(Trigger::Asset(asset));
    let report = next_cycle(&mut cycles).await;

    assert!(matches!(report.outcome, CycleOutcome::Aborted(ref r) if r.starts_with("asset copy:")));
    assert!(fx.deployer.spawns().is_empty());
    assert!(fx.orchestrator.current_process().is_none());

    fx.orchestrator.shutdown().await;
}

/// A kill that fails keeps the old client tracked and blocks new spawns.
#[tokio::test]
async fn failed_kill_keeps_client_tracked() {
    let fx = fixture_with(Arc::new(RecordingDeployer::failing_kill()), 20);
    let mut cycles = fx.orchestrator.subscribe();

    fx.orchestrator.submit(Trigger::Restart);
    assert!(matches!(
        next_cycle(&mut cycles).await.outcome,
        CycleOutcome::Completed(_)
    ));
    let first = fx.orchestrator.current_process().expect("first client");

    for _ in 0..2 {
        fx.orchestrator.submit(Trigger::Restart);
        let report = next_cycle(&mut cycles).await;
        assert!(
            matches!(report.outcome, CycleOutcome::Aborted(ref r) if r.starts_with("process:")),
            "{:?}",
            report.outcome
        );
        let tracked = fx.orchestrator.current_process().expect("still tracked");
        assert_eq!(tracked.pid(), first.pid());
        assert!(tracked.is_running());
    }

    assert_eq!(fx.deployer.spawns().len(), 1, "no second client started");
    let kills = fx
        .deployer
        .calls()
        .into_iter()
        .filter(|call| matches!(call, DeployCall::Kill(_)))
        .count();
    assert_eq!(kills, 2, "each cycle retries the kill");

    fx.orchestrator.shutdown().await;
}

// ── Replay ────────────────────────────────────────────────

/// With a client connected at resync time, the overlay is replayed.
#[tokio::test]
async fn connected_client_gets_overlay_after_resync() {
    let fx = fixture();
    let mut cycles = fx.orchestrator.subscribe();
    {
        let mut store = fx.store.lock().await;
        store.apply(InterfaceId::new("Screen1", "visible"), "bool", "False");
        store.apply(InterfaceId::new("Screen2", "Speed"), "int", "88");
    }
    let peer: SocketAddr = "127.0.0.1:41000".parse().expect("addr");
    fx.state.apply(&ConnectionEvent::Connected(peer));

    fx.orchestrator.submit(Trigger::Restart);
    let report = next_cycle(&mut cycles).await;

    let CycleOutcome::Completed(Some(replayed)) = report.outcome else {
        panic!("expected replay, got {:?}", report.outcome);
    };
    assert_eq!(replayed.sent, 2);
    assert_eq!(
        *fx.sink.lines.lock().expect("lock"),
        vec![
            "SYNC::Screen1::bool::visible::false".to_owned(),
            "SYNC::Screen2::int::Speed::88".to_owned()
        ]
    );
    // Restart with nothing staged passes only the configured arguments.
    assert_eq!(
        fx.deployer.spawns(),
        vec![DeployCall::Spawn(
            fx.working.join("client.bin"),
            vec!["--windowed".into()],
            fx.working.clone()
        )]
    );

    fx.orchestrator.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_worker_with_trigger_pending() {
    let (deployer, _) = recording_deployer();
    let fx = fixture_with(deployer, 2_000);
    let asset = write_asset(&fx.assets, "scene.kzb");

    fx.orchestrator.submit(Trigger::Asset(asset));
    tokio::time::timeout(Duration::from_secs(1), fx.orchestrator.shutdown())
        .await
        .expect("shutdown does not wait for the resync delay");
}
