//! Kill, stage, spawn, and resync cycles for the rendering client.
//!
//! Triggers flow through a single-slot queue: at most one cycle runs at a
//! time and at most one trigger waits behind it. A trigger arriving while
//! another is already waiting replaces it, so a burst of asset writes ends
//! in one cycle for the newest asset.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::debounce::Debouncer;
use crate::config::{ClientConfig, TimingConfig};
use crate::events::{Diagnostics, EventStream, Subscription};
use crate::process::launcher::staged_path;
use crate::process::{spawn_watchdog, ClientProcessHandle, Deployer};
use crate::protocol::CommandSink;
use crate::session::{replay, ReplayReport, SessionStore};
use crate::state::{AppState, StateMachine};
use crate::{AppError, Result};

/// What a cycle should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Stage this asset package, then restart the client with it.
    Asset(PathBuf),
    /// Restart the client with whatever is already staged.
    Restart,
}

impl Display for Trigger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asset(path) => write!(f, "asset {}", path.display()),
            Self::Restart => f.write_str("restart"),
        }
    }
}

/// Whether a submitted trigger displaced one that was already waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queued {
    /// The slot was empty.
    Fresh,
    /// An older waiting trigger was dropped in favour of this one.
    Replaced,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The client was restarted and the overlay replayed (`None` when the
    /// client had not connected yet at resync time).
    Completed(Option<ReplayReport>),
    /// A step failed; the orchestrator went back to idle.
    Aborted(String),
}

/// One finished cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// What started it.
    pub trigger: Trigger,
    /// How it ended.
    pub outcome: CycleOutcome,
}

/// Collaborators a cycle needs.
pub struct RespawnDeps {
    /// Client executable, arguments, and working directory.
    pub client: ClientConfig,
    /// Delays.
    pub timing: TimingConfig,
    /// Copy/kill/spawn implementation.
    pub deployer: Arc<dyn Deployer>,
    /// Where replayed commands go.
    pub sink: Arc<dyn CommandSink>,
    /// Overlay to replay.
    pub store: Arc<tokio::sync::Mutex<SessionStore>>,
    /// Connection state, read to gate replay and handed to the watchdog.
    pub state: Arc<StateMachine>,
    /// Operator warning stream.
    pub diagnostics: Arc<Diagnostics>,
}

#[derive(Default)]
struct Slot {
    pending: Mutex<Option<Trigger>>,
    wake: Notify,
}

impl Slot {
    fn put(&self, trigger: Trigger) -> Queued {
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(trigger);
        self.wake.notify_one();
        if previous.is_some() {
            Queued::Replaced
        } else {
            Queued::Fresh
        }
    }

    fn take(&self) -> Option<Trigger> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

struct Inner {
    deps: RespawnDeps,
    slot: Slot,
    debouncer: Mutex<Debouncer>,
    current: Mutex<Option<ClientProcessHandle>>,
    staged_asset: Mutex<Option<String>>,
    cycles: EventStream<CycleReport>,
}

/// Watch-and-respawn orchestrator.
pub struct RespawnOrchestrator {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RespawnOrchestrator {
    /// Create the orchestrator and start its worker task.
    #[must_use]
    pub fn start(deps: RespawnDeps) -> Self {
        let debouncer = Debouncer::new(deps.timing.debounce_window());
        let inner = Arc::new(Inner {
            deps,
            slot: Slot::default(),
            debouncer: Mutex::new(debouncer),
            current: Mutex::new(None),
            staged_asset: Mutex::new(None),
            cycles: EventStream::new(),
        });
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(
            worker_loop(Arc::clone(&inner), cancel.clone()).instrument(info_span!("respawn")),
        );
        Self {
            inner,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Raw watch signal. Returns `false` if the debouncer dropped it.
    pub fn signal(&self, path: PathBuf) -> bool {
        self.signal_at(path, Instant::now())
    }

    /// [`signal`](Self::signal) with an explicit observation time.
    pub fn signal_at(&self, path: PathBuf, now: Instant) -> bool {
        let accepted = self
            .inner
            .debouncer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .accept(&path, now);
        if !accepted {
            debug!(path = %path.display(), "watch signal debounced");
            return false;
        }
        self.submit(Trigger::Asset(path));
        true
    }

    /// Queue a cycle without debouncing.
    pub fn submit(&self, trigger: Trigger) -> Queued {
        info!(%trigger, "respawn queued");
        let queued = self.inner.slot.put(trigger);
        if queued == Queued::Replaced {
            debug!("replaced a waiting respawn trigger");
        }
        queued
    }

    /// Subscribe to finished-cycle reports.
    pub fn subscribe(&self) -> Subscription<CycleReport> {
        self.inner.cycles.subscribe()
    }

    /// Drop a cycle-report subscription.
    pub fn unsubscribe(&self, id: u64) {
        self.inner.cycles.unsubscribe(id);
    }

    /// Handle of the most recently spawned client.
    #[must_use]
    pub fn current_process(&self) -> Option<ClientProcessHandle> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the worker, abandoning a running cycle and any waiting trigger.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                debug!(%err, "respawn worker ended abnormally");
            }
        }
    }
}

async fn worker_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        let trigger = match inner.slot.take() {
            Some(trigger) => trigger,
            None => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = inner.slot.wake.notified() => {}
                }
                continue;
            }
        };

        let outcome = tokio::select! {
            () = cancel.cancelled() => break,
            outcome = run_cycle(&inner, &trigger) => outcome,
        };

        if let CycleOutcome::Aborted(reason) = &outcome {
            inner.deps.diagnostics.warn(format!("respawn aborted: {reason}"));
        }
        inner.cycles.publish(CycleReport { trigger, outcome });
    }
    debug!("respawn worker stopped");
}

async fn run_cycle(inner: &Inner, trigger: &Trigger) -> CycleOutcome {
    let span = info_span!("respawn_cycle", %trigger);
    async {
        match cycle_steps(inner, trigger).await {
            Ok(report) => CycleOutcome::Completed(report),
            Err(err) => CycleOutcome::Aborted(err.to_string()),
        }
    }
    .instrument(span)
    .await
}

async fn cycle_steps(inner: &Inner, trigger: &Trigger) -> Result<Option<ReplayReport>> {
    let deps = &inner.deps;
    let working_dir = deps.client.working_dir.as_path();

    if let Trigger::Asset(asset) = trigger {
        tokio::time::sleep(deps.timing.settle_delay()).await;
        if !tokio::fs::try_exists(asset).await.unwrap_or(false) {
            return Err(AppError::AssetCopy(format!(
                "asset no longer exists: {}",
                asset.display()
            )));
        }
    }

    terminate_current(inner).await?;

    let asset_name = match trigger {
        Trigger::Asset(asset) => {
            let name = stage(deps.deployer.as_ref(), asset, working_dir).await?;
            deps.diagnostics.info(format!("staged asset {name}"));
            *inner
                .staged_asset
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(name.clone());
            Some(name)
        }
        Trigger::Restart => inner
            .staged_asset
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone(),
    };

    let mut args = deps.client.args.clone();
    args.extend(asset_name);
    let handle = deps
        .deployer
        .spawn(&deps.client.executable, &args, working_dir)
        .await?;
    drop(spawn_watchdog(
        handle.clone(),
        Arc::clone(&deps.state),
        Arc::clone(&deps.diagnostics),
        deps.timing.crash_threshold(),
    ));
    *inner.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    deps.diagnostics
        .info(format!("started client {}", deps.client.executable.display()));

    tokio::time::sleep(deps.timing.resync_delay()).await;

    if deps.state.current() != AppState::ClientConnected {
        deps.diagnostics
            .info("client not connected yet; overlay will replay on connect");
        return Ok(None);
    }

    let values = deps.store.lock().await.snapshot();
    let report = replay(&values, deps.sink.as_ref(), deps.timing.replay_spacing()).await;
    deps.diagnostics.info(format!(
        "resent {} of {} session values",
        report.sent,
        report.attempted()
    ));
    Ok(Some(report))
}

/// Stop the tracked client. The handle stays tracked until the process is
/// gone, so a failed kill is retried by the next cycle.
async fn terminate_current(inner: &Inner) -> Result<()> {
    let current = inner
        .current
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    let Some(handle) = current else {
        return Ok(());
    };
    if handle.is_running() {
        let killed = inner
            .deps
            .deployer
            .kill(&handle, inner.deps.timing.kill_grace())
            .await;
        if let Err(err) = killed {
            if handle.is_running() {
                return Err(err);
            }
            debug!(%err, "kill reported an error but the client is gone");
        }
        inner.deps.diagnostics.info("stopped existing client");
    }
    inner
        .current
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    Ok(())
}

async fn stage(deployer: &dyn Deployer, asset: &Path, working_dir: &Path) -> Result<String> {
    let dst = staged_path(asset, working_dir)?;
    deployer.copy_file(asset, &dst).await?;
    Ok(dst
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default())
}
