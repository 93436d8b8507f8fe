//! Harness context: wires the control server, state machine, session store,
//! and respawn orchestrator together and exposes the operator operations.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::events::{Diagnostic, Diagnostics, Subscription};
use crate::loader::{BaselineLoader, JsonBaselineLoader};
use crate::process::{Deployer, LocalDeployer};
use crate::protocol::{Command, CommandSink};
use crate::server::{ConnectionEvent, ConnectionServer};
use crate::session::replay::replay;
use crate::session::{
    HistoryEntry, InterfaceId, InterfaceValue, MessageHistory, PreconditionScript, ReplayReport,
    SessionStore, ViewFilter, TOP_MESSAGES,
};
use crate::state::{AppState, StateMachine};
use crate::watch::{
    Queued, RespawnDeps, RespawnOrchestrator, Trigger, WatchControl, WatchStatus,
};
use crate::{AppError, Result};

/// Value name reserved for screenshot requests; edits to it are ignored.
const RESERVED_NAME: &str = "screenshot";

/// Snapshot of harness state for the operator.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessStatus {
    /// Current application state.
    pub state: String,
    /// Address the control server listens on.
    pub listen_addr: Option<SocketAddr>,
    /// Connected client address.
    pub peer: Option<SocketAddr>,
    /// When the client connected.
    pub connected_at: Option<DateTime<Utc>>,
    /// Baseline rows loaded.
    pub baseline_rows: usize,
    /// Overlay entries held.
    pub overlay_entries: usize,
    /// Module names from the last load.
    pub modules: Vec<String>,
    /// Pid of the client the harness spawned.
    pub client_pid: Option<u32>,
    /// Baseline reloads so far.
    pub reloads: u64,
    /// Asset watcher settings and condition.
    pub watch: WatchStatus,
}

/// Outcome of an edit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOutcome {
    /// Recorded in the overlay and delivered to the client.
    Sent,
    /// Recorded in the overlay; no client took it.
    Recorded,
    /// Reserved name; nothing happened.
    Ignored,
}

/// The running harness. Construct once and share behind an `Arc`.
pub struct Harness {
    config: GlobalConfig,
    server: Arc<ConnectionServer>,
    state: Arc<StateMachine>,
    store: Arc<tokio::sync::Mutex<SessionStore>>,
    filter: Mutex<ViewFilter>,
    loader: Arc<dyn BaselineLoader>,
    diagnostics: Arc<Diagnostics>,
    orchestrator: RespawnOrchestrator,
    reloads: AtomicU64,
    syncs: watch::Sender<u64>,
    history: Mutex<MessageHistory>,
    watch: Mutex<WatchControl>,
    signals: mpsc::UnboundedSender<PathBuf>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<PathBuf>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Harness {
    /// Build a harness with the JSON baseline loader and local deployer.
    #[must_use]
    pub fn with_defaults(config: GlobalConfig) -> Arc<Self> {
        Self::new(config, Arc::new(JsonBaselineLoader), Arc::new(LocalDeployer))
    }

    /// Build a harness with explicit collaborators.
    ///
    /// Must be called inside a Tokio runtime; the respawn worker starts
    /// immediately.
    #[must_use]
    pub fn new(
        config: GlobalConfig,
        loader: Arc<dyn BaselineLoader>,
        deployer: Arc<dyn Deployer>,
    ) -> Arc<Self> {
        let server = Arc::new(ConnectionServer::new(config.listen_addr(), &config.timing));
        let state = Arc::new(StateMachine::new());
        let store = Arc::new(tokio::sync::Mutex::new(SessionStore::new()));
        let diagnostics = Arc::new(Diagnostics::new());
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let watch_control = WatchControl::new(&config.watch);

        let sink: Arc<dyn CommandSink> = server.clone();
        let orchestrator = RespawnOrchestrator::start(RespawnDeps {
            client: config.client.clone(),
            timing: config.timing.clone(),
            deployer,
            sink,
            store: Arc::clone(&store),
            state: Arc::clone(&state),
            diagnostics: Arc::clone(&diagnostics),
        });

        Arc::new(Self {
            config,
            server,
            state,
            store,
            filter: Mutex::new(ViewFilter::default()),
            loader,
            diagnostics,
            orchestrator,
            reloads: AtomicU64::new(0),
            syncs: watch::channel(0).0,
            history: Mutex::new(MessageHistory::new()),
            watch: Mutex::new(watch_control),
            signals,
            signal_rx: Mutex::new(Some(signal_rx)),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Load the baseline, start the control server, and start the asset
    /// watcher if enabled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bind` if the control port is unavailable. A
    /// watcher failure is reported as a diagnostic and does not fail start.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let events = self.server.subscribe();
        let pump = tokio::spawn(
            Arc::clone(self)
                .pump_events(events)
                .instrument(info_span!("event_pump")),
        );
        self.track(pump);
        self.forward_asset_signals();

        if let Err(err) = self.reload_baseline().await {
            self.diagnostics.warn(format!("initial baseline load failed: {err}"));
        }

        let addr = self.server.start().await?;

        if self.config.watch.enabled {
            if let Err(err) = self.set_watch_enabled(true) {
                self.diagnostics.warn(format!("asset watcher not started: {err}"));
            }
        }
        Ok(addr)
    }

    /// Stop everything. The spawned client, if any, is killed.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.lock_watch().disable();
        self.orchestrator.shutdown().await;

        if let Some(handle) = self.orchestrator.current_process() {
            if let Err(err) =
                crate::process::launcher::terminate(&handle, self.config.timing.kill_grace()).await
            {
                warn!(%err, "client did not exit on shutdown");
            }
        }

        self.server.stop().await;

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
            if let Err(err) = task.await {
                debug!(%err, "harness task ended abnormally");
            }
        }
        info!("harness stopped");
    }

    /// Record an edit in the overlay, count it in the edit history, and send
    /// it as `SYNC`.
    pub async fn edit(&self, file: &str, name: &str, value_type: &str, value: &str) -> EditOutcome {
        if name.eq_ignore_ascii_case(RESERVED_NAME) {
            debug!(file, "ignoring edit to reserved name");
            return EditOutcome::Ignored;
        }
        let uses = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(file, name, value);
        debug!(file, name, uses, "edit counted");
        self.store
            .lock()
            .await
            .apply(InterfaceId::new(file, name), value_type, value);

        let command = Command::sync(file, value_type, name, value);
        if self.server.send(&command).await {
            EditOutcome::Sent
        } else {
            EditOutcome::Recorded
        }
    }

    /// Send an `ASYNC` command. The overlay is not touched.
    pub async fn send_async(&self, file: &str, name: &str, value_type: &str, value: &str) -> bool {
        self.server
            .send(&Command::asynchronous(file, value_type, name, value))
            .await
    }

    /// Ask the client for a screenshot. Without a path one is generated in
    /// the screenshot directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProtocolViolation` for a path that cannot be sent
    /// on one line, or `AppError::Io` if the screenshot directory cannot be
    /// created.
    pub async fn screenshot(&self, path: Option<PathBuf>) -> Result<(PathBuf, bool)> {
        let path = match path {
            Some(path) if !is_screenshot_path(&path) => {
                return Err(AppError::ProtocolViolation(format!(
                    "unusable screenshot path: {}",
                    path.display()
                )));
            }
            Some(path) => path,
            None => {
                let dir = self.config.screenshot_dir();
                tokio::fs::create_dir_all(&dir).await.map_err(|err| {
                    AppError::Io(format!("cannot create {}: {err}", dir.display()))
                })?;
                dir.join(screenshot_file_name(Utc::now()))
            }
        };
        let sent = self
            .server
            .send(&Command::screenshot(path.to_string_lossy()))
            .await;
        Ok((path, sent))
    }

    /// Empty the overlay. Returns how many entries were dropped.
    pub async fn clear_session(&self) -> usize {
        let removed = self.store.lock().await.clear();
        self.diagnostics.info(format!("cleared {removed} session values"));
        removed
    }

    /// Replay the overlay now. `None` if no client is connected.
    pub async fn resend(&self) -> Option<ReplayReport> {
        if self.state.current() != AppState::ClientConnected {
            self.diagnostics.warn("client not connected; nothing resent");
            return None;
        }
        Some(self.replay_overlay().await)
    }

    /// Apply a precondition script to the overlay and send each step.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Loader` if the script cannot be read.
    pub async fn load_precondition(&self, name: &str) -> Result<ReplayReport> {
        let path = PreconditionScript::resolve(&self.config.precondition_dir(), name);
        let script = PreconditionScript::load(&path)?;
        {
            let mut store = self.store.lock().await;
            for step in &script.steps {
                store.apply(step.id.clone(), &step.value_type, &step.value);
            }
        }
        self.diagnostics.info(format!(
            "playing precondition {} ({} steps)",
            path.display(),
            script.steps.len()
        ));
        let report = replay(
            &script.steps,
            self.server.as_ref(),
            self.config.timing.precondition_spacing(),
        )
        .await;
        if report.failed > 0 {
            self.diagnostics.warn(format!(
                "{} precondition commands were not delivered",
                report.failed
            ));
        }
        Ok(report)
    }

    /// Precondition scripts available in the configured directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Loader` if the directory cannot be listed.
    pub fn preconditions(&self) -> Result<Vec<PathBuf>> {
        PreconditionScript::list(&self.config.precondition_dir())
    }

    /// The most used edits, highest count first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .top(TOP_MESSAGES)
    }

    /// Forget the edit history. Returns how many distinct edits were dropped.
    pub fn clear_history(&self) -> usize {
        let removed = self
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.diagnostics.info(format!("cleared edit history ({removed} entries)"));
        removed
    }

    /// Repeat a remembered edit. The type comes from the loaded values;
    /// `None` when the value is not known.
    pub async fn apply_common(&self, file: &str, name: &str, value: &str) -> Option<EditOutcome> {
        let id = InterfaceId::new(file, name);
        let value_type = self.store.lock().await.value_type(&id).map(str::to_owned);
        let Some(value_type) = value_type else {
            self.diagnostics.warn(format!(
                "cannot find {id}; reload the baseline and try again"
            ));
            return None;
        };
        let outcome = self.edit(file, name, &value_type, value).await;
        self.diagnostics
            .info(format!("applied common edit {name}={value} from {file}"));
        Some(outcome)
    }

    /// Asset watcher settings and condition.
    #[must_use]
    pub fn watch_status(&self) -> WatchStatus {
        self.lock_watch().status()
    }

    /// Switch the asset watcher on or off.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when switching on without a folder, or
    /// `AppError::Io` when the folder cannot be watched. The switch stays on.
    pub fn set_watch_enabled(&self, enabled: bool) -> Result<WatchStatus> {
        let mut control = self.lock_watch();
        if enabled {
            control.enable(&self.signals)?;
            self.diagnostics.info("asset watcher enabled");
        } else {
            control.disable();
            self.diagnostics.info("asset watcher disabled");
        }
        Ok(control.status())
    }

    /// Watch a different folder. A running watcher moves to it.
    ///
    /// # Errors
    ///
    /// Same as [`set_watch_enabled`](Self::set_watch_enabled) when the
    /// watcher is switched on.
    pub fn set_watch_folder(&self, folder: PathBuf) -> Result<WatchStatus> {
        let mut control = self.lock_watch();
        let shown = folder.display().to_string();
        control.set_folder(folder, &self.signals)?;
        self.diagnostics.info(format!("asset watch folder set to {shown}"));
        Ok(control.status())
    }

    /// Restart the client with the already staged asset.
    pub fn start_client(&self) -> Queued {
        self.orchestrator.submit(Trigger::Restart)
    }

    /// Stage `asset` and restart the client, bypassing the debouncer.
    pub fn respawn(&self, asset: PathBuf) -> Queued {
        self.orchestrator.submit(Trigger::Asset(asset))
    }

    /// Effective values. A given filter becomes the current one and is
    /// kept across reloads.
    pub async fn values(&self, filter: Option<ViewFilter>) -> Vec<InterfaceValue> {
        let filter = {
            let mut current = self.filter.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(filter) = filter {
                *current = filter;
            }
            current.clone()
        };
        self.store.lock().await.effective_rows(&filter)
    }

    /// Current status snapshot.
    pub async fn status(&self) -> HarnessStatus {
        let session = self.server.session();
        let store = self.store.lock().await;
        HarnessStatus {
            state: self.state.current().to_string(),
            listen_addr: self.server.local_addr(),
            peer: session.as_ref().map(|s| s.peer_address),
            connected_at: session.map(|s| s.connected_at),
            baseline_rows: store.baseline_len(),
            overlay_entries: store.overlay().len(),
            modules: store.modules().to_vec(),
            client_pid: self
                .orchestrator
                .current_process()
                .filter(crate::process::ClientProcessHandle::is_running)
                .and_then(|handle| handle.pid()),
            reloads: self.reload_count(),
            watch: self.watch_status(),
        }
    }

    /// Reload the baseline from the interface directory. The overlay and
    /// the current filter are kept.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Loader` if the loader fails.
    pub async fn reload_baseline(&self) -> Result<usize> {
        let dir = self.config.interface_dir().to_path_buf();
        let loader = Arc::clone(&self.loader);
        let snapshot = tokio::task::spawn_blocking(move || loader.load_baseline(&dir))
            .await
            .map_err(|err| AppError::Loader(format!("baseline load task failed: {err}")))??;

        for warning in &snapshot.warnings {
            self.diagnostics.warn(warning.clone());
        }
        let rows = snapshot.rows.len();
        self.store.lock().await.replace_baseline(snapshot);
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(rows)
    }

    /// Baseline reloads performed so far.
    #[must_use]
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Number of finished connect resyncs (baseline reload followed by
    /// overlay replay), observable as it changes.
    #[must_use]
    pub fn watch_syncs(&self) -> watch::Receiver<u64> {
        self.syncs.subscribe()
    }

    /// The control server.
    #[must_use]
    pub fn server(&self) -> &Arc<ConnectionServer> {
        &self.server
    }

    /// The state machine (read-only outside this module).
    #[must_use]
    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    /// The respawn orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &RespawnOrchestrator {
        &self.orchestrator
    }

    /// Subscribe to operator diagnostics.
    pub fn subscribe_diagnostics(&self) -> Subscription<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// Drop a diagnostics subscription.
    pub fn unsubscribe_diagnostics(&self, id: u64) {
        self.diagnostics.unsubscribe(id);
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    async fn replay_overlay(&self) -> ReplayReport {
        let values = self.store.lock().await.snapshot();
        if values.is_empty() {
            self.diagnostics.info("no session values to resend");
            return ReplayReport::default();
        }
        self.diagnostics
            .info(format!("resending {} session values", values.len()));
        let report = replay(&values, self.server.as_ref(), self.config.timing.replay_spacing()).await;
        if report.failed > 0 {
            self.diagnostics
                .warn(format!("{} session values were not delivered", report.failed));
        }
        report
    }

    /// Feed server events into the state machine and react to connects.
    async fn pump_events(self: Arc<Self>, mut events: Subscription<ConnectionEvent>) {
        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            info!(status = %event, "connection status");
            let Some(transition) = self.state.apply(&event) else {
                continue;
            };
            if !transition.entered_connected() {
                continue;
            }

            match self.reload_baseline().await {
                Ok(rows) => debug!(rows, "baseline reloaded on connect"),
                Err(err) => self.diagnostics.warn(format!("baseline reload failed: {err}")),
            }

            let harness = Arc::clone(&self);
            let replay_task = tokio::spawn(
                async move {
                    harness.replay_overlay().await;
                    harness.syncs.send_modify(|count| *count += 1);
                }
                .instrument(info_span!("connect_replay")),
            );
            self.track(replay_task);
        }
        self.server.unsubscribe(events.id());
        debug!("event pump stopped");
    }

    /// Hand watcher signals to the orchestrator for the harness lifetime.
    fn forward_asset_signals(self: &Arc<Self>) {
        let Some(mut rx) = self
            .signal_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let harness = Arc::clone(self);
        let forward = tokio::spawn(
            async move {
                loop {
                    let path = tokio::select! {
                        () = harness.cancel.cancelled() => break,
                        path = rx.recv() => match path {
                            Some(path) => path,
                            None => break,
                        },
                    };
                    if harness.orchestrator.signal(path.clone()) {
                        harness
                            .diagnostics
                            .info(format!("asset change detected: {}", path.display()));
                    }
                }
            }
            .instrument(info_span!("asset_signals")),
        );
        self.track(forward);
    }

    fn lock_watch(&self) -> std::sync::MutexGuard<'_, WatchControl> {
        self.watch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }
}

/// Default screenshot file name for a capture taken at `at`.
#[must_use]
pub fn screenshot_file_name(at: DateTime<Utc>) -> String {
    format!("screenshot_{}.png", at.format("%Y%m%d_%H%M%S_%3f"))
}

/// Whether `path` has a usable file name for a screenshot.
#[must_use]
pub fn is_screenshot_path(path: &Path) -> bool {
    path.file_name().is_some() && !path.to_string_lossy().contains(['\n', '\r'])
}
