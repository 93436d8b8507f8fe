//! Client deployment: asset staging, spawning, and termination.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{AppError, Result};

/// Boxed future returned by [`Deployer`] methods.
pub type DeployFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// How a client process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, when the platform reports one.
    pub code: Option<i32>,
    /// Human-readable description.
    pub description: String,
}

impl ProcessExit {
    /// Describe an [`ExitStatus`].
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        let code = status.code();
        let description = code.map_or_else(
            || "terminated by signal".to_owned(),
            |c| format!("exited with code {c}"),
        );
        Self { code, description }
    }

    fn lost(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            description: reason.into(),
        }
    }
}

impl Display for ProcessExit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description)
    }
}

#[derive(Debug)]
struct HandleInner {
    pid: Option<u32>,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    kill: CancellationToken,
    exit: watch::Receiver<Option<ProcessExit>>,
}

/// Shared view of one spawned client process.
///
/// Cloning is cheap; every clone observes the same process.
#[derive(Debug, Clone)]
pub struct ClientProcessHandle {
    inner: Arc<HandleInner>,
}

/// Supervisor side of a [`ClientProcessHandle`]: receives kill requests and
/// reports the exit.
#[derive(Debug)]
pub struct ProcessControl {
    kill: CancellationToken,
    exit: watch::Sender<Option<ProcessExit>>,
}

impl ProcessControl {
    /// Resolves once a kill has been requested through the handle.
    pub async fn kill_requested(&self) {
        self.kill.cancelled().await;
    }

    /// Record the exit. Later calls are ignored.
    pub fn exited(&self, exit: ProcessExit) {
        self.exit.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(exit);
            true
        });
    }
}

impl ClientProcessHandle {
    /// Create a handle and its supervisor side. The start clock begins now.
    #[must_use]
    pub fn new(pid: Option<u32>) -> (Self, ProcessControl) {
        let kill = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        let handle = Self {
            inner: Arc::new(HandleInner {
                pid,
                started_at: Instant::now(),
                started_wall: Utc::now(),
                kill: kill.clone(),
                exit: exit_rx,
            }),
        };
        (handle, ProcessControl { kill, exit: exit_tx })
    }

    /// OS process id, if known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Monotonic start time.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.inner.started_at
    }

    /// Wall-clock start time.
    #[must_use]
    pub fn started_wall(&self) -> DateTime<Utc> {
        self.inner.started_wall
    }

    /// Time since start.
    #[must_use]
    pub fn run_time(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Whether the process is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.exit.borrow().is_none()
    }

    /// Whether the harness asked for this process to be killed.
    #[must_use]
    pub fn kill_requested(&self) -> bool {
        self.inner.kill.is_cancelled()
    }

    /// Ask the supervisor to kill the process. Does not wait.
    pub fn request_kill(&self) {
        self.inner.kill.cancel();
    }

    /// Wait until the process exits.
    pub async fn wait_exit(&self) -> ProcessExit {
        let mut rx = self.inner.exit.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).clone(),
            Err(_) => None,
        };
        exit.unwrap_or_else(|| ProcessExit::lost("process supervisor went away"))
    }
}

/// Copy, kill, and spawn operations the orchestrator depends on.
pub trait Deployer: Send + Sync {
    /// Copy `src` to `dst`, overwriting any existing file.
    fn copy_file<'a>(&'a self, src: &'a Path, dst: &'a Path) -> DeployFuture<'a, ()>;

    /// Kill the process and wait up to `grace` for it to exit.
    fn kill<'a>(&'a self, handle: &'a ClientProcessHandle, grace: Duration)
        -> DeployFuture<'a, ()>;

    /// Start `exe` with `args` in `working_dir`.
    fn spawn<'a>(
        &'a self,
        exe: &'a Path,
        args: &'a [String],
        working_dir: &'a Path,
    ) -> DeployFuture<'a, ClientProcessHandle>;
}

/// Deployer for processes on this machine.
#[derive(Debug, Clone, Default)]
pub struct LocalDeployer;

impl Deployer for LocalDeployer {
    fn copy_file<'a>(&'a self, src: &'a Path, dst: &'a Path) -> DeployFuture<'a, ()> {
        Box::pin(async move {
            let bytes = tokio::fs::copy(src, dst).await.map_err(|err| {
                AppError::AssetCopy(format!(
                    "{} -> {}: {err}",
                    src.display(),
                    dst.display()
                ))
            })?;
            info!(src = %src.display(), dst = %dst.display(), bytes, "asset staged");
            Ok(())
        })
    }

    fn kill<'a>(
        &'a self,
        handle: &'a ClientProcessHandle,
        grace: Duration,
    ) -> DeployFuture<'a, ()> {
        Box::pin(terminate(handle, grace))
    }

    fn spawn<'a>(
        &'a self,
        exe: &'a Path,
        args: &'a [String],
        working_dir: &'a Path,
    ) -> DeployFuture<'a, ClientProcessHandle> {
        Box::pin(async move {
            let mut cmd = Command::new(exe);
            cmd.args(args)
                .current_dir(working_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true);

            let child = cmd.spawn().map_err(|err| {
                AppError::Process(format!("failed to spawn {}: {err}", exe.display()))
            })?;

            let (handle, control) = ClientProcessHandle::new(child.id());
            info!(
                pid = handle.pid().unwrap_or(0),
                exe = %exe.display(),
                "client process spawned"
            );

            let span = info_span!("client_process", pid = handle.pid().unwrap_or(0));
            tokio::spawn(supervise(child, control).instrument(span));
            Ok(handle)
        })
    }
}

/// Request a kill and wait for the exit within `grace`.
///
/// # Errors
///
/// Returns `AppError::Process` if the process is still running after `grace`.
pub async fn terminate(handle: &ClientProcessHandle, grace: Duration) -> Result<()> {
    if !handle.is_running() {
        return Ok(());
    }
    handle.request_kill();
    match tokio::time::timeout(grace, handle.wait_exit()).await {
        Ok(exit) => {
            info!(pid = handle.pid().unwrap_or(0), %exit, "client process terminated");
            Ok(())
        }
        Err(_) => Err(AppError::Process(format!(
            "client process {} did not exit within {grace:?}",
            handle.pid().unwrap_or(0)
        ))),
    }
}

/// Own the child until it exits, killing it on request.
async fn supervise(mut child: Child, control: ProcessControl) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = control.kill_requested() => {
            debug!("kill requested");
            if let Err(err) = child.start_kill() {
                warn!(%err, "failed to signal client process");
            }
            child.wait().await
        }
    };

    let exit = match status {
        Ok(status) => ProcessExit::from_status(status),
        Err(err) => {
            warn!(%err, "error waiting for client process");
            ProcessExit::lost(format!("wait error: {err}"))
        }
    };
    debug!(%exit, "client process exited");
    control.exited(exit);
}

/// Where an asset lands when staged into `working_dir`.
///
/// # Errors
///
/// Returns `AppError::AssetCopy` if `asset` has no file name.
pub fn staged_path(asset: &Path, working_dir: &Path) -> Result<PathBuf> {
    asset
        .file_name()
        .map(|name| working_dir.join(name))
        .ok_or_else(|| AppError::AssetCopy(format!("not a file: {}", asset.display())))
}
