//! Client exit classification.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};

use super::launcher::{ClientProcessHandle, ProcessExit};
use crate::events::Diagnostics;
use crate::state::StateMachine;

/// How a client run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Exited within the crash threshold.
    CrashedImmediately,
    /// Ran past the threshold without ever connecting.
    NeverConnected,
    /// Ordinary exit.
    Exited,
    /// Killed by the harness itself.
    Terminated,
}

/// Classify an exit by run time and whether the run ever connected.
#[must_use]
pub fn classify(run_time: Duration, reached_connected: bool, crash_threshold: Duration) -> ExitClass {
    if !reached_connected && run_time > crash_threshold {
        ExitClass::NeverConnected
    } else if run_time <= crash_threshold {
        ExitClass::CrashedImmediately
    } else {
        ExitClass::Exited
    }
}

/// Everything known about one finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Classification.
    pub class: ExitClass,
    /// How long the process ran.
    pub run_time: Duration,
    /// Exit status.
    pub exit: ProcessExit,
    /// Whether the run ever reached `ClientConnected`.
    pub reached_connected: bool,
}

impl ExitReport {
    /// Whether this report should be surfaced as a warning.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(
            self.class,
            ExitClass::CrashedImmediately | ExitClass::NeverConnected
        )
    }

    /// Operator-facing lines, headline first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let secs = self.run_time.as_secs_f64();
        match self.class {
            ExitClass::NeverConnected => vec![
                "client started but never connected".to_owned(),
                "most likely cause: missing or incompatible dependent libraries or assets"
                    .to_owned(),
                "copy the required runtime files into the client directory and start it again"
                    .to_owned(),
                format!("client ran for {secs:.1} seconds without connecting ({})", self.exit),
            ],
            ExitClass::CrashedImmediately => vec![
                "client crashed immediately".to_owned(),
                "cause: incompatible build or missing system runtime".to_owned(),
                "check the system crash log and the client's runtime prerequisites".to_owned(),
                format!("client crashed after only {secs:.1} seconds ({})", self.exit),
            ],
            ExitClass::Exited => vec![format!(
                "client process has exited after {secs:.1} seconds ({})",
                self.exit
            )],
            ExitClass::Terminated => vec![format!(
                "client process terminated by harness after {secs:.1} seconds"
            )],
        }
    }
}

/// Watch one client run until it exits, then report it.
///
/// Emits the report on `diagnostics` and, if the state is still
/// `ClientConnected`, drives it to `ClientDisconnected`.
#[must_use]
pub fn spawn_watchdog(
    handle: ClientProcessHandle,
    state: Arc<StateMachine>,
    diagnostics: Arc<Diagnostics>,
    crash_threshold: Duration,
) -> JoinHandle<ExitReport> {
    let connects_at_spawn = state.connect_count();
    let span = info_span!("watchdog", pid = handle.pid().unwrap_or(0));

    tokio::spawn(
        async move {
            let exit = handle.wait_exit().await;
            let run_time = handle.run_time();
            let reached_connected = state.connect_count() > connects_at_spawn;

            let class = if handle.kill_requested() {
                ExitClass::Terminated
            } else {
                classify(run_time, reached_connected, crash_threshold)
            };
            let report = ExitReport {
                class,
                run_time,
                exit,
                reached_connected,
            };

            for line in report.lines() {
                if report.is_warning() {
                    diagnostics.warn(line);
                } else {
                    diagnostics.info(line);
                }
            }

            state.force_disconnected();
            report
        }
        .instrument(span),
    )
}
