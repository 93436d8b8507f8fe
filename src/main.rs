#![forbid(unsafe_code)]

//! `scene-sync` — session-synchronization harness binary.
//!
//! Loads configuration, starts the control server for the rendering client,
//! the asset watcher, and the IPC server for `scene-sync-ctl`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use scene_sync::config::GlobalConfig;
use scene_sync::harness::Harness;
use scene_sync::ipc::server::spawn_ipc_server;
use scene_sync::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "scene-sync", about = "Rendering client session-synchronization harness", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the control port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("scene-sync bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => {
            info!("no config file given; using defaults");
            GlobalConfig::default()
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    info!(port = config.port, "configuration loaded");

    // ── Start harness ───────────────────────────────────
    let harness = Harness::with_defaults(config);
    let addr = match harness.start().await {
        Ok(addr) => addr,
        Err(err) => {
            error!(%err, "control server failed to start");
            harness.shutdown().await;
            return Err(err);
        }
    };
    info!(%addr, "control server ready");

    let mut diagnostics = harness.subscribe_diagnostics();
    let ct = CancellationToken::new();
    let diag_ct = ct.clone();
    let diag_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = diag_ct.cancelled() => break,
                line = diagnostics.recv() => match line {
                    Some(line) => println!("{line}"),
                    None => break,
                },
            }
        }
    });

    let ipc_handle = match spawn_ipc_server(std::sync::Arc::clone(&harness), ct.clone()) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(%err, "IPC server unavailable; running without operator control");
            None
        }
    };

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    harness.shutdown().await;

    if let Some(handle) = ipc_handle {
        if let Err(err) = handle.await {
            warn!(%err, "IPC server task ended abnormally");
        }
    }
    if let Err(err) = diag_handle.await {
        warn!(%err, "diagnostics task ended abnormally");
    }
    info!("scene-sync shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
