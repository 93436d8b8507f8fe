//! Error types shared across the harness.

use std::fmt::{Display, Formatter};

/// Shared harness result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Harness error enumeration covering all failure modes.
///
/// Only [`AppError::Bind`] and [`AppError::Config`] are surfaced to the
/// caller at startup. Everything after a successful server start is caught
/// at the component boundary and turned into a diagnostic line.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The control port could not be bound.
    Bind(String),
    /// Socket or file-system I/O failure.
    Io(String),
    /// A command could not be represented on the wire.
    ProtocolViolation(String),
    /// Client process spawn, kill, or wait failure.
    Process(String),
    /// Asset package could not be staged into the client directory.
    AssetCopy(String),
    /// Baseline or precondition data could not be loaded.
    Loader(String),
    /// Local operator IPC failure.
    Ipc(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Bind(msg) => write!(f, "bind: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::AssetCopy(msg) => write!(f, "asset copy: {msg}"),
            Self::Loader(msg) => write!(f, "loader: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
