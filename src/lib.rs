#![forbid(unsafe_code)]

//! Session-synchronization harness for a remote rendering client.

pub mod config;
pub mod errors;
pub mod events;
pub mod harness;
pub mod ipc;
pub mod loader;
pub mod process;
pub mod protocol;
pub mod server;
pub mod session;
pub mod state;
pub mod watch;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
