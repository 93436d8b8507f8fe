//! Asset package watching and client respawn.

pub mod control;
pub mod debounce;
pub mod respawn;
pub mod watcher;

pub use control::{WatchControl, WatchState, WatchStatus};
pub use debounce::Debouncer;
pub use respawn::{CycleOutcome, CycleReport, Queued, RespawnDeps, RespawnOrchestrator, Trigger};
pub use watcher::AssetWatcher;
