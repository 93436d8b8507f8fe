//! Runtime on/off and folder switching for the asset watcher.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

use super::watcher::AssetWatcher;
use crate::config::WatchConfig;
use crate::{AppError, Result};

/// Coarse watcher condition shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Enabled and watching an existing folder.
    Active,
    /// Enabled with a folder set, but not watching (the folder is missing
    /// or could not be watched).
    Ready,
    /// Disabled, or no folder set.
    Inactive,
}

/// Watcher settings and condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchStatus {
    /// Whether watching is switched on.
    pub enabled: bool,
    /// Folder watched recursively, if set.
    pub folder: Option<PathBuf>,
    /// File-name glob asset packages must match.
    pub pattern: String,
    /// Current condition.
    pub state: WatchState,
}

/// Owns the live [`AssetWatcher`] and the settings it was built from.
///
/// Matching paths go to the sender handed to each call, so one receiver
/// sees signals across restarts.
pub struct WatchControl {
    enabled: bool,
    folder: PathBuf,
    pattern: String,
    watcher: Option<AssetWatcher>,
}

impl WatchControl {
    /// Settings from config; nothing is watched until [`enable`](Self::enable).
    #[must_use]
    pub fn new(config: &WatchConfig) -> Self {
        Self {
            enabled: false,
            folder: config.folder.clone(),
            pattern: config.pattern.clone(),
            watcher: None,
        }
    }

    /// Switch watching on and (re)start the watcher.
    ///
    /// The switch stays on when starting fails, leaving the watcher
    /// [`WatchState::Ready`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when no folder is set, or the watcher's
    /// own error when the folder cannot be watched.
    pub fn enable(&mut self, tx: &mpsc::UnboundedSender<PathBuf>) -> Result<()> {
        self.enabled = true;
        self.restart(tx)
    }

    /// Switch watching off and drop the watcher.
    pub fn disable(&mut self) {
        self.enabled = false;
        if self.watcher.take().is_some() {
            info!(folder = %self.folder.display(), "asset watcher stopped");
        }
    }

    /// Point the watcher at `folder`, restarting it when switched on.
    ///
    /// # Errors
    ///
    /// Same as [`enable`](Self::enable) when switched on.
    pub fn set_folder(
        &mut self,
        folder: PathBuf,
        tx: &mpsc::UnboundedSender<PathBuf>,
    ) -> Result<()> {
        info!(folder = %folder.display(), "asset watch folder set");
        self.folder = folder;
        self.watcher = None;
        if self.enabled {
            self.restart(tx)
        } else {
            Ok(())
        }
    }

    /// Current settings and condition.
    #[must_use]
    pub fn status(&self) -> WatchStatus {
        let has_folder = !self.folder.as_os_str().is_empty();
        let state = if self.watcher.is_some() && self.folder.is_dir() {
            WatchState::Active
        } else if self.enabled && has_folder {
            WatchState::Ready
        } else {
            WatchState::Inactive
        };
        WatchStatus {
            enabled: self.enabled,
            folder: has_folder.then(|| self.folder.clone()),
            pattern: self.pattern.clone(),
            state,
        }
    }

    /// The folder a running watcher covers.
    #[must_use]
    pub fn watched_folder(&self) -> Option<&Path> {
        self.watcher.as_ref().map(AssetWatcher::folder)
    }

    fn restart(&mut self, tx: &mpsc::UnboundedSender<PathBuf>) -> Result<()> {
        self.watcher = None;
        if self.folder.as_os_str().is_empty() {
            return Err(AppError::Config("watch folder is not set".into()));
        }
        self.watcher = Some(AssetWatcher::start(&self.folder, &self.pattern, tx.clone())?);
        Ok(())
    }
}
