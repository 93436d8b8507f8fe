//! Filesystem watcher for asset packages.
//!
//! Wraps a `notify` watcher over the asset folder (recursive) and forwards
//! the paths of created, modified, or renamed files whose name matches the
//! configured glob. The callback runs on `notify`'s own thread, so paths
//! are handed over through an unbounded channel.

use std::path::{Path, PathBuf};

use glob::Pattern;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn};

use crate::{AppError, Result};

/// Live watch over an asset folder. Dropping it stops the watch.
pub struct AssetWatcher {
    _watcher: RecommendedWatcher,
    folder: PathBuf,
}

impl AssetWatcher {
    /// Start watching `folder` for files matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid glob and `AppError::Io` if
    /// the folder cannot be watched.
    pub fn start(
        folder: &Path,
        pattern: &str,
        tx: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<Self> {
        let _span = info_span!("asset_watcher", folder = %folder.display(), pattern).entered();

        let matcher = Pattern::new(pattern)
            .map_err(|err| AppError::Config(format!("invalid watch pattern '{pattern}': {err}")))?;

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    for path in changed_paths(&event)
                        .iter()
                        .filter(|p| matches_asset(&matcher, p))
                    {
                        debug!(path = %path.display(), kind = ?event.kind, "asset change");
                        if tx.send(path.clone()).is_err() {
                            debug!("asset signal receiver closed");
                        }
                    }
                }
                Err(err) => warn!(%err, "asset watcher error"),
            },
        )
        .map_err(|err| AppError::Io(format!("failed to create asset watcher: {err}")))?;

        watcher
            .watch(folder, RecursiveMode::Recursive)
            .map_err(|err| {
                AppError::Io(format!("failed to watch {}: {err}", folder.display()))
            })?;

        info!("watching for asset packages");
        Ok(Self {
            _watcher: watcher,
            folder: folder.to_path_buf(),
        })
    }

    /// The watched folder.
    #[must_use]
    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

/// Paths an event leaves holding new content.
///
/// Creates and content or name modifications count. The old side of a
/// rename no longer exists and is skipped. Metadata-only and access events
/// yield nothing.
#[must_use]
pub fn changed_paths(event: &Event) -> &[PathBuf] {
    match event.kind {
        EventKind::Create(_) => &event.paths,
        EventKind::Modify(ModifyKind::Metadata(_) | ModifyKind::Name(RenameMode::From)) => &[],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1..).unwrap_or_default()
        }
        EventKind::Modify(_) => &event.paths,
        _ => &[],
    }
}

/// Whether the file name of `path` matches the asset glob.
#[must_use]
pub fn matches_asset(pattern: &Pattern, path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
}
