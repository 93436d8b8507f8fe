//! Per-path suppression of repeated watch signals.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Drops signals for a path that was accepted less than `window` ago.
///
/// Only accepted signals reset a path's clock; suppressed ones do not
/// extend the window.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    accepted: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    /// Create a debouncer with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accepted: HashMap::new(),
        }
    }

    /// Decide whether a signal for `path` observed at `now` goes through.
    pub fn accept(&mut self, path: &Path, now: Instant) -> bool {
        let window = self.window;
        self.accepted
            .retain(|_, last| now.saturating_duration_since(*last) < window);

        if self.accepted.contains_key(path) {
            return false;
        }
        self.accepted.insert(path.to_path_buf(), now);
        true
    }

    /// Paths currently inside their window.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.accepted.len()
    }
}
