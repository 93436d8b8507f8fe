//! Unit tests for per-path watch signal debouncing.

use std::path::Path;
use std::time::{Duration, Instant};

use scene_sync::watch::Debouncer;

const WINDOW: Duration = Duration::from_secs(5);

/// Two signals for the same path inside the window yield one acceptance.
#[test]
fn repeat_within_window_is_dropped() {
    let mut debouncer = Debouncer::new(WINDOW);
    let t0 = Instant::now();
    let path = Path::new("/assets/scene.kzb");

    assert!(debouncer.accept(path, t0));
    assert!(!debouncer.accept(path, t0 + Duration::from_secs(4)));
}

#[test]
fn repeat_after_window_is_accepted() {
    let mut debouncer = Debouncer::new(WINDOW);
    let t0 = Instant::now();
    let path = Path::new("/assets/scene.kzb");

    assert!(debouncer.accept(path, t0));
    assert!(debouncer.accept(path, t0 + WINDOW));
}

#[test]
fn different_paths_are_independent() {
    let mut debouncer = Debouncer::new(WINDOW);
    let t0 = Instant::now();

    assert!(debouncer.accept(Path::new("/a.kzb"), t0));
    assert!(debouncer.accept(Path::new("/b.kzb"), t0));
    assert_eq!(debouncer.tracked(), 2);
}

/// Suppressed signals do not extend the window.
#[test]
fn suppressed_signal_does_not_reset_clock() {
    let mut debouncer = Debouncer::new(WINDOW);
    let t0 = Instant::now();
    let path = Path::new("/assets/scene.kzb");

    assert!(debouncer.accept(path, t0));
    assert!(!debouncer.accept(path, t0 + Duration::from_secs(3)));
    assert!(debouncer.accept(path, t0 + Duration::from_secs(5)));
}

#[test]
fn expired_entries_are_pruned() {
    let mut debouncer = Debouncer::new(WINDOW);
    let t0 = Instant::now();

    debouncer.accept(Path::new("/a.kzb"), t0);
    debouncer.accept(Path::new("/b.kzb"), t0 + Duration::from_secs(10));

    assert_eq!(debouncer.tracked(), 1);
}
