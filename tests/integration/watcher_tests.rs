//! Integration tests for the asset folder watcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use glob::Pattern;
use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, ModifyKind, RenameMode};
use notify::{Event, EventKind};
use scene_sync::config::WatchConfig;
use scene_sync::watch::watcher::{changed_paths, matches_asset};
use scene_sync::watch::{AssetWatcher, WatchControl, WatchState};
use scene_sync::AppError;
use tokio::sync::mpsc;

use super::test_helpers::WAIT;

#[test]
fn pattern_matches_file_name_only() {
    let pattern = Pattern::new("*.kzb").expect("valid glob");
    assert!(matches_asset(&pattern, Path::new("/a/b/scene.kzb")));
    assert!(!matches_asset(&pattern, Path::new("/a/scene.kzb.tmp")));
    assert!(!matches_asset(&pattern, Path::new("/a/kzb/notes.txt")));
}

fn event(kind: EventKind, paths: &[&str]) -> Event {
    paths
        .iter()
        .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
}

/// The old side of a rename is never forwarded.
#[test]
fn renames_forward_only_the_new_name() {
    let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/a/old.kzb"]);
    assert!(changed_paths(&from).is_empty());

    let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/a/new.kzb"]);
    assert_eq!(changed_paths(&to), [PathBuf::from("/a/new.kzb")]);

    let both = event(
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
        &["/a/old.kzb", "/a/new.kzb"],
    );
    assert_eq!(changed_paths(&both), [PathBuf::from("/a/new.kzb")]);
}

#[test]
fn content_changes_count_and_metadata_does_not() {
    let create = event(EventKind::Create(CreateKind::File), &["/a/s.kzb"]);
    assert_eq!(changed_paths(&create).len(), 1);

    let write = event(EventKind::Modify(ModifyKind::Data(DataChange::Any)), &["/a/s.kzb"]);
    assert_eq!(changed_paths(&write).len(), 1);

    let chmod = event(
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
        &["/a/s.kzb"],
    );
    assert!(changed_paths(&chmod).is_empty());

    let read = event(EventKind::Access(AccessKind::Any), &["/a/s.kzb"]);
    assert!(changed_paths(&read).is_empty());
}

#[test]
fn invalid_pattern_is_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = AssetWatcher::start(temp.path(), "[", tx).err().expect("must fail");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn missing_folder_is_io_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = AssetWatcher::start(&temp.path().join("absent"), "*.kzb", tx)
        .err()
        .expect("must fail");
    assert!(matches!(err, AppError::Io(_)));
}

/// Writing a matching file in a subfolder is reported; other files are not.
#[tokio::test]
#[serial_test::serial]
async fn reports_matching_files_recursively() {
    let temp = tempfile::tempdir().expect("tempdir");
    let nested = temp.path().join("drop");
    std::fs::create_dir_all(&nested).expect("mkdir");

    let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
    let watcher = AssetWatcher::start(temp.path(), "*.kzb", tx).expect("watcher starts");
    assert_eq!(watcher.folder(), temp.path());

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(nested.join("notes.txt"), b"ignored").expect("write txt");
    std::fs::write(nested.join("scene.kzb"), b"scene").expect("write asset");

    let path = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("signal before timeout")
        .expect("channel open");
    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("scene.kzb"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(extra) = rx.try_recv() {
        assert_eq!(
            extra.file_name().and_then(|n| n.to_str()),
            Some("scene.kzb"),
            "only matching files are forwarded"
        );
    }
    drop(watcher);
}

// ── Runtime control ───────────────────────────────────────

/// Switching on, moving, and switching off walk through the watch states.
#[test]
fn control_reports_watch_states() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut control = WatchControl::new(&WatchConfig::default());
    assert_eq!(control.status().state, WatchState::Inactive);
    assert_eq!(control.status().pattern, "*.kzb");

    let err = control.enable(&tx).expect_err("no folder yet");
    assert!(matches!(err, AppError::Config(_)));
    assert!(control.status().enabled, "switch stays on");
    assert_eq!(control.status().state, WatchState::Inactive);

    control
        .set_folder(temp.path().to_path_buf(), &tx)
        .expect("watches the folder");
    assert_eq!(control.status().state, WatchState::Active);
    assert_eq!(control.watched_folder(), Some(temp.path()));

    let err = control
        .set_folder(temp.path().join("absent"), &tx)
        .expect_err("missing folder");
    assert!(matches!(err, AppError::Io(_)));
    assert_eq!(control.status().state, WatchState::Ready);
    assert!(control.watched_folder().is_none());

    control.disable();
    let status = control.status();
    assert!(!status.enabled);
    assert_eq!(status.state, WatchState::Inactive);
    assert_eq!(status.folder, Some(temp.path().join("absent")));

    control
        .set_folder(temp.path().to_path_buf(), &tx)
        .expect("no watcher started while off");
    assert!(control.watched_folder().is_none());
}

/// After a folder change, assets in the new folder are reported.
#[tokio::test]
#[serial_test::serial]
async fn moved_watch_reports_from_new_folder() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = temp.path().join("first");
    let second = temp.path().join("second");
    std::fs::create_dir_all(&first).expect("mkdir");
    std::fs::create_dir_all(&second).expect("mkdir");

    let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
    let mut control = WatchControl::new(&WatchConfig {
        folder: first,
        ..WatchConfig::default()
    });
    control.enable(&tx).expect("watches first");
    control.set_folder(second.clone(), &tx).expect("watches second");

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(second.join("scene.kzb"), b"scene").expect("write asset");

    let path = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("signal before timeout")
        .expect("channel open");
    assert!(path.starts_with(&second), "{}", path.display());
    control.disable();
}
