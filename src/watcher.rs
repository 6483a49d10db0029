//! File-change notifications for the training log.
//!
//! The monitor loop only sees an `mpsc::Receiver<()>`: every signal means
//! "the log may have changed". This module is one producer of those signals.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Keeps the OS watch alive; dropping it stops notifications.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    dir: PathBuf,
}

impl FileWatcher {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Watch `path` for creation and modification, sending `()` on `tx` for each
/// relevant event. The parent directory is watched so the file may be created
/// after the watch starts; the directory itself must exist.
pub fn watch_file(path: &Path, tx: mpsc::Sender<()>) -> notify::Result<FileWatcher> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name: Option<OsString> = path.file_name().map(|n| n.to_os_string());

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let relevant = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if relevant {
                    // A full channel already has a refresh queued.
                    let _ = tx.try_send(());
                }
            }
            Err(e) => tracing::debug!(error = %e, "log watcher error"),
        },
        Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    Ok(FileWatcher {
        _watcher: watcher,
        dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signals_on_append_to_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let (tx, mut rx) = mpsc::channel(16);

        let watcher = watch_file(&path, tx).unwrap();
        assert_eq!(watcher.dir(), dir.path());

        std::fs::write(&path, "{\"script_args\":{\"num_epochs\":1}}\n").unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(signal, Ok(Some(()))));
    }

    #[tokio::test]
    async fn ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let (tx, mut rx) = mpsc::channel(16);

        let _watcher = watch_file(&path, tx).unwrap();
        std::fs::write(dir.path().join("checkpoint.bin"), b"weights").unwrap();

        let signal = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(signal.is_err(), "unexpected signal for unrelated file");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-yet/metrics.jsonl");
        let (tx, _rx) = mpsc::channel(1);
        assert!(watch_file(&path, tx).is_err());
    }
}
