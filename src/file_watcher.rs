//! Filesystem change notification for log tails.
//!
//! Wraps `notify::RecommendedWatcher` (inotify on Linux, kqueue/FSEvents on
//! macOS) with an async receiver so a tail reader can sleep until its log
//! file changes instead of waiting out a full poll interval.
//!
//! Notification is an optimisation only. Network mounts and some container
//! filesystems never deliver events, so callers always keep a polling
//! fallback and treat every event as "go look", never as data.

use std::ffi::OsString;
use std::path::Path;

use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// How the watched file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Written to in place.
    Grew,
    /// Created, removed or renamed over; the open handle may be stale.
    Replaced,
}

/// Watches one directory and reports events for a single file name in it.
///
/// Watching the parent directory rather than the file itself lets us see the
/// file being created, removed, or replaced.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    file_name: OsString,
    rx: mpsc::UnboundedReceiver<Result<Event, notify::Error>>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Start watching the parent directory of `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if `file` has no parent or file name, the directory
    /// does not exist yet, or the OS watcher cannot be initialized.
    pub fn for_file(file: &Path) -> Result<Self> {
        let dir = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = file
            .file_name()
            .with_context(|| format!("No file name in {}", file.display()))?
            .to_os_string();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch: {}", dir.display()))?;

        log::debug!("[Tail] Watching {} for {:?}", dir.display(), file_name);
        Ok(Self {
            _watcher: watcher,
            file_name,
            rx,
        })
    }

    /// Wait for the next change to the watched file.
    ///
    /// Returns `None` once the underlying watcher has shut down; callers
    /// should then fall back to polling alone.
    pub async fn changed(&mut self) -> Option<Change> {
        loop {
            match self.rx.recv().await? {
                Ok(event) if self.concerns(&event) => {
                    if let Some(change) = change_of(&event.kind) {
                        return Some(change);
                    }
                }
                Ok(_) => {}
                Err(e) => log::debug!("[Tail] File watcher error: {e}"),
            }
        }
    }

    fn concerns(&self, event: &Event) -> bool {
        event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(self.file_name.as_os_str()))
    }
}

/// Reads and watcher bookkeeping map to `None`.
fn change_of(kind: &EventKind) -> Option<Change> {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            Some(Change::Replaced)
        }
        EventKind::Modify(_) => Some(Change::Grew),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_watch_missing_directory_fails() {
        let result = FileWatcher::for_file(Path::new("/nonexistent/path/abc123/run.str"));
        assert!(result.is_err());
    }

    #[test]
    fn test_change_of_event_kinds() {
        use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};

        let cases = [
            (EventKind::Create(CreateKind::File), Some(Change::Replaced)),
            (EventKind::Remove(RemoveKind::File), Some(Change::Replaced)),
            (EventKind::Modify(ModifyKind::Name(RenameMode::To)), Some(Change::Replaced)),
            (EventKind::Modify(ModifyKind::Data(DataChange::Any)), Some(Change::Grew)),
            (EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)), Some(Change::Grew)),
            (EventKind::Access(AccessKind::Any), None),
            (EventKind::Other, None),
        ];
        for (kind, want) in cases {
            assert_eq!(change_of(&kind), want, "{kind:?}");
        }
    }

    #[tokio::test]
    async fn test_events_for_other_files_are_filtered() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut watcher = FileWatcher::for_file(&tmp.path().join("r1.str")).unwrap();

        std::fs::write(tmp.path().join("other.str"), "x\n").unwrap();

        let woke = tokio::time::timeout(Duration::from_millis(300), watcher.changed()).await;
        assert!(woke.is_err(), "woke for a sibling file");
    }

    #[test]
    fn test_debug_impl() {
        let tmp = tempfile::TempDir::new().unwrap();
        let watcher = FileWatcher::for_file(&tmp.path().join("a.str")).unwrap();
        assert!(format!("{watcher:?}").contains("FileWatcher"));
    }
}
