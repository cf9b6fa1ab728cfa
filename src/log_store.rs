//! Append-only per-run log files.
//!
//! Each run owns one flat text file, `<dir>/<run>.<ext>`, one line per
//! entry. The file is both the durable record of a run and the replay
//! source for late observers (see [`crate::tail`]).
//!
//! # Atomicity
//!
//! Every append is a single `write_all` of `line + "\n"` on a file opened in
//! append mode, done while holding a per-run lock. Two producers writing the
//! same run never interleave partial lines; their relative order is whatever
//! order they acquire the lock in.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use tokio::io::AsyncWriteExt;

use crate::run_id::RunId;

type RunLock = Arc<tokio::sync::Mutex<()>>;

/// Per-run append-only file store.
#[derive(Debug)]
pub struct LogStore {
    dir: PathBuf,
    extension: String,
    sentinel: String,
    /// One writer lock per run; entries die with their last holder.
    locks: Mutex<HashMap<RunId, Weak<tokio::sync::Mutex<()>>>>,
}

impl LogStore {
    /// Create a store rooted at `dir`. Nothing is touched on disk until the
    /// first append.
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>, sentinel: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            sentinel: sentinel.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Location of `run`'s log file.
    pub fn path_for(&self, run: &RunId) -> PathBuf {
        self.dir.join(format!("{}.{}", run.as_str(), self.extension))
    }

    /// Append `line` to `run`'s log, creating the directory and file if needed.
    pub async fn append_line(&self, run: &RunId, line: &str) -> io::Result<()> {
        let lock = self.lock_for(run);
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(run);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append the end-of-run sentinel to `run`'s log.
    pub async fn append_sentinel(&self, run: &RunId) -> io::Result<()> {
        let sentinel = self.sentinel.clone();
        self.append_line(run, &sentinel).await
    }

    fn lock_for(&self, run: &RunId) -> RunLock {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(lock) = locks.get(run).and_then(Weak::upgrade) {
            return lock;
        }

        // Drop entries whose writers have all finished
        locks.retain(|_, weak| weak.strong_count() > 0);

        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(run.clone(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}
