//! Follow a run's log file from the beginning.
//!
//! [`TailReader`] replays every line already in the file, then keeps
//! emitting lines as they are appended, until it reads the end-of-run
//! sentinel. It is the engine behind the pull endpoint.
//!
//! # States
//!
//! ```text
//!            file appears                 EOF + path replaced
//! NotFound ───────────────► Following ─────────────────────────► Rotated
//!    ▲                        │   ▲ │                                │
//!    │      path removed      │   │ │ EOF + len < position           │ reopen
//!    └────────────────────────┘   │ ▼                                │ from 0
//!                                 │ Truncated ── seek 0 ─┐           │
//!                                 └──────────────────────┴───────────┘
//!
//! Following ── sentinel line ──► Closed   (terminal)
//! ```
//!
//! While waiting for growth the reader sleeps until either a filesystem
//! event for the file arrives or the poll interval passes, whichever is
//! first. Polling always runs, so storage that never delivers events still
//! works.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use crate::file_watcher::FileWatcher;

/// Something the observer should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// One complete log line, without its line terminator.
    Line(String),
    /// The sentinel was read. Emitted once; the reader is closed afterwards.
    Done,
}

/// Reader phase, as seen from tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TailPhase {
    /// The file does not exist (yet, or any more).
    NotFound,
    /// Reading an open file.
    Following,
    /// The path was replaced by a different file; about to reopen.
    Rotated,
    /// The file shrank below the read position; about to replay from 0.
    Truncated,
    /// Sentinel seen. No further events.
    Closed,
}

/// Tuning knobs for a tail.
#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Maximum sleep between checks for growth.
    pub poll_interval: Duration,
    /// Pause after each emitted line. Zero disables pacing.
    pub pacing: Duration,
    /// Also wake on filesystem notifications.
    pub fs_events: bool,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            poll_interval: crate::constants::TAIL_POLL_INTERVAL,
            pacing: crate::constants::TAIL_PACING,
            fs_events: true,
        }
    }
}

/// (device, inode) of an open file, used to detect replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity(meta: &std::fs::Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn identity(_meta: &std::fs::Metadata) -> Option<FileIdentity> {
    None
}

#[derive(Debug)]
struct OpenLog {
    reader: BufReader<File>,
    identity: Option<FileIdentity>,
}

#[derive(Debug)]
enum State {
    NotFound,
    Following(OpenLog),
    Rotated,
    Truncated(OpenLog),
    Closed,
}

/// What the file at our path looks like compared to the handle we hold.
enum PathCheck {
    Unchanged,
    Missing,
    Replaced,
    Shrunk,
}

/// Streams one run's log file to one observer.
#[derive(Debug)]
pub struct TailReader {
    path: PathBuf,
    sentinel: String,
    options: TailOptions,
    state: State,
    /// Bytes of the current, not yet terminated line.
    partial: Vec<u8>,
    /// Bytes already emitted as complete lines from the current file.
    consumed: u64,
    watcher: Option<FileWatcher>,
    watch_failed: bool,
    pace_due: bool,
}

impl TailReader {
    /// Create a reader for `path`. The file does not need to exist.
    pub fn new(path: impl Into<PathBuf>, sentinel: impl Into<String>, options: TailOptions) -> Self {
        Self {
            path: path.into(),
            sentinel: sentinel.into(),
            options,
            state: State::NotFound,
            partial: Vec::new(),
            consumed: 0,
            watcher: None,
            watch_failed: false,
            pace_due: false,
        }
    }

    /// Current phase of the state machine.
    #[cfg(test)]
    pub(crate) fn phase(&self) -> TailPhase {
        match self.state {
            State::NotFound => TailPhase::NotFound,
            State::Following(_) => TailPhase::Following,
            State::Rotated => TailPhase::Rotated,
            State::Truncated(_) => TailPhase::Truncated,
            State::Closed => TailPhase::Closed,
        }
    }

    /// Wait for the next line or the end-of-run marker.
    ///
    /// Returns `None` once the reader is closed. Never returns otherwise
    /// until something is available; drop the future (or the reader) to
    /// stop waiting. Cancel safe: a partially read line is kept and the
    /// open file handle survives.
    pub async fn next_event(&mut self) -> Option<TailEvent> {
        if self.pace_due {
            self.pace_due = false;
            if !self.options.pacing.is_zero() {
                tokio::time::sleep(self.options.pacing).await;
            }
        }

        loop {
            let step = match &mut self.state {
                State::Closed => return None,

                State::NotFound | State::Rotated => match open_log(&self.path).await {
                    Ok(Some(log)) => Step::Attach(log),
                    Ok(None) => Step::Wait(Some(State::NotFound)),
                    Err(e) => {
                        log::warn!("[Tail] Failed to open {}: {e}", self.path.display());
                        Step::Wait(Some(State::NotFound))
                    }
                },

                State::Truncated(log) => match log.reader.seek(io::SeekFrom::Start(0)).await {
                    Ok(_) => Step::Resume,
                    Err(e) => {
                        log::warn!("[Tail] Seek failed on {}: {e}", self.path.display());
                        Step::Wait(Some(State::Rotated))
                    }
                },

                State::Following(log) => match log.reader.read_until(b'\n', &mut self.partial).await {
                    Ok(0) => {
                        let position = self.consumed + self.partial.len() as u64;
                        match check_path(&self.path, log.identity, position).await {
                            PathCheck::Unchanged => Step::Wait(None),
                            PathCheck::Missing => {
                                log::info!("[Tail] {} removed, waiting for it to reappear", self.path.display());
                                Step::Goto(State::NotFound)
                            }
                            PathCheck::Replaced => {
                                log::info!("[Tail] {} replaced, reopening", self.path.display());
                                Step::Goto(State::Rotated)
                            }
                            PathCheck::Shrunk => {
                                log::info!("[Tail] {} truncated, replaying from start", self.path.display());
                                Step::Truncate
                            }
                        }
                    }
                    Ok(_) => Step::Line,
                    Err(e) => {
                        log::warn!("[Tail] Read error on {}: {e}", self.path.display());
                        Step::Wait(None)
                    }
                },
            };

            match step {
                Step::Attach(log) => {
                    log::debug!("[Tail] Following {}", self.path.display());
                    self.reset_position();
                    self.state = State::Following(log);
                }
                Step::Resume => {
                    if let State::Truncated(log) = std::mem::replace(&mut self.state, State::Closed) {
                        self.reset_position();
                        self.state = State::Following(log);
                    }
                }
                Step::Truncate => {
                    if let State::Following(log) = std::mem::replace(&mut self.state, State::Closed) {
                        self.state = State::Truncated(log);
                    }
                }
                Step::Goto(next) => {
                    self.reset_position();
                    self.state = next;
                }
                Step::Wait(next) => {
                    if let Some(next) = next {
                        self.state = next;
                    }
                    self.wait().await;
                }
                Step::Line => {
                    if let Some(event) = self.take_line() {
                        return Some(event);
                    }
                    // Unterminated tail of the file; wait for the rest
                }
            }
        }
    }

    /// Turn a complete line in `partial` into an event.
    fn take_line(&mut self) -> Option<TailEvent> {
        if self.partial.last() != Some(&b'\n') {
            return None;
        }

        self.consumed += self.partial.len() as u64;
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        let line = String::from_utf8_lossy(&bytes).into_owned();

        if line == self.sentinel {
            log::info!("[Tail] End marker in {}", self.path.display());
            self.state = State::Closed;
            self.watcher = None;
            return Some(TailEvent::Done);
        }

        self.pace_due = true;
        Some(TailEvent::Line(line))
    }

    fn reset_position(&mut self) {
        self.partial.clear();
        self.consumed = 0;
    }

    /// Sleep until the file may have changed.
    async fn wait(&mut self) {
        self.ensure_watcher();

        let poll = tokio::time::sleep(self.options.poll_interval);
        let watcher_gone = match self.watcher.as_mut() {
            Some(watcher) => tokio::select! {
                change = watcher.changed() => match change {
                    Some(change) => {
                        log::trace!("[Tail] {} {change:?}", self.path.display());
                        false
                    }
                    None => true,
                },
                () = poll => false,
            },
            None => {
                poll.await;
                false
            }
        };

        if watcher_gone {
            log::debug!("[Tail] File watcher closed, polling only");
            self.watcher = None;
            self.watch_failed = true;
        }
    }

    fn ensure_watcher(&mut self) {
        if !self.options.fs_events || self.watcher.is_some() || self.watch_failed {
            return;
        }

        let dir_exists = self
            .path
            .parent()
            .is_none_or(|p| p.as_os_str().is_empty() || p.is_dir());
        if !dir_exists {
            return;
        }

        match FileWatcher::for_file(&self.path) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(e) => {
                log::debug!("[Tail] Change notification unavailable, polling only: {e:#}");
                self.watch_failed = true;
            }
        }
    }
}

/// Transition computed while the current state is borrowed.
enum Step {
    Attach(OpenLog),
    Resume,
    Truncate,
    Goto(State),
    Wait(Option<State>),
    Line,
}

async fn open_log(path: &Path) -> io::Result<Option<OpenLog>> {
    match File::open(path).await {
        Ok(file) => {
            let meta = file.metadata().await?;
            Ok(Some(OpenLog {
                reader: BufReader::new(file),
                identity: identity(&meta),
            }))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn check_path(path: &Path, held: Option<FileIdentity>, position: u64) -> PathCheck {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return PathCheck::Missing,
        Err(e) => {
            log::debug!("[Tail] stat {} failed: {e}", path.display());
            return PathCheck::Unchanged;
        }
    };

    if held.is_some() && identity(&meta) != held {
        return PathCheck::Replaced;
    }
    if meta.len() < position {
        return PathCheck::Shrunk;
    }
    PathCheck::Unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const WAIT: Duration = Duration::from_secs(5);

    fn options() -> TailOptions {
        TailOptions {
            poll_interval: Duration::from_millis(20),
            pacing: Duration::ZERO,
            fs_events: false,
        }
    }

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    async fn next(reader: &mut TailReader) -> Option<TailEvent> {
        tokio::time::timeout(WAIT, reader.next_event())
            .await
            .expect("Timed out waiting for tail event")
    }

    fn line(s: &str) -> Option<TailEvent> {
        Some(TailEvent::Line(s.to_string()))
    }

    #[tokio::test]
    async fn test_replays_history_then_follows_growth() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("r.str");
        append(&path, "one\ntwo\nthree\n");

        let mut reader = TailReader::new(&path, "__END__", options());
        assert_eq!(next(&mut reader).await, line("one"));
        assert_eq!(next(&mut reader).await, line("two"));
        assert_eq!(next(&mut reader).await, line("three"));

        append(&path, "four\n");
        assert_eq!(next(&mut reader).await, line("four"));
        assert_eq!(reader.phase(), TailPhase::Following);
    }

    #[tokio::test]
    async fn test_sentinel_closes_exactly_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("r.str");
        append(&path, "start\n42\n__END__\nafter\n");

        let mut reader = TailReader::new(&path, "__END__", options());
        assert_eq!(next(&mut reader).await, line("start"));
        assert_eq!(next(&mut reader).await, line("42"));
        assert_eq!(next(&mut reader).await, Some(TailEvent::Done));
        assert_eq!(reader.phase(), TailPhase::Closed);

        append(&path, "more\n");
        assert_eq!(next(&mut reader).await, None);
        assert_eq!(next(&mut reader).await, None);
    }

    #[tokio::test]
    async fn test_missing_file_waits_then_attaches() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("late.str");
        let mut reader = TailReader::new(&path, "__END__", options());

        let early = tokio::time::timeout(Duration::from_millis(100), reader.next_event()).await;
        assert!(early.is_err(), "nothing should be emitted before the file exists");
        assert_eq!(reader.phase(), TailPhase::NotFound);

        append(&path, "hello\n");
        assert_eq!(next(&mut reader).await, line("hello"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("live");
        let path = dir.join("r.str");
        let mut reader = TailReader::new(&path, "__END__", TailOptions {
            fs_events: true,
            ..options()
        });

        let early = tokio::time::timeout(Duration::from_millis(100), reader.next_event()).await;
        assert!(early.is_err());

        std::fs::create_dir_all(&dir).unwrap();
        append(&path, "first\n");
        assert_eq!(next(&mut reader).await, line("first"));
    }

    #[tokio::test]
    async fn test_partial_line_is_held_until_terminated() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("r.str");
        append(&path, "hel");

        let mut reader = TailReader::new(&path, "__END__", options());
        let early = tokio::time::timeout(Duration::from_millis(100), reader.next_event()).await;
        assert!(early.is_err(), "unterminated line must not be emitted");

        append(&path, "lo\r\n");
        assert_eq!(next(&mut reader).await, line("hello"));
    }

    #[tokio::test]
    async fn test_truncation_replays_from_start() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("r.str");
        append(&path, "aaaaaaaa\nbbbbbbbb\n");

        let mut reader = TailReader::new(&path, "__END__", options());
        assert_eq!(next(&mut reader).await, line("aaaaaaaa"));
        assert_eq!(next(&mut reader).await, line("bbbbbbbb"));

        // Same inode, shorter content
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        append(&path, "c\n");

        assert_eq!(next(&mut reader).await, line("c"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recreated_file_is_reopened() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("r.str");
        append(&path, "old\n");

        let mut reader = TailReader::new(&path, "__END__", options());
        assert_eq!(next(&mut reader).await, line("old"));

        // Replace via rename so the path points at a new inode
        let staged = tmp.path().join("staged");
        std::fs::write(&staged, "new one\nnew two\n").unwrap();
        std::fs::rename(&staged, &path).unwrap();

        assert_eq!(next(&mut reader).await, line("new one"));
        assert_eq!(next(&mut reader).await, line("new two"));
    }

    #[tokio::test]
    async fn test_pacing_spaces_out_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("r.str");
        append(&path, "a\nb\nc\n");

        let mut reader = TailReader::new(&path, "__END__", TailOptions {
            pacing: Duration::from_millis(40),
            ..options()
        });

        let started = std::time::Instant::now();
        for expected in ["a", "b", "c"] {
            assert_eq!(next(&mut reader).await, line(expected));
        }
        // Two pauses: before "b" and before "c"
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_custom_sentinel() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("r.str");
        append(&path, "__END__\n<<done>>\n");

        let mut reader = TailReader::new(&path, "<<done>>", options());
        assert_eq!(next(&mut reader).await, line("__END__"));
        assert_eq!(next(&mut reader).await, Some(TailEvent::Done));
    }
}
