//! # raft-storage
//!
//! why: provide the durable, crash-recoverable replicated log using standard rust fs apis
//! relations: uses raft-core for entries and their line codec, driven by the consensus protocol
//! what: Log (open/close/append/set_commit_index), LogConfig, LogError

pub mod config;
pub mod error;

pub use config::{LogConfig, SyncMode};
pub use error::LogError;

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use raft_core::{CommandRegistry, LogEntry};
use tracing::{debug, info, warn};

/// a replicated log backed by a single append-only file
///
/// every entry lives in memory; only entries up to the commit index are
/// ever written to the file, in append order. all four operations take the
/// same lock and run to completion on the calling thread.
pub struct Log {
    registry: Arc<CommandRegistry>,
    config: LogConfig,
    inner: Mutex<LogInner>,
}

/// state guarded by the log's lock
#[derive(Default)]
struct LogInner {
    file: Option<File>,
    path: Option<PathBuf>,
    entries: Vec<LogEntry>,
    commit_index: u64,
    /// byte length of the committed lines in the file
    end: u64,
}

/// what a replay of an existing file produced
#[derive(Default)]
struct Replay {
    entries: Vec<LogEntry>,
    /// index of the last replayed entry, if any
    last_index: Option<u64>,
    /// byte length of the valid prefix
    offset: u64,
    truncated_bytes: u64,
}

impl Log {
    /// create an unopened log that resolves commands through `registry`
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self::with_config(registry, LogConfig::default())
    }

    pub fn with_config(registry: Arc<CommandRegistry>, config: LogConfig) -> Self {
        Self {
            registry,
            config,
            inner: Mutex::new(LogInner::default()),
        }
    }

    /// replay the file at `path` (if any) and keep it open for appending
    ///
    /// a line that fails to decode is treated as a torn write: the file is
    /// truncated to the end of the last good entry and replay stops there.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<(), LogError> {
        let path = path.as_ref();
        let mut inner = self.inner.lock();

        if let Some(current) = &inner.path {
            return Err(LogError::AlreadyOpen(current.clone()));
        }

        let replay = if path.exists() {
            self.replay(path)?
        } else {
            Replay::default()
        };

        let file = open_append(path).map_err(|source| LogError::Io {
            op: "open for append",
            path: path.to_path_buf(),
            source,
        })?;

        // a commit index kept across close is never lowered by a shorter file
        if let Some(last_index) = replay.last_index {
            inner.commit_index = inner.commit_index.max(last_index);
        }
        inner.end = replay.offset;
        inner.entries = replay.entries;
        inner.file = Some(file);
        inner.path = Some(path.to_path_buf());

        info!(
            path = %path.display(),
            entries = inner.entries.len(),
            commit_index = inner.commit_index,
            truncated_bytes = replay.truncated_bytes,
            "log opened"
        );
        Ok(())
    }

    fn replay(&self, path: &Path) -> Result<Replay, LogError> {
        let io_err = |op: &'static str, source: io::Error| LogError::Io {
            op,
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(|e| io_err("open", e))?;
        let file_len = file.metadata().map_err(|e| io_err("stat", e))?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            if reader.fill_buf().map_err(|e| io_err("read", e))?.is_empty() {
                break;
            }

            match LogEntry::decode(&mut reader, &self.registry) {
                Ok((entry, n)) => {
                    replay.last_index = Some(entry.index);
                    replay.offset += n as u64;
                    replay.entries.push(entry);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unable to decode log entry");
                    warn!(path = %path.display(), offset = replay.offset, "recovering log");
                    drop(reader);
                    self.truncate(path, replay.offset)?;
                    replay.truncated_bytes = file_len.saturating_sub(replay.offset);
                    break;
                }
            }
        }

        Ok(replay)
    }

    fn truncate(&self, path: &Path, len: u64) -> Result<(), LogError> {
        let recover_err = |source: io::Error| LogError::Recover {
            path: path.to_path_buf(),
            offset: len,
            source,
        };

        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(recover_err)?;
        file.set_len(len).map_err(recover_err)?;
        if self.config.sync == SyncMode::Every {
            file.sync_all().map_err(recover_err)?;
        }
        Ok(())
    }

    /// release the file and drop every in-memory entry
    ///
    /// the commit index is kept, so it never moves backwards over the
    /// lifetime of this value. calling close twice is harmless.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if let Some(path) = inner.path.take() {
            debug!(path = %path.display(), "log closed");
        }
        inner.file = None;
        inner.end = 0;
        inner.entries.clear();
    }

    /// accept an entry into memory; nothing is written until it is committed
    pub fn append(&self, entry: LogEntry) -> Result<(), LogError> {
        let mut inner = self.inner.lock();

        if inner.file.is_none() {
            return Err(LogError::NotOpen);
        }

        if let Some(last) = inner.entries.last() {
            if entry.term < last.term {
                return Err(LogError::EarlierTerm {
                    term: entry.term,
                    index: entry.index,
                    last_term: last.term,
                    last_index: last.index,
                });
            }
            // only an exact repeat of the last index is rejected
            if entry.index == last.index {
                return Err(LogError::DuplicateIndex {
                    term: entry.term,
                    index: entry.index,
                    last_term: last.term,
                    last_index: last.index,
                });
            }
        }

        inner.entries.push(entry);
        Ok(())
    }

    /// write every uncommitted entry with index <= `index` and advance the commit index
    ///
    /// on a write failure the commit index stays at the last entry actually
    /// written and the file is cut back to the end of that entry, so the
    /// caller can retry with another call. if the cut fails the log stops
    /// accepting writes until it is reopened.
    pub fn set_commit_index(&self, index: u64) -> Result<(), LogError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let file = inner.file.as_mut().ok_or(LogError::NotOpen)?;

        if index < inner.commit_index {
            return Err(LogError::CommitIndexRegression {
                current: inner.commit_index,
                requested: index,
            });
        }

        // drop bytes left behind by an earlier failed write
        trim_to(file, inner.end).map_err(|source| LogError::Io {
            op: "trim",
            path: inner.path.clone().unwrap_or_default(),
            source,
        })?;

        let previous = inner.commit_index;
        let mut written = 0usize;
        let mut failure = None;
        for entry in &inner.entries {
            if entry.index > inner.commit_index && entry.index <= index {
                match entry.encode(file) {
                    Ok(n) => {
                        inner.end += n as u64;
                        inner.commit_index = entry.index;
                        written += 1;
                    }
                    Err(source) => {
                        failure = Some(LogError::Write {
                            term: entry.term,
                            index: entry.index,
                            source,
                        });
                        break;
                    }
                }
            }
        }

        if let Some(err) = failure {
            if let Err(e) = trim_to(file, inner.end) {
                warn!(
                    error = %e,
                    offset = inner.end,
                    "unable to remove partial entry, closing log for writes"
                );
                inner.file = None;
            }
            return Err(err);
        }

        if written > 0 && self.config.sync == SyncMode::Every {
            file.sync_data().map_err(|source| LogError::Io {
                op: "sync",
                path: inner.path.clone().unwrap_or_default(),
                source,
            })?;
        }

        debug!(
            from = previous,
            to = inner.commit_index,
            written,
            "commit index advanced"
        );
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().file.is_some()
    }

    /// path of the open file, if any
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().path.clone()
    }

    pub fn commit_index(&self) -> u64 {
        self.inner.lock().commit_index
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// snapshot of all in-memory entries, committed or not
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.clone()
    }

    /// the most recently appended entry with this index
    pub fn entry(&self, index: u64) -> Option<LogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .rev()
            .find(|e| e.index == index)
            .cloned()
    }

    /// index of the last in-memory entry, 0 when empty
    pub fn last_index(&self) -> u64 {
        self.inner.lock().entries.last().map_or(0, |e| e.index)
    }

    /// term of the last in-memory entry, 0 when empty
    pub fn last_term(&self) -> u64 {
        self.inner.lock().entries.last().map_or(0, |e| e.term)
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }
}

/// cut `file` back to `len` bytes if anything was written past it
fn trim_to(file: &File, len: u64) -> io::Result<()> {
    if file.metadata()?.len() > len {
        file.set_len(len)?;
    }
    Ok(())
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.append(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_core::NoopCommand;
    use std::fs;
    use tempfile::tempdir;

    fn noop_log() -> Log {
        let registry = CommandRegistry::builder().register::<NoopCommand>().build();
        Log::new(Arc::new(registry))
    }

    #[test]
    fn append_requires_open_log() {
        let log = noop_log();
        let err = log.append(LogEntry::new(1, 1, NoopCommand {})).unwrap_err();
        assert!(matches!(err, LogError::NotOpen));
    }

    #[test]
    fn open_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log");
        let log = noop_log();

        log.open(&path).unwrap();

        assert!(log.is_open());
        assert!(path.exists());
        assert_eq!(log.commit_index(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn open_twice_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log");
        let log = noop_log();

        log.open(&path).unwrap();
        let err = log.open(&path).unwrap_err();
        assert!(matches!(err, LogError::AlreadyOpen(ref p) if p == &path));
    }

    #[test]
    fn commit_writes_only_committed_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log");
        let log = noop_log();
        log.open(&path).unwrap();

        log.append(LogEntry::new(1, 1, NoopCommand {})).unwrap();
        log.append(LogEntry::new(1, 2, NoopCommand {})).unwrap();
        log.append(LogEntry::new(2, 3, NoopCommand {})).unwrap();
        log.set_commit_index(2).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(log.commit_index(), 2);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let log = noop_log();
        log.open(dir.path().join("log")).unwrap();

        log.close();
        log.close();

        assert!(!log.is_open());
        assert!(log.path().is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn commit_on_unopened_log_fails() {
        let log = noop_log();
        assert!(matches!(log.set_commit_index(1), Err(LogError::NotOpen)));
    }
}
