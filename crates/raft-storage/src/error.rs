//! # error
//!
//! why: separate rejected operations from i/o failures so the caller knows what to retry
//! relations: returned by every Log operation, wraps raft-core's EntryError on write
//! what: LogError

use std::io;
use std::path::PathBuf;

use raft_core::EntryError;
use thiserror::Error;

/// errors returned by [`crate::Log`]
///
/// `NotOpen`, `AlreadyOpen`, `EarlierTerm`, `DuplicateIndex` and
/// `CommitIndexRegression` leave the log untouched. after `Write` the file
/// ends at the last committed entry again.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("log is not open")]
    NotOpen,

    #[error("log is already open at {}", .0.display())]
    AlreadyOpen(PathBuf),

    #[error("cannot append entry with earlier term ({term:x}:{index:x} < {last_term:x}:{last_index:x})")]
    EarlierTerm {
        term: u64,
        index: u64,
        last_term: u64,
        last_index: u64,
    },

    #[error("cannot append entry with earlier index in the same term ({term:x}:{index:x} <= {last_term:x}:{last_index:x})")]
    DuplicateIndex {
        term: u64,
        index: u64,
        last_term: u64,
        last_index: u64,
    },

    #[error("commit index ({current}) ahead of requested commit index ({requested})")]
    CommitIndexRegression { current: u64, requested: u64 },

    #[error("unable to recover {} at offset {offset}: {source}", .path.display())]
    Recover {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("unable to write entry {term:x}:{index:x}: {source}")]
    Write {
        term: u64,
        index: u64,
        #[source]
        source: EntryError,
    },

    #[error("unable to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
