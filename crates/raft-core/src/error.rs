//! # error
//!
//! why: give registry and codec failures enough context to diagnose a log file without re-reading it
//! relations: returned by command.rs and log.rs, wrapped by raft-storage's LogError
//! what: RegistryError, EntryError

use std::io;

use thiserror::Error;

/// Failures of the command registry.
///
/// `InvalidName` and `DuplicateCommandType` are configuration errors raised
/// while the registry is being built; `UnregisteredCommandType` is the only
/// one a built registry can return.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The command type has no usable name (empty, or contains whitespace).
    #[error("invalid command type name: {0:?}")]
    InvalidName(String),

    /// A command type with the same name was already added.
    #[error("command type already exists: {0}")]
    DuplicateCommandType(String),

    /// No command type is registered under this name.
    #[error("unregistered command type: {0}")]
    UnregisteredCommandType(String),
}

/// Failures while encoding or decoding a single log entry line.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("unable to encode command {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unable to read checksum: {0}")]
    ReadChecksum(String),

    #[error("expected space, got {0:02x}")]
    ExpectedSpace(u8),

    /// The input ended before the line terminator, usually a crash mid-write.
    #[error("unexpected EOF after {0} bytes of entry line")]
    UnexpectedEof(usize),

    #[error("unable to read line: {0}")]
    ReadLine(#[source] io::Error),

    #[error("invalid checksum: expected {expected:08x}, calculated {actual:08x}")]
    InvalidChecksum { expected: u32, actual: u32 },

    #[error("unable to scan entry header: {0}")]
    Scan(String),

    #[error("unable to instantiate command ({name}): {source}")]
    Instantiate {
        name: String,
        #[source]
        source: RegistryError,
    },

    #[error("unable to decode command {name} at {term:x}:{index:x}: {source}")]
    Decode {
        name: String,
        term: u64,
        index: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected EOL, got {0:02x}")]
    TrailingByte(u8),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
