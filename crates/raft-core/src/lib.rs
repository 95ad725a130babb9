//! # raft-core
//!
//! why: define what a replicated log entry is and how it is written to and read from disk
//! relations: used by raft-storage for the durable log, by applications for their command types
//! what: Command capability, command registry, LogEntry and its checksummed line codec

pub mod command;
pub mod error;
pub mod log;

pub use command::{Command, CommandRegistry, CommandRegistryBuilder, NamedCommand, NoopCommand};
pub use error::{EntryError, RegistryError};
pub use log::LogEntry;
