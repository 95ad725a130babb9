//! # config
//!
//! why: let the embedding process choose how hard the log pushes committed lines to disk
//! relations: passed to Log::with_config
//! what: SyncMode, LogConfig

use serde::{Deserialize, Serialize};

/// when committed lines are forced to stable storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// leave flushing to the os
    #[default]
    None,
    /// fsync after every commit batch and after recovery truncation
    Every,
}

impl SyncMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "every" => Some(Self::Every),
            "none" => Some(Self::None),
            _ => Option::None,
        }
    }
}

/// configuration for a [`crate::Log`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub sync: SyncMode,
}

impl LogConfig {
    pub fn with_sync(sync: SyncMode) -> Self {
        Self { sync }
    }
}
