//! Configuration structures for BraidDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a store instance.
///
/// A store with no WAL path runs entirely in memory: mutations are served
/// but nothing survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the write-ahead log. `None` disables durability.
    pub wal_path: Option<PathBuf>,
    /// Number of successful mutations between automatic checkpoints.
    /// `0` disables automatic checkpointing.
    pub checkpoint_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            wal_path: None,
            checkpoint_interval: 10_000,
        }
    }
}

impl StoreConfig {
    /// Creates a durable configuration backed by the given WAL path.
    pub fn durable(wal_path: impl Into<PathBuf>) -> Self {
        Self {
            wal_path: Some(wal_path.into()),
            ..Self::default()
        }
    }

    /// Creates an in-memory-only configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }
}
