//! Storage engine for BraidDB.
//!
//! This crate provides:
//! - An in-memory B+ tree holding the full ordered key-value map
//! - WAL-first mutation logging through `braid-wal`
//! - Atomic snapshots that bound recovery time by truncating the WAL
//! - Crash recovery: snapshot load followed by WAL tail replay

mod btree;
mod snapshot;

pub use btree::{BTree, Iter, MAX_DEGREE, MIN_KEYS};
pub use snapshot::{snapshot_path_for, Snapshotter, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
