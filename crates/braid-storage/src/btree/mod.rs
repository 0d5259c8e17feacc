//! In-memory B+ tree index with WAL-backed durability.
//!
//! All nodes live in RAM inside an arena; the only on-disk artifacts are
//! the WAL and the snapshot file. Leaves form a doubly-linked chain in key
//! order, which serves full ordered traversal and snapshot writes.
//!
//! Structure:
//! ```text
//!                [ internal: separators + children ]
//!               /                |                   \
//!     [ leaf ] <-> [ leaf ] <-> [ leaf ]   (doubly-linked chain)
//!      k -> v       k -> v       k -> v
//! ```
//!
//! Mutations are logged to the WAL before the in-memory structure changes;
//! recovery loads the latest snapshot and replays the WAL tail.

mod arena;
mod constants;
mod node;
mod tree;

pub use constants::{MAX_DEGREE, MIN_KEYS};
pub use tree::{BTree, Iter};
