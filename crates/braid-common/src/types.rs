//! Core data model types and size limits.
//!
//! Keys and values are opaque byte strings. Keys are ordered
//! lexicographically over unsigned byte values; that ordering is the sole
//! basis for all tree invariants and must be stable across platforms.

use bytes::Bytes;

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 128;

/// Maximum value size in bytes.
pub const MAX_VALUE_SIZE: usize = 1024;

/// An opaque key. Empty keys are accepted and sort before everything else.
pub type Key = Bytes;

/// An opaque value. Empty values are accepted.
pub type Value = Bytes;
