//! WAL constants for record format and buffering.

/// Size of the writer's internal buffer. A maximum-size record
/// (1 + 4 + 128 + 4 + 1024 + 4 bytes) always fits after a flush.
pub const WRITE_BUFFER_SIZE: usize = 4096;

/// Size of the reader's fill buffer.
pub const READ_BUFFER_SIZE: usize = 8192;

/// Size of the per-record CRC-32 trailer in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Size of the length prefix before key and value bytes.
pub const LENGTH_SIZE: usize = 4;

/// Size of the record type tag.
pub const TYPE_SIZE: usize = 1;
