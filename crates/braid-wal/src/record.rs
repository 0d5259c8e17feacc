//! WAL record format.
//!
//! Record format on disk:
//! - type: 1 byte
//! - key_len: 4 bytes (little-endian)
//! - key: variable
//! - value_len: 4 bytes (little-endian)
//! - value: variable
//! - crc32: 4 bytes (little-endian), covering everything before it
//!
//! There is no file header; readers parse records until EOF or corruption.

use crate::constants::{CHECKSUM_SIZE, LENGTH_SIZE, TYPE_SIZE};
use braid_common::checksum::crc32;
use braid_common::{BraidError, Key, Result, Value, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

/// Types of WAL records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Insert or overwrite a key.
    Put = 1,
    /// Delete a key. The record carries an empty value.
    Delete = 2,
    /// Replace the value of an existing key.
    Update = 3,
    /// Snapshot-boundary marker. Carries an empty key and value and is a
    /// no-op during replay.
    Checkpoint = 4,
}

impl TryFrom<u8> for WalRecordType {
    type Error = BraidError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(WalRecordType::Put),
            2 => Ok(WalRecordType::Delete),
            3 => Ok(WalRecordType::Update),
            4 => Ok(WalRecordType::Checkpoint),
            _ => Err(BraidError::Corruption(format!(
                "Invalid WAL record type: {}",
                value
            ))),
        }
    }
}

/// A single mutation record in the WAL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Type of this record.
    pub record_type: WalRecordType,
    /// The key bytes.
    pub key: Key,
    /// The value bytes. Empty for `Delete` and `Checkpoint` records.
    pub value: Value,
}

impl WalRecord {
    /// Creates a put record.
    pub fn put(key: Key, value: Value) -> Self {
        Self {
            record_type: WalRecordType::Put,
            key,
            value,
        }
    }

    /// Creates a delete record.
    pub fn delete(key: Key) -> Self {
        Self {
            record_type: WalRecordType::Delete,
            key,
            value: Bytes::new(),
        }
    }

    /// Creates an update record.
    pub fn update(key: Key, value: Value) -> Self {
        Self {
            record_type: WalRecordType::Update,
            key,
            value,
        }
    }

    /// Creates a checkpoint marker record.
    pub fn checkpoint() -> Self {
        Self {
            record_type: WalRecordType::Checkpoint,
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    /// Returns the total size of this record on disk.
    pub fn size_on_disk(&self) -> usize {
        TYPE_SIZE + LENGTH_SIZE + self.key.len() + LENGTH_SIZE + self.value.len() + CHECKSUM_SIZE
    }

    /// Serializes this record, including its CRC trailer.
    ///
    /// Returns `InvalidArgument` if the key or value exceeds its maximum.
    pub fn encode(&self) -> Result<Bytes> {
        if self.key.len() > MAX_KEY_SIZE {
            return Err(BraidError::InvalidArgument(format!(
                "key length {} exceeds maximum {}",
                self.key.len(),
                MAX_KEY_SIZE
            )));
        }
        if self.value.len() > MAX_VALUE_SIZE {
            return Err(BraidError::InvalidArgument(format!(
                "value length {} exceeds maximum {}",
                self.value.len(),
                MAX_VALUE_SIZE
            )));
        }

        let mut buf = BytesMut::with_capacity(self.size_on_disk());
        buf.put_u8(self.record_type as u8);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_slice(&self.key);
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.value);

        let checksum = crc32(&buf);
        buf.put_u32_le(checksum);

        Ok(buf.freeze())
    }

    /// Parses and verifies one record from the front of a byte slice.
    /// Returns the record and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let min_size = TYPE_SIZE + 2 * LENGTH_SIZE + CHECKSUM_SIZE;
        if data.len() < min_size {
            return Err(BraidError::Corruption("Truncated WAL record".to_string()));
        }

        let record_type = WalRecordType::try_from(data[0])?;

        let key_len = read_u32_le(&data[1..5]) as usize;
        if key_len > MAX_KEY_SIZE {
            return Err(BraidError::Corruption(
                "Key length exceeds maximum".to_string(),
            ));
        }
        if data.len() < min_size + key_len {
            return Err(BraidError::Corruption("Truncated WAL record".to_string()));
        }
        let key = Bytes::copy_from_slice(&data[5..5 + key_len]);

        let value_len_at = 5 + key_len;
        let value_len = read_u32_le(&data[value_len_at..value_len_at + 4]) as usize;
        if value_len > MAX_VALUE_SIZE {
            return Err(BraidError::Corruption(
                "Value length exceeds maximum".to_string(),
            ));
        }
        let value_at = value_len_at + 4;
        if data.len() < value_at + value_len + CHECKSUM_SIZE {
            return Err(BraidError::Corruption("Truncated WAL record".to_string()));
        }
        let value = Bytes::copy_from_slice(&data[value_at..value_at + value_len]);

        let crc_at = value_at + value_len;
        let stored_crc = read_u32_le(&data[crc_at..crc_at + 4]);
        let computed_crc = crc32(&data[..crc_at]);
        if stored_crc != computed_crc {
            return Err(BraidError::Corruption(format!(
                "CRC mismatch in WAL record (stored: {:#x}, computed: {:#x})",
                stored_crc, computed_crc
            )));
        }

        Ok((
            Self {
                record_type,
                key,
                value,
            },
            crc_at + CHECKSUM_SIZE,
        ))
    }
}

fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}
