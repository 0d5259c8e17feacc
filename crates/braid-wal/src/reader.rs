//! WAL reader for log replay and recovery.

use crate::constants::READ_BUFFER_SIZE;
use crate::record::{WalRecord, WalRecordType};
use braid_common::checksum::Crc32;
use braid_common::{BraidError, Result, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use bytes::Bytes;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::info;

/// Forward streaming reader over a WAL file.
///
/// `read_next` yields records in append order, verifying each CRC. A clean
/// EOF before any byte of the next record is `NotFound`; a short read after
/// any byte of a record has been consumed is `Corruption`.
#[derive(Debug)]
pub struct WalReader {
    buffer: Vec<u8>,
    pos: usize,
    filled: usize,
    exhausted: bool,
    file: File,
}

impl WalReader {
    /// Opens the WAL file read-only.
    ///
    /// A missing or unreadable file yields `NotFound`; callers treat that
    /// as a fresh start with nothing to replay.
    pub fn open(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "WAL file not found (fresh start)");
                return Err(BraidError::NotFound(format!(
                    "WAL file not found: {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(BraidError::NotFound(format!(
                    "WAL file not readable: {} ({})",
                    path.display(),
                    e
                )))
            }
        };

        Ok(Self {
            buffer: vec![0u8; READ_BUFFER_SIZE],
            pos: 0,
            filled: 0,
            exhausted: false,
            file,
        })
    }

    /// Hint that more records may follow. `read_next` returning `NotFound`
    /// is the authoritative end-of-log signal.
    pub fn has_more(&self) -> bool {
        self.pos < self.filled || !self.exhausted
    }

    /// Parses and verifies the next record.
    pub fn read_next(&mut self) -> Result<WalRecord> {
        let mut crc = Crc32::new();

        // Clean EOF is only legal here, before the record's first byte.
        let mut type_buf = [0u8; 1];
        self.read_bytes(&mut type_buf)?;
        let record_type = WalRecordType::try_from(type_buf[0])?;
        crc.update(&type_buf);

        let mut len_buf = [0u8; 4];
        self.read_field(&mut len_buf, "key length")?;
        let key_len = u32::from_le_bytes(len_buf) as usize;
        crc.update(&len_buf);
        if key_len > MAX_KEY_SIZE {
            return Err(BraidError::Corruption(
                "Key length exceeds maximum".to_string(),
            ));
        }

        let mut key = vec![0u8; key_len];
        self.read_field(&mut key, "key data")?;
        crc.update(&key);

        self.read_field(&mut len_buf, "value length")?;
        let value_len = u32::from_le_bytes(len_buf) as usize;
        crc.update(&len_buf);
        if value_len > MAX_VALUE_SIZE {
            return Err(BraidError::Corruption(
                "Value length exceeds maximum".to_string(),
            ));
        }

        let mut value = vec![0u8; value_len];
        self.read_field(&mut value, "value data")?;
        crc.update(&value);

        self.read_field(&mut len_buf, "CRC32")?;
        let stored_crc = u32::from_le_bytes(len_buf);

        let computed_crc = crc.finalize();
        if stored_crc != computed_crc {
            return Err(BraidError::Corruption(format!(
                "CRC mismatch in WAL record (stored: {:#x}, computed: {:#x})",
                stored_crc, computed_crc
            )));
        }

        Ok(WalRecord {
            record_type,
            key: Bytes::from(key),
            value: Bytes::from(value),
        })
    }

    /// Reads a mid-record field; a record boundary here means truncation.
    fn read_field(&mut self, dest: &mut [u8], what: &str) -> Result<()> {
        match self.read_bytes(dest) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Err(BraidError::Corruption(format!(
                "Failed to read {}",
                what
            ))),
            Err(e) => Err(e),
        }
    }

    /// Fills `dest` from the buffered stream.
    ///
    /// Returns `NotFound` on EOF at a field boundary and `Corruption` when
    /// EOF lands partway through `dest`.
    fn read_bytes(&mut self, dest: &mut [u8]) -> Result<()> {
        let mut total_read = 0;
        while total_read < dest.len() {
            if self.pos >= self.filled {
                match self.fill_buffer() {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() && total_read > 0 => {
                        return Err(BraidError::Corruption(
                            "Partial record at end of WAL".to_string(),
                        ));
                    }
                    Err(e) => return Err(e),
                }
            }

            let available = self.filled - self.pos;
            let to_copy = available.min(dest.len() - total_read);
            dest[total_read..total_read + to_copy]
                .copy_from_slice(&self.buffer[self.pos..self.pos + to_copy]);
            self.pos += to_copy;
            total_read += to_copy;
        }
        Ok(())
    }

    fn fill_buffer(&mut self) -> Result<()> {
        let n = loop {
            match self.file.read(&mut self.buffer) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(BraidError::IoError(format!("Failed to read WAL: {}", e)))
                }
            }
        };

        if n == 0 {
            self.exhausted = true;
            return Err(BraidError::NotFound("End of WAL".to_string()));
        }

        self.filled = n;
        self.pos = 0;
        Ok(())
    }
}
