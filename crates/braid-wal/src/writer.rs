//! WAL writer for appending mutation records.

use crate::constants::WRITE_BUFFER_SIZE;
use crate::record::WalRecord;
use braid_common::Result;
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Buffered append-only writer for the WAL file.
///
/// Records accumulate in an internal buffer and reach the file when the
/// buffer would overflow or on an explicit `flush`/`sync`. A record handed
/// to the writer is durable only after `sync` returns.
pub struct WalWriter {
    path: PathBuf,
    file: File,
    buffer: Vec<u8>,
}

impl WalWriter {
    /// Opens (creating if absent) the WAL file in append mode with
    /// owner-only permissions.
    pub fn open(path: &Path) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path)?;

        info!(path = %path.display(), "WAL opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            buffer: Vec::with_capacity(WRITE_BUFFER_SIZE),
        })
    }

    /// Returns the path of the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of buffered bytes not yet handed to the OS.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a put record.
    pub fn write_put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_record(&WalRecord::put(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
        ))
    }

    /// Appends a delete record.
    pub fn write_delete(&mut self, key: &[u8]) -> Result<()> {
        self.write_record(&WalRecord::delete(Bytes::copy_from_slice(key)))
    }

    /// Appends an update record.
    pub fn write_update(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_record(&WalRecord::update(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
        ))
    }

    /// Appends a checkpoint marker record.
    pub fn write_checkpoint(&mut self) -> Result<()> {
        self.write_record(&WalRecord::checkpoint())
    }

    /// Appends one record to the internal buffer, flushing first if the
    /// record would not fit.
    pub fn write_record(&mut self, record: &WalRecord) -> Result<()> {
        let encoded = record.encode()?;

        if self.buffer.len() + encoded.len() > WRITE_BUFFER_SIZE {
            self.flush()?;
        }
        self.buffer.extend_from_slice(&encoded);
        Ok(())
    }

    /// Writes the buffered payload to the file and clears the buffer.
    ///
    /// `write_all` loops over short writes and retries interrupted calls,
    /// so a returned `Ok` means every buffered byte was handed to the OS.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    /// Flushes, then asks the OS to persist all written bytes to stable
    /// storage.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        // The caller is gone; failures here can only be logged.
        if let Err(e) = self.sync() {
            error!(path = %self.path.display(), error = %e, "WAL flush on close failed");
        }
    }
}
