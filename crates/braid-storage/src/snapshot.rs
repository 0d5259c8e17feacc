//! Atomic full-state snapshots.
//!
//! Snapshot file format:
//! - header: magic (4), version (4), entry_count (4), header_crc (4),
//!   all little-endian; the CRC covers the 12 bytes before it
//! - entries: key_len (4), key, value_len (4), value, entry_crc (4),
//!   where the CRC covers everything before it
//!
//! A snapshot is written to `<path>.tmp`, fsynced, and renamed into place,
//! so a partially written snapshot is never observed as the canonical
//! file.

use crate::btree::BTree;
use braid_common::checksum::crc32;
use braid_common::{BraidError, Result, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use bytes::{BufMut, BytesMut};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Magic number identifying a snapshot file.
pub const SNAPSHOT_MAGIC: u32 = 0x454D_4252;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Derives the snapshot path from a WAL path (`X` -> `X.snapshot`).
pub fn snapshot_path_for(wal_path: &Path) -> PathBuf {
    let mut path = wal_path.as_os_str().to_os_string();
    path.push(".snapshot");
    PathBuf::from(path)
}

/// Writes and restores complete dumps of the in-memory map.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    snapshot_path: PathBuf,
}

impl Snapshotter {
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
        }
    }

    /// Returns the path of the canonical snapshot file.
    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Returns true if a snapshot file exists.
    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }

    /// Dumps the full tree to disk atomically.
    pub fn create_snapshot(&self, tree: &BTree) -> Result<()> {
        let started = Instant::now();
        let temp_path = temp_snapshot_path(&self.snapshot_path);

        if let Err(e) = self.write_snapshot_file(&temp_path, tree) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &self.snapshot_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(BraidError::IoError(format!(
                "Failed to rename snapshot: {}",
                e
            )));
        }

        info!(
            path = %self.snapshot_path.display(),
            entries = tree.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "snapshot created"
        );
        Ok(())
    }

    fn write_snapshot_file(&self, temp_path: &Path, tree: &BTree) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(temp_path)?;
        let mut writer = BufWriter::new(file);

        // One leaf-chain walk to count, one to write.
        let entry_count = tree.iter().count() as u32;

        let mut header = BytesMut::with_capacity(16);
        header.put_u32_le(SNAPSHOT_MAGIC);
        header.put_u32_le(SNAPSHOT_VERSION);
        header.put_u32_le(entry_count);
        let header_crc = crc32(&header);
        header.put_u32_le(header_crc);
        writer.write_all(&header)?;

        let mut entry = BytesMut::new();
        for (key, value) in tree.iter() {
            entry.clear();
            entry.put_u32_le(key.len() as u32);
            entry.put_slice(key);
            entry.put_u32_le(value.len() as u32);
            entry.put_slice(value);
            let entry_crc = crc32(&entry);
            entry.put_u32_le(entry_crc);
            writer.write_all(&entry)?;
        }

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Loads the snapshot into the tree, which must be in recovering mode
    /// so the replayed entries are not re-logged. A missing snapshot is
    /// not an error.
    pub fn load_snapshot(&self, tree: &mut BTree) -> Result<()> {
        if !self.exists() {
            debug!(path = %self.snapshot_path.display(), "snapshot not found; skipping load");
            return Ok(());
        }

        let started = Instant::now();
        let mut file = File::open(&self.snapshot_path)?;

        let magic = read_u32_le(&mut file)?;
        if magic != SNAPSHOT_MAGIC {
            return Err(BraidError::Corruption(format!(
                "Invalid snapshot magic: {:#x}",
                magic
            )));
        }
        let version = read_u32_le(&mut file)?;
        if version != SNAPSHOT_VERSION {
            return Err(BraidError::Corruption(format!(
                "Unsupported snapshot version: {}",
                version
            )));
        }
        let entry_count = read_u32_le(&mut file)?;
        let stored_header_crc = read_u32_le(&mut file)?;

        let mut header = BytesMut::with_capacity(12);
        header.put_u32_le(SNAPSHOT_MAGIC);
        header.put_u32_le(SNAPSHOT_VERSION);
        header.put_u32_le(entry_count);
        if stored_header_crc != crc32(&header) {
            return Err(BraidError::Corruption(
                "Snapshot header CRC mismatch".to_string(),
            ));
        }

        let mut entry = BytesMut::new();
        for i in 0..entry_count {
            let key = read_chunk(&mut file, MAX_KEY_SIZE, "key", i)?;
            let value = read_chunk(&mut file, MAX_VALUE_SIZE, "value", i)?;
            let stored_entry_crc = read_u32_le(&mut file).map_err(|_| {
                BraidError::Corruption(format!("Failed to read entry CRC at entry {}", i))
            })?;

            entry.clear();
            entry.put_u32_le(key.len() as u32);
            entry.put_slice(&key);
            entry.put_u32_le(value.len() as u32);
            entry.put_slice(&value);
            if stored_entry_crc != crc32(&entry) {
                return Err(BraidError::Corruption(format!(
                    "Entry CRC mismatch at entry {}",
                    i
                )));
            }

            tree.put(&key, &value)?;
        }

        info!(
            path = %self.snapshot_path.display(),
            entries = entry_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "snapshot loaded"
        );
        Ok(())
    }
}

fn temp_snapshot_path(snapshot_path: &Path) -> PathBuf {
    let mut path = snapshot_path.as_os_str().to_os_string();
    path.push(".tmp");
    PathBuf::from(path)
}

fn read_u32_le(file: &mut File) -> Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_chunk(file: &mut File, max_len: usize, what: &str, index: u32) -> Result<Vec<u8>> {
    let len = read_u32_le(file).map_err(|_| {
        BraidError::Corruption(format!("Failed to read {} length at entry {}", what, index))
    })? as usize;
    if len > max_len {
        return Err(BraidError::Corruption(format!(
            "{} length {} at entry {} exceeds maximum {}",
            what, len, index, max_len
        )));
    }
    let mut data = vec![0u8; len];
    file.read_exact(&mut data).map_err(|_| {
        BraidError::Corruption(format!("Failed to read {} data at entry {}", what, index))
    })?;
    Ok(data)
}
