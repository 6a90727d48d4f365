//! Append-only, CRC-guarded log persistence for the Memory Store.
//!
//! Two logs back M: `memories.log` carries every create/update/delete/
//! recover record, `tombstones.log` carries final purge records. Each
//! record is length-prefixed, bincode-encoded, and CRC32-guarded so a
//! torn write at the tail (crash mid-append) is detected and discarded
//! rather than corrupting replay. On start, M replays both logs in
//! order to rebuild its in-memory index (the `version_index` of §6 is
//! that in-memory index itself, not a separate file).
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CollectiveError, CollectiveResult};

/// An append-only log of bincode-encoded, CRC32-guarded records of
/// type `T`. Not internally synchronized; callers serialize writes
/// (Memory Store is single-writer per §5).
pub struct Wal<T> {
    path: PathBuf,
    writer: BufWriter<File>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> Wal<T> {
    /// Open (creating if absent) the log at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> CollectiveResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CollectiveError::internal(format!("failed to create log dir: {e}")))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CollectiveError::internal(format!("failed to open {}: {e}", path.display())))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            _marker: std::marker::PhantomData,
        })
    }

    /// Append `record`, flushing immediately so a crash right after
    /// this call cannot lose it.
    pub fn append(&mut self, record: &T) -> CollectiveResult<()> {
        let encoded = bincode::serialize(record)
            .map_err(|e| CollectiveError::internal(format!("failed to encode wal record: {e}")))?;
        let crc = crc32fast::hash(&encoded);
        let len = encoded.len() as u32;

        self.writer
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.writer.write_all(&crc.to_le_bytes()))
            .and_then(|_| self.writer.write_all(&encoded))
            .and_then(|_| self.writer.flush())
            .map_err(|e| CollectiveError::internal(format!("failed to append wal record: {e}")))
    }

    /// Replay every well-formed record in order. A truncated trailing
    /// record (crash mid-write) or a CRC mismatch stops replay at that
    /// point rather than erroring the whole log.
    pub fn replay(path: impl AsRef<Path>) -> CollectiveResult<Vec<T>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)
            .map_err(|e| CollectiveError::internal(format!("failed to open {}: {e}", path.display())))?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if reader.read_exact(&mut len_buf).is_err() {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if reader.read_exact(&mut crc_buf).is_err() {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let expected_crc = u32::from_le_bytes(crc_buf);

            let mut payload = vec![0u8; len];
            if reader.read_exact(&mut payload).is_err() {
                break;
            }
            if crc32fast::hash(&payload) != expected_crc {
                break;
            }
            match bincode::deserialize::<T>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }

        Ok(records)
    }

    /// Rewrite the log containing only `keep`, atomically swapping it
    /// in. Used by compaction to drop purged-and-expired records.
    pub fn compact(&mut self, keep: &[T]) -> CollectiveResult<()> {
        let tmp_path = self.path.with_extension("compact.tmp");
        {
            let file = File::create(&tmp_path)
                .map_err(|e| CollectiveError::internal(format!("failed to create compaction tmp file: {e}")))?;
            let mut writer = BufWriter::new(file);
            for record in keep {
                let encoded = bincode::serialize(record)
                    .map_err(|e| CollectiveError::internal(format!("failed to encode wal record: {e}")))?;
                let crc = crc32fast::hash(&encoded);
                let len = encoded.len() as u32;
                writer
                    .write_all(&len.to_le_bytes())
                    .and_then(|_| writer.write_all(&crc.to_le_bytes()))
                    .and_then(|_| writer.write_all(&encoded))
                    .map_err(|e| CollectiveError::internal(format!("failed to write compacted wal: {e}")))?;
            }
            writer
                .flush()
                .map_err(|e| CollectiveError::internal(format!("failed to flush compacted wal: {e}")))?;
        }
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| CollectiveError::internal(format!("failed to swap compacted wal: {e}")))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CollectiveError::internal(format!("failed to reopen {}: {e}", self.path.display())))?;
        self.writer = BufWriter::new(file);
        Ok(())
    }
}
