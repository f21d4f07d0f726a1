//! Persistent per-transfer chunk map.
//!
//! The map lives next to the data file as `<data-file>.map` and holds one
//! byte per chunk: `+` once the chunk is on disk, `-` while it is missing.
//! Each entry is flushed to storage right after the chunk data itself, so
//! after a crash every `+` names a chunk that really is in the data file.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use skyftp_protocol::StatusRun;
use tracing::debug;

use crate::TransferError;
use crate::status::missing_runs;

/// Marker of a delivered chunk.
pub const DELIVERED: u8 = b'+';

/// Marker of a missing chunk.
pub const MISSING: u8 = b'-';

/// Returns the map path that belongs to `data_path`.
pub fn map_path(data_path: &Path) -> PathBuf {
    let mut name = OsString::from(data_path.as_os_str());
    name.push(".map");
    PathBuf::from(name)
}

/// Completion state of one transfer, mirrored in memory and on disk.
pub struct ChunkMap {
    file: File,
    path: PathBuf,
    entries: Vec<u8>,
    delivered: u32,
    resumed: bool,
}

impl ChunkMap {
    /// Opens the map of `data_path` for a transfer of `chunk_count` chunks.
    ///
    /// - neither file exists: a new map with every chunk missing is created;
    ///   the caller creates the data file.
    /// - both exist: the map is reopened to resume, its length must match.
    /// - only the data file exists: [`TransferError::AlreadyExists`].
    /// - only the map exists: [`TransferError::OrphanMap`].
    pub fn open_or_create(data_path: &Path, chunk_count: u32) -> Result<Self, TransferError> {
        let path = map_path(data_path);
        let data_exists = data_path.exists();
        let map_exists = path.exists();

        match (data_exists, map_exists) {
            (true, true) => Self::open(path, chunk_count),
            (false, false) => Self::create(path, chunk_count),
            (true, false) => Err(TransferError::AlreadyExists(
                data_path.display().to_string(),
            )),
            (false, true) => Err(TransferError::OrphanMap(path.display().to_string())),
        }
    }

    fn create(path: PathBuf, chunk_count: u32) -> Result<Self, TransferError> {
        let entries = vec![MISSING; chunk_count as usize];
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(&entries)?;
        file.sync_all()?;

        debug!(path = %path.display(), chunk_count, "chunk map created");
        Ok(Self {
            file,
            path,
            entries,
            delivered: 0,
            resumed: false,
        })
    }

    fn open(path: PathBuf, chunk_count: u32) -> Result<Self, TransferError> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len != chunk_count as u64 {
            return Err(TransferError::MapMismatch {
                expected: chunk_count,
                actual: len,
            });
        }

        let mut entries = Vec::with_capacity(chunk_count as usize);
        file.read_to_end(&mut entries)?;
        let delivered = entries.iter().filter(|&&e| e == DELIVERED).count() as u32;

        debug!(path = %path.display(), chunk_count, delivered, "chunk map reopened");
        Ok(Self {
            file,
            path,
            entries,
            delivered,
            resumed: true,
        })
    }

    /// Records chunk `index` as delivered and flushes the entry to storage.
    ///
    /// The chunk data must already be durable.
    pub fn mark_delivered(&mut self, index: u32) -> Result<(), TransferError> {
        let Some(entry) = self.entries.get(index as usize) else {
            return Err(TransferError::InvalidArgument(format!(
                "chunk {index} outside map of {} entries",
                self.entries.len()
            )));
        };
        if *entry == DELIVERED {
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(index as u64))?;
        self.file.write_all(&[DELIVERED])?;
        self.file.sync_data()?;

        self.entries[index as usize] = DELIVERED;
        self.delivered += 1;
        Ok(())
    }

    pub fn is_delivered(&self, index: u32) -> bool {
        self.entries.get(index as usize) == Some(&DELIVERED)
    }

    pub fn count_delivered(&self) -> u32 {
        self.delivered
    }

    pub fn chunk_count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.delivered == self.chunk_count()
    }

    /// Whether the map existed before this session.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Up to `limit` runs of missing chunks, in index order.
    pub fn missing_runs(&self, limit: usize) -> Vec<StatusRun> {
        missing_runs(self.entries.iter().map(|&e| e == DELIVERED), limit)
    }

    /// Durably syncs the map file.
    pub fn sync(&mut self) -> Result<(), TransferError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes and removes the map file.
    pub fn delete(self) -> Result<(), TransferError> {
        let Self { file, path, .. } = self;
        drop(file);
        std::fs::remove_file(&path)?;
        debug!(path = %path.display(), "chunk map removed");
        Ok(())
    }
}

/// Removes the map of `data_path` if there is one.
pub fn remove_map(data_path: &Path) -> Result<bool, TransferError> {
    match std::fs::remove_file(map_path(data_path)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
