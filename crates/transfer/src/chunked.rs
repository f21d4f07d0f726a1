use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::TransferError;
use crate::geometry::ChunkGeometry;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// CRC32 (IEEE 802.3) of `data`.
pub fn checksum_bytes(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// CRC32 (IEEE 802.3) of an entire file.
pub fn calculate_file_checksum(path: &Path) -> Result<u32, TransferError> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads chunks of a local file by index.
pub struct ChunkReader {
    file: File,
    geometry: ChunkGeometry,
}

impl ChunkReader {
    pub fn new(path: &Path, geometry: ChunkGeometry) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        Ok(Self { file, geometry })
    }

    /// Reads chunk `index`: exactly the geometry length of that chunk.
    pub fn read_chunk(&mut self, index: u32) -> Result<Vec<u8>, TransferError> {
        if !self.geometry.contains(index) {
            return Err(TransferError::InvalidArgument(format!(
                "chunk {index} outside file of {} chunks",
                self.geometry.chunk_count()
            )));
        }
        let mut buf = vec![0u8; self.geometry.chunk_len(index)];
        self.file
            .seek(SeekFrom::Start(self.geometry.chunk_offset(index)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Writes chunks into a local file at their geometry offsets.
pub struct ChunkWriter {
    file: File,
    geometry: ChunkGeometry,
}

impl ChunkWriter {
    /// Creates the data file. Fails if it already exists.
    pub fn create(path: &Path, geometry: ChunkGeometry) -> Result<Self, TransferError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Self { file, geometry })
    }

    /// Opens an existing data file to resume a transfer.
    pub fn open(path: &Path, geometry: ChunkGeometry) -> Result<Self, TransferError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file, geometry })
    }

    /// Writes chunk `index` and flushes it to storage.
    ///
    /// `data` must hold at least the geometry length of the chunk; anything
    /// beyond it is ignored.
    pub fn write_chunk(&mut self, index: u32, data: &[u8]) -> Result<(), TransferError> {
        let len = self.geometry.chunk_len(index);
        if data.len() < len {
            return Err(TransferError::ShortChunk {
                chunk: index,
                len: data.len(),
                expected: len,
            });
        }
        self.file
            .seek(SeekFrom::Start(self.geometry.chunk_offset(index)))?;
        self.file.write_all(&data[..len])?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Durably syncs data and metadata.
    pub fn sync(&mut self) -> Result<(), TransferError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn checksum_known_value() {
        assert_eq!(checksum_bytes(b"123456789"), 0xCBF4_3926);
        assert_eq!(checksum_bytes(b""), 0);
    }

    #[test]
    fn calculate_file_checksum_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7) as u8).collect();
        let path = create_test_file(dir.path(), "test.bin", &data);
        assert_eq!(calculate_file_checksum(&path).unwrap(), checksum_bytes(&data));
    }

    #[test]
    fn chunk_reader_reads_by_index() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");
        let geometry = ChunkGeometry::new(10, 4).unwrap();

        let mut reader = ChunkReader::new(&path, geometry).unwrap();
        assert_eq!(reader.read_chunk(2).unwrap(), b"EE");
        assert_eq!(reader.read_chunk(0).unwrap(), b"AABB");
        assert_eq!(reader.read_chunk(1).unwrap(), b"CCDD");
        assert!(reader.read_chunk(3).is_err());
    }

    #[test]
    fn chunk_reader_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let geometry = ChunkGeometry::new(0, 175).unwrap();
        let mut reader = ChunkReader::new(&path, geometry).unwrap();
        assert!(reader.read_chunk(0).unwrap().is_empty());
    }

    #[test]
    fn chunk_writer_writes_out_of_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let geometry = ChunkGeometry::new(11, 5).unwrap();

        let mut writer = ChunkWriter::create(&path, geometry).unwrap();
        writer.write_chunk(2, b"d").unwrap();
        writer.write_chunk(0, b"Hello").unwrap();
        writer.write_chunk(1, b" Worl").unwrap();
        writer.sync().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"Hello World");
    }

    #[test]
    fn chunk_writer_truncates_long_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let geometry = ChunkGeometry::new(7, 5).unwrap();

        let mut writer = ChunkWriter::create(&path, geometry).unwrap();
        writer.write_chunk(1, b"xyPADDING").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"\0\0\0\0\0xy");
    }

    #[test]
    fn chunk_writer_rejects_short_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let geometry = ChunkGeometry::new(10, 5).unwrap();

        let mut writer = ChunkWriter::create(&path, geometry).unwrap();
        assert!(matches!(
            writer.write_chunk(0, b"abc"),
            Err(TransferError::ShortChunk {
                chunk: 0,
                len: 3,
                expected: 5
            })
        ));
    }

    #[test]
    fn chunk_writer_create_refuses_existing() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "out.bin", b"x");
        let geometry = ChunkGeometry::new(1, 1).unwrap();
        assert!(ChunkWriter::create(&path, geometry).is_err());
        assert!(ChunkWriter::open(&path, geometry).is_ok());
    }
}
