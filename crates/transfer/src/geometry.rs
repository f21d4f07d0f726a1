use serde::Serialize;

use crate::TransferError;

/// Number of chunks needed to carry `file_size` bytes. Never less than one,
/// so an empty file still travels as a single empty chunk.
pub fn chunk_count(file_size: u32, chunk_size: u16) -> u32 {
    if chunk_size == 0 {
        return 1;
    }
    file_size.div_ceil(chunk_size as u32).max(1)
}

/// How a file of a given size is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkGeometry {
    file_size: u32,
    chunk_size: u16,
    chunk_count: u32,
}

impl ChunkGeometry {
    pub fn new(file_size: u32, chunk_size: u16) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidArgument(
                "chunk size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            file_size,
            chunk_size,
            chunk_count: chunk_count(file_size, chunk_size),
        })
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u16 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Index of the last chunk.
    pub fn last_chunk(&self) -> u32 {
        self.chunk_count - 1
    }

    /// Size of the last chunk: the remainder, or a full chunk when the file
    /// is an exact multiple of the chunk size.
    pub fn last_chunk_size(&self) -> u32 {
        let rem = self.file_size % self.chunk_size as u32;
        if rem == 0 && self.file_size > 0 {
            self.chunk_size as u32
        } else {
            rem
        }
    }

    /// Payload length of chunk `index`.
    pub fn chunk_len(&self, index: u32) -> usize {
        if index == self.last_chunk() {
            self.last_chunk_size() as usize
        } else {
            self.chunk_size as usize
        }
    }

    /// Byte offset of chunk `index` in the file.
    pub fn chunk_offset(&self, index: u32) -> u64 {
        index as u64 * self.chunk_size as u64
    }

    pub fn contains(&self, index: u32) -> bool {
        index < self.chunk_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_rounds_up() {
        assert_eq!(chunk_count(1000, 175), 6);
        assert_eq!(chunk_count(1050, 175), 6);
        assert_eq!(chunk_count(1051, 175), 7);
        assert_eq!(chunk_count(1, 185), 1);
    }

    #[test]
    fn empty_file_is_one_empty_chunk() {
        let g = ChunkGeometry::new(0, 175).unwrap();
        assert_eq!(g.chunk_count(), 1);
        assert_eq!(g.last_chunk_size(), 0);
        assert_eq!(g.chunk_len(0), 0);
    }

    #[test]
    fn last_chunk_size_remainder() {
        let g = ChunkGeometry::new(1000, 175).unwrap();
        assert_eq!(g.last_chunk(), 5);
        assert_eq!(g.last_chunk_size(), 125);
        assert_eq!(g.chunk_len(0), 175);
        assert_eq!(g.chunk_len(5), 125);
        assert_eq!(g.chunk_offset(5), 875);
    }

    #[test]
    fn exact_multiple_has_full_last_chunk() {
        let g = ChunkGeometry::new(350, 175).unwrap();
        assert_eq!(g.chunk_count(), 2);
        assert_eq!(g.last_chunk_size(), 175);
    }

    #[test]
    fn chunk_lengths_sum_to_file_size() {
        let cases = [
            (0u32, 1u16),
            (1, 1),
            (999, 7),
            (1000, 175),
            (4096, 185),
            (70_000, 65_535),
        ];
        for (size, chunk) in cases {
            let g = ChunkGeometry::new(size, chunk).unwrap();
            let total: u64 = (0..g.chunk_count()).map(|i| g.chunk_len(i) as u64).sum();
            assert_eq!(total, size as u64, "size {size} chunk {chunk}");
        }
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkGeometry::new(10, 0),
            Err(TransferError::InvalidArgument(_))
        ));
    }

    #[test]
    fn contains_checks_range() {
        let g = ChunkGeometry::new(1000, 175).unwrap();
        assert!(g.contains(5));
        assert!(!g.contains(6));
    }
}
