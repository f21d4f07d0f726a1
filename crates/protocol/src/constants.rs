use serde::{Deserialize, Serialize};

/// Size of every path field on the wire, including the NUL terminator.
pub const PATH_LENGTH: usize = 64;

/// Maximum number of missing-chunk runs carried by one status reply.
pub const STATUS_RUNS_MAX: usize = 16;

/// Size of the message type tag that prefixes every frame.
pub const TAG_LEN: usize = 1;

/// Bytes in front of the payload of a chunk data frame (tag + chunk index).
pub const CHUNK_HEADER_LEN: usize = TAG_LEN + 4;

/// Message type identifier (first byte of every frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    // Chunked transfer
    UploadRequest = 0,
    UploadReply = 1,
    DownloadRequest = 2,
    DownloadReply = 3,
    ChunkData = 4,
    StatusRequest = 5,
    StatusReply = 6,

    // Directory listing
    ListRequest = 7,
    ListReply = 8,
    ListEntry = 9,

    // File management
    MoveRequest = 10,
    MoveReply = 11,
    RemoveRequest = 12,
    RemoveReply = 13,
    CopyRequest = 14,
    CopyReply = 15,
    MkfsRequest = 16,
    MkfsReply = 17,

    // Session teardown and verification
    Done = 18,
    CrcRequest = 19,
    CrcReply = 20,

    // Compression
    ZipRequest = 21,
    ZipReply = 22,
}

impl MessageKind {
    /// All message kinds in tag order.
    pub const ALL: [MessageKind; 23] = [
        MessageKind::UploadRequest,
        MessageKind::UploadReply,
        MessageKind::DownloadRequest,
        MessageKind::DownloadReply,
        MessageKind::ChunkData,
        MessageKind::StatusRequest,
        MessageKind::StatusReply,
        MessageKind::ListRequest,
        MessageKind::ListReply,
        MessageKind::ListEntry,
        MessageKind::MoveRequest,
        MessageKind::MoveReply,
        MessageKind::RemoveRequest,
        MessageKind::RemoveReply,
        MessageKind::CopyRequest,
        MessageKind::CopyReply,
        MessageKind::MkfsRequest,
        MessageKind::MkfsReply,
        MessageKind::Done,
        MessageKind::CrcRequest,
        MessageKind::CrcReply,
        MessageKind::ZipRequest,
        MessageKind::ZipReply,
    ];

    /// Parses a wire tag. Returns `None` for unknown tags.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Wire tag of this kind.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_table_order() {
        for (i, kind) in MessageKind::ALL.iter().enumerate() {
            assert_eq!(kind.tag() as usize, i);
            assert_eq!(MessageKind::from_tag(i as u8), Some(*kind));
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_eq!(MessageKind::from_tag(23), None);
        assert_eq!(MessageKind::from_tag(0xFF), None);
    }

    #[test]
    fn message_kind_serializes_as_name() {
        let json = serde_json::to_string(&MessageKind::StatusReply).unwrap();
        assert_eq!(json, "\"StatusReply\"");
    }
}
