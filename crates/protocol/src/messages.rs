use bytes::Bytes;

use crate::constants::MessageKind;
use crate::types::{Backend, EntryKind, Status, StatusRun, ZipAction};

/// Ground → remote: start an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub chunk_size: u16,
    pub file_size: u32,
    pub crc32: u32,
    /// Destination address for memory uploads (0 for path based transfers).
    pub mem_addr: u32,
    pub backend: Backend,
    pub path: String,
}

/// Ground → remote: start a download session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub chunk_size: u16,
    pub mem_addr: u32,
    pub mem_size: u32,
    pub backend: Backend,
    /// Source path; empty for raw memory downloads.
    pub path: String,
}

/// Remote → ground: answer to a [`DownloadRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReply {
    pub status: Status,
    pub file_size: u32,
    pub crc32: u32,
}

/// Completion state of one side, with the first missing runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    pub status: Status,
    pub complete: u32,
    pub total: u32,
    pub runs: Vec<StatusRun>,
}

impl StatusReply {
    pub fn is_complete(&self) -> bool {
        self.complete == self.total
    }
}

/// One chunk of file data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    pub chunk: u32,
    pub data: Bytes,
}

/// Remote → ground: CRC32 of the file of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcReply {
    pub status: Status,
    pub crc32: u32,
}

/// Source/destination pair used by move and copy requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPair {
    pub from: String,
    pub to: String,
    pub backend: Backend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveRequest {
    pub path: String,
    pub backend: Backend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkfsRequest {
    pub path: String,
    pub backend: Backend,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub path: String,
    pub backend: Backend,
}

/// Remote → ground: header of a listing; `entries` [`ListEntry`] frames follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListReply {
    pub status: Status,
    pub entries: u16,
}

/// One directory entry of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Zero-based position of this entry in the listing.
    pub index: u16,
    pub kind: EntryKind,
    pub size: u32,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipRequest {
    pub src: String,
    pub dest: String,
    pub action: ZipAction,
    pub backend: Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipReply {
    pub status: Status,
    pub compressed: u32,
    pub decompressed: u32,
}

/// A single protocol frame, tagged by message family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    UploadRequest(UploadRequest),
    UploadReply(Status),
    DownloadRequest(DownloadRequest),
    DownloadReply(DownloadReply),
    ChunkData(ChunkData),
    StatusRequest,
    StatusReply(StatusReply),
    ListRequest(ListRequest),
    ListReply(ListReply),
    ListEntry(ListEntry),
    MoveRequest(PathPair),
    MoveReply(Status),
    RemoveRequest(RemoveRequest),
    RemoveReply(Status),
    CopyRequest(PathPair),
    CopyReply(Status),
    MkfsRequest(MkfsRequest),
    MkfsReply(Status),
    Done,
    CrcRequest,
    CrcReply(CrcReply),
    ZipRequest(ZipRequest),
    ZipReply(ZipReply),
}

impl Message {
    /// Wire type of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::UploadRequest(_) => MessageKind::UploadRequest,
            Message::UploadReply(_) => MessageKind::UploadReply,
            Message::DownloadRequest(_) => MessageKind::DownloadRequest,
            Message::DownloadReply(_) => MessageKind::DownloadReply,
            Message::ChunkData(_) => MessageKind::ChunkData,
            Message::StatusRequest => MessageKind::StatusRequest,
            Message::StatusReply(_) => MessageKind::StatusReply,
            Message::ListRequest(_) => MessageKind::ListRequest,
            Message::ListReply(_) => MessageKind::ListReply,
            Message::ListEntry(_) => MessageKind::ListEntry,
            Message::MoveRequest(_) => MessageKind::MoveRequest,
            Message::MoveReply(_) => MessageKind::MoveReply,
            Message::RemoveRequest(_) => MessageKind::RemoveRequest,
            Message::RemoveReply(_) => MessageKind::RemoveReply,
            Message::CopyRequest(_) => MessageKind::CopyRequest,
            Message::CopyReply(_) => MessageKind::CopyReply,
            Message::MkfsRequest(_) => MessageKind::MkfsRequest,
            Message::MkfsReply(_) => MessageKind::MkfsReply,
            Message::Done => MessageKind::Done,
            Message::CrcRequest => MessageKind::CrcRequest,
            Message::CrcReply(_) => MessageKind::CrcReply,
            Message::ZipRequest(_) => MessageKind::ZipRequest,
            Message::ZipReply(_) => MessageKind::ZipReply,
        }
    }

    /// Status carried by reply messages, `None` for requests and data.
    pub fn reply_status(&self) -> Option<Status> {
        match self {
            Message::UploadReply(s)
            | Message::MoveReply(s)
            | Message::RemoveReply(s)
            | Message::CopyReply(s)
            | Message::MkfsReply(s) => Some(*s),
            Message::DownloadReply(r) => Some(r.status),
            Message::StatusReply(r) => Some(r.status),
            Message::ListReply(r) => Some(r.status),
            Message::CrcReply(r) => Some(r.status),
            Message::ZipReply(r) => Some(r.status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Message::Done.kind(), MessageKind::Done);
        assert_eq!(Message::StatusRequest.kind(), MessageKind::StatusRequest);
        assert_eq!(
            Message::MoveReply(Status::Ok).kind(),
            MessageKind::MoveReply
        );
    }

    #[test]
    fn reply_status_only_for_replies() {
        assert_eq!(Message::CrcRequest.reply_status(), None);
        assert_eq!(
            Message::RemoveReply(Status::NotFound).reply_status(),
            Some(Status::NotFound)
        );
        let rep = Message::DownloadReply(DownloadReply {
            status: Status::Busy,
            file_size: 0,
            crc32: 0,
        });
        assert_eq!(rep.reply_status(), Some(Status::Busy));
    }

    #[test]
    fn status_reply_completion() {
        let mut rep = StatusReply {
            status: Status::Ok,
            complete: 3,
            total: 6,
            runs: vec![StatusRun::new(3, 3)],
        };
        assert!(!rep.is_complete());
        rep.complete = 6;
        assert!(rep.is_complete());
    }
}
