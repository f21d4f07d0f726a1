//! Wire protocol for skyftp.
//!
//! Every message travelling over the link is a single frame starting with a
//! one-byte [`MessageKind`] tag followed by a fixed layout body. See
//! [`codec`] for the byte-level description of each message family.

pub mod codec;
pub mod constants;
pub mod messages;
pub mod types;

pub use codec::{validate_path, ProtocolError};
pub use constants::MessageKind;
pub use messages::{
    ChunkData, CrcReply, DownloadReply, DownloadRequest, ListEntry, ListReply, ListRequest,
    Message, MkfsRequest, PathPair, RemoveRequest, StatusReply, UploadRequest, ZipReply,
    ZipRequest,
};
pub use types::{Backend, EntryKind, Status, StatusRun, ZipAction};
