//! Binary encoding of [`Message`] frames.
//!
//! # Wire format
//!
//! ```text
//! [1 byte: message type tag][body]
//! ```
//!
//! Multi-byte integers are big-endian, with one exception: the chunk index of
//! a `ChunkData` frame is little-endian. Early peers shipped with that layout
//! and every deployed node still expects it.
//!
//! Paths are fixed [`PATH_LENGTH`]-byte fields, NUL padded, so a path holds
//! at most `PATH_LENGTH - 1` bytes.
//!
//! ```text
//! UploadRequest:   chunk_size u16 | file_size u32 | crc32 u32 | mem_addr u32 | backend u8
//!                  | path[64]
//! UploadReply:     status u8
//! DownloadRequest: chunk_size u16 | mem_addr u32 | mem_size u32 | backend u8 | path[64]
//! DownloadReply:   status u8 | file_size u32 | crc32 u32
//! ChunkData:       chunk u32 (LE) | payload
//! StatusRequest:   -
//! StatusReply:     status u8 | complete u32 | total u32 | entries u16
//!                  | entries x (start u32 | count u32)
//! ListRequest:     path[64] | backend u8
//! ListReply:       status u8 | entries u16
//! ListEntry:       index u16 | kind u8 | size u32 | path[64]
//! Move/CopyReq:    from[64] | to[64] | backend u8
//! RemoveRequest:   path[64] | backend u8
//! MkfsRequest:     path[64] | backend u8 | force u8
//! *Reply (plain):  status u8
//! Done/CrcRequest: -
//! CrcReply:        status u8 | crc32 u32
//! ZipRequest:      src[64] | dest[64] | action u8 | backend u8
//! ZipReply:        status u8 | compressed u32 | decompressed u32
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{MessageKind, PATH_LENGTH, STATUS_RUNS_MAX, TAG_LEN};
use crate::messages::{
    ChunkData, CrcReply, DownloadReply, DownloadRequest, ListEntry, ListReply, ListRequest,
    Message, MkfsRequest, PathPair, RemoveRequest, StatusReply, UploadRequest, ZipReply,
    ZipRequest,
};
use crate::types::{Backend, EntryKind, Status, StatusRun, ZipAction};

const UPLOAD_REQUEST_LEN: usize = 2 + 4 + 4 + 4 + 1 + PATH_LENGTH;
const DOWNLOAD_REQUEST_LEN: usize = 2 + 4 + 4 + 1 + PATH_LENGTH;
const DOWNLOAD_REPLY_LEN: usize = 1 + 4 + 4;
const STATUS_REPLY_HEADER_LEN: usize = 1 + 4 + 4 + 2;
const STATUS_RUN_LEN: usize = 4 + 4;
const PATH_REQUEST_LEN: usize = PATH_LENGTH + 1;
const PATH_PAIR_LEN: usize = 2 * PATH_LENGTH + 1;
const MKFS_REQUEST_LEN: usize = PATH_LENGTH + 2;
const LIST_REPLY_LEN: usize = 1 + 2;
const LIST_ENTRY_LEN: usize = 2 + 1 + 4 + PATH_LENGTH;
const CRC_REPLY_LEN: usize = 1 + 4;
const ZIP_REQUEST_LEN: usize = 2 * PATH_LENGTH + 2;
const ZIP_REPLY_LEN: usize = 1 + 4 + 4;
const STATUS_ONLY_LEN: usize = 1;
const CHUNK_INDEX_LEN: usize = 4;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message type: {0:#04x}")]
    UnknownType(u8),

    #[error("unknown status code: {0}")]
    UnknownStatus(u8),

    #[error("{kind} frame has {actual} body bytes, expected {expected}")]
    Length {
        kind: MessageKind,
        expected: usize,
        actual: usize,
    },

    #[error("path too long: {0} bytes (max {max})", max = PATH_LENGTH - 1)]
    PathTooLong(usize),

    #[error("path contains a NUL byte")]
    PathNul,

    #[error("path field is not valid UTF-8")]
    InvalidPath,

    #[error("status reply carries {0} runs (max {max})", max = STATUS_RUNS_MAX)]
    TooManyRuns(usize),

    #[error("unknown list entry type: {0}")]
    UnknownEntryKind(u8),

    #[error("unknown zip action: {0}")]
    UnknownZipAction(u8),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

impl Message {
    /// Serializes the message into a single frame.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(TAG_LEN + self.body_len());
        buf.put_u8(self.kind().tag());

        match self {
            Message::UploadRequest(req) => {
                buf.put_u16(req.chunk_size);
                buf.put_u32(req.file_size);
                buf.put_u32(req.crc32);
                buf.put_u32(req.mem_addr);
                buf.put_u8(req.backend.0);
                put_path(&mut buf, &req.path)?;
            }
            Message::DownloadRequest(req) => {
                buf.put_u16(req.chunk_size);
                buf.put_u32(req.mem_addr);
                buf.put_u32(req.mem_size);
                buf.put_u8(req.backend.0);
                put_path(&mut buf, &req.path)?;
            }
            Message::DownloadReply(rep) => {
                buf.put_u8(rep.status.code());
                buf.put_u32(rep.file_size);
                buf.put_u32(rep.crc32);
            }
            Message::ChunkData(data) => {
                buf.put_u32_le(data.chunk);
                buf.put_slice(&data.data);
            }
            Message::StatusReply(rep) => {
                if rep.runs.len() > STATUS_RUNS_MAX {
                    return Err(ProtocolError::TooManyRuns(rep.runs.len()));
                }
                buf.put_u8(rep.status.code());
                buf.put_u32(rep.complete);
                buf.put_u32(rep.total);
                buf.put_u16(rep.runs.len() as u16);
                for run in &rep.runs {
                    buf.put_u32(run.start);
                    buf.put_u32(run.count);
                }
            }
            Message::ListRequest(req) => {
                put_path(&mut buf, &req.path)?;
                buf.put_u8(req.backend.0);
            }
            Message::ListReply(rep) => {
                buf.put_u8(rep.status.code());
                buf.put_u16(rep.entries);
            }
            Message::ListEntry(entry) => {
                buf.put_u16(entry.index);
                buf.put_u8(entry.kind as u8);
                buf.put_u32(entry.size);
                put_path(&mut buf, &entry.path)?;
            }
            Message::MoveRequest(pair) | Message::CopyRequest(pair) => {
                put_path(&mut buf, &pair.from)?;
                put_path(&mut buf, &pair.to)?;
                buf.put_u8(pair.backend.0);
            }
            Message::RemoveRequest(req) => {
                put_path(&mut buf, &req.path)?;
                buf.put_u8(req.backend.0);
            }
            Message::MkfsRequest(req) => {
                put_path(&mut buf, &req.path)?;
                buf.put_u8(req.backend.0);
                buf.put_u8(req.force as u8);
            }
            Message::UploadReply(status)
            | Message::MoveReply(status)
            | Message::RemoveReply(status)
            | Message::CopyReply(status)
            | Message::MkfsReply(status) => {
                buf.put_u8(status.code());
            }
            Message::CrcReply(rep) => {
                buf.put_u8(rep.status.code());
                buf.put_u32(rep.crc32);
            }
            Message::ZipRequest(req) => {
                put_path(&mut buf, &req.src)?;
                put_path(&mut buf, &req.dest)?;
                buf.put_u8(req.action as u8);
                buf.put_u8(req.backend.0);
            }
            Message::ZipReply(rep) => {
                buf.put_u8(rep.status.code());
                buf.put_u32(rep.compressed);
                buf.put_u32(rep.decompressed);
            }
            Message::StatusRequest | Message::Done | Message::CrcRequest => {}
        }

        Ok(buf.freeze())
    }

    /// Length of the encoded body (everything after the tag).
    pub fn body_len(&self) -> usize {
        match self {
            Message::UploadRequest(_) => UPLOAD_REQUEST_LEN,
            Message::DownloadRequest(_) => DOWNLOAD_REQUEST_LEN,
            Message::DownloadReply(_) => DOWNLOAD_REPLY_LEN,
            Message::ChunkData(data) => CHUNK_INDEX_LEN + data.data.len(),
            Message::StatusReply(rep) => STATUS_REPLY_HEADER_LEN + rep.runs.len() * STATUS_RUN_LEN,
            Message::ListRequest(_) | Message::RemoveRequest(_) => PATH_REQUEST_LEN,
            Message::ListReply(_) => LIST_REPLY_LEN,
            Message::ListEntry(_) => LIST_ENTRY_LEN,
            Message::MoveRequest(_) | Message::CopyRequest(_) => PATH_PAIR_LEN,
            Message::MkfsRequest(_) => MKFS_REQUEST_LEN,
            Message::UploadReply(_)
            | Message::MoveReply(_)
            | Message::RemoveReply(_)
            | Message::CopyReply(_)
            | Message::MkfsReply(_) => STATUS_ONLY_LEN,
            Message::CrcReply(_) => CRC_REPLY_LEN,
            Message::ZipRequest(_) => ZIP_REQUEST_LEN,
            Message::ZipReply(_) => ZIP_REPLY_LEN,
            Message::StatusRequest | Message::Done | Message::CrcRequest => 0,
        }
    }
}

fn put_path(buf: &mut BytesMut, path: &str) -> Result<(), ProtocolError> {
    let bytes = path.as_bytes();
    if bytes.len() >= PATH_LENGTH {
        return Err(ProtocolError::PathTooLong(bytes.len()));
    }
    if bytes.contains(&0) {
        return Err(ProtocolError::PathNul);
    }
    buf.put_slice(bytes);
    buf.put_bytes(0, PATH_LENGTH - bytes.len());
    Ok(())
}

/// Checks that `path` fits a wire path field.
pub fn validate_path(path: &str) -> Result<(), ProtocolError> {
    if path.len() >= PATH_LENGTH {
        return Err(ProtocolError::PathTooLong(path.len()));
    }
    if path.as_bytes().contains(&0) {
        return Err(ProtocolError::PathNul);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

impl Message {
    /// Parses a single frame.
    ///
    /// Fixed layout messages must match their size exactly; a frame of the
    /// wrong length is a protocol error, never silently truncated.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, mut body) = frame.split_first().ok_or(ProtocolError::Empty)?;
        let kind = MessageKind::from_tag(tag).ok_or(ProtocolError::UnknownType(tag))?;
        let buf = &mut body;

        let msg = match kind {
            MessageKind::UploadRequest => {
                expect_len(kind, buf, UPLOAD_REQUEST_LEN)?;
                Message::UploadRequest(UploadRequest {
                    chunk_size: buf.get_u16(),
                    file_size: buf.get_u32(),
                    crc32: buf.get_u32(),
                    mem_addr: buf.get_u32(),
                    backend: Backend(buf.get_u8()),
                    path: get_path(buf)?,
                })
            }
            MessageKind::UploadReply => {
                expect_len(kind, buf, STATUS_ONLY_LEN)?;
                Message::UploadReply(get_status(buf)?)
            }
            MessageKind::DownloadRequest => {
                expect_len(kind, buf, DOWNLOAD_REQUEST_LEN)?;
                Message::DownloadRequest(DownloadRequest {
                    chunk_size: buf.get_u16(),
                    mem_addr: buf.get_u32(),
                    mem_size: buf.get_u32(),
                    backend: Backend(buf.get_u8()),
                    path: get_path(buf)?,
                })
            }
            MessageKind::DownloadReply => {
                expect_len(kind, buf, DOWNLOAD_REPLY_LEN)?;
                Message::DownloadReply(DownloadReply {
                    status: get_status(buf)?,
                    file_size: buf.get_u32(),
                    crc32: buf.get_u32(),
                })
            }
            MessageKind::ChunkData => {
                if buf.len() < CHUNK_INDEX_LEN {
                    return Err(ProtocolError::Length {
                        kind,
                        expected: CHUNK_INDEX_LEN,
                        actual: buf.len(),
                    });
                }
                let chunk = buf.get_u32_le();
                Message::ChunkData(ChunkData {
                    chunk,
                    data: Bytes::copy_from_slice(buf),
                })
            }
            MessageKind::StatusRequest => {
                expect_len(kind, buf, 0)?;
                Message::StatusRequest
            }
            MessageKind::StatusReply => {
                if buf.len() < STATUS_REPLY_HEADER_LEN {
                    return Err(ProtocolError::Length {
                        kind,
                        expected: STATUS_REPLY_HEADER_LEN,
                        actual: buf.len(),
                    });
                }
                let status = get_status(buf)?;
                let complete = buf.get_u32();
                let total = buf.get_u32();
                let entries = buf.get_u16() as usize;
                if entries > STATUS_RUNS_MAX {
                    return Err(ProtocolError::TooManyRuns(entries));
                }
                expect_len(kind, buf, entries * STATUS_RUN_LEN)?;
                let runs = (0..entries)
                    .map(|_| StatusRun::new(buf.get_u32(), buf.get_u32()))
                    .collect();
                Message::StatusReply(StatusReply {
                    status,
                    complete,
                    total,
                    runs,
                })
            }
            MessageKind::ListRequest => {
                expect_len(kind, buf, PATH_REQUEST_LEN)?;
                Message::ListRequest(ListRequest {
                    path: get_path(buf)?,
                    backend: Backend(buf.get_u8()),
                })
            }
            MessageKind::ListReply => {
                expect_len(kind, buf, LIST_REPLY_LEN)?;
                Message::ListReply(ListReply {
                    status: get_status(buf)?,
                    entries: buf.get_u16(),
                })
            }
            MessageKind::ListEntry => {
                expect_len(kind, buf, LIST_ENTRY_LEN)?;
                let index = buf.get_u16();
                let kind_code = buf.get_u8();
                let entry_kind = EntryKind::from_code(kind_code)
                    .ok_or(ProtocolError::UnknownEntryKind(kind_code))?;
                Message::ListEntry(ListEntry {
                    index,
                    kind: entry_kind,
                    size: buf.get_u32(),
                    path: get_path(buf)?,
                })
            }
            MessageKind::MoveRequest | MessageKind::CopyRequest => {
                expect_len(kind, buf, PATH_PAIR_LEN)?;
                let pair = PathPair {
                    from: get_path(buf)?,
                    to: get_path(buf)?,
                    backend: Backend(buf.get_u8()),
                };
                if kind == MessageKind::MoveRequest {
                    Message::MoveRequest(pair)
                } else {
                    Message::CopyRequest(pair)
                }
            }
            MessageKind::RemoveRequest => {
                expect_len(kind, buf, PATH_REQUEST_LEN)?;
                Message::RemoveRequest(RemoveRequest {
                    path: get_path(buf)?,
                    backend: Backend(buf.get_u8()),
                })
            }
            MessageKind::MkfsRequest => {
                expect_len(kind, buf, MKFS_REQUEST_LEN)?;
                Message::MkfsRequest(MkfsRequest {
                    path: get_path(buf)?,
                    backend: Backend(buf.get_u8()),
                    force: buf.get_u8() != 0,
                })
            }
            MessageKind::MoveReply
            | MessageKind::RemoveReply
            | MessageKind::CopyReply
            | MessageKind::MkfsReply => {
                expect_len(kind, buf, STATUS_ONLY_LEN)?;
                let status = get_status(buf)?;
                match kind {
                    MessageKind::MoveReply => Message::MoveReply(status),
                    MessageKind::RemoveReply => Message::RemoveReply(status),
                    MessageKind::CopyReply => Message::CopyReply(status),
                    _ => Message::MkfsReply(status),
                }
            }
            MessageKind::Done => {
                expect_len(kind, buf, 0)?;
                Message::Done
            }
            MessageKind::CrcRequest => {
                expect_len(kind, buf, 0)?;
                Message::CrcRequest
            }
            MessageKind::CrcReply => {
                expect_len(kind, buf, CRC_REPLY_LEN)?;
                Message::CrcReply(CrcReply {
                    status: get_status(buf)?,
                    crc32: buf.get_u32(),
                })
            }
            MessageKind::ZipRequest => {
                expect_len(kind, buf, ZIP_REQUEST_LEN)?;
                let src = get_path(buf)?;
                let dest = get_path(buf)?;
                let action_code = buf.get_u8();
                let action = ZipAction::from_code(action_code)
                    .ok_or(ProtocolError::UnknownZipAction(action_code))?;
                Message::ZipRequest(ZipRequest {
                    src,
                    dest,
                    action,
                    backend: Backend(buf.get_u8()),
                })
            }
            MessageKind::ZipReply => {
                expect_len(kind, buf, ZIP_REPLY_LEN)?;
                Message::ZipReply(ZipReply {
                    status: get_status(buf)?,
                    compressed: buf.get_u32(),
                    decompressed: buf.get_u32(),
                })
            }
        };

        Ok(msg)
    }
}

fn expect_len(kind: MessageKind, buf: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if buf.len() != expected {
        return Err(ProtocolError::Length {
            kind,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn get_status(buf: &mut &[u8]) -> Result<Status, ProtocolError> {
    let code = buf.get_u8();
    Status::from_code(code).ok_or(ProtocolError::UnknownStatus(code))
}

fn get_path(buf: &mut &[u8]) -> Result<String, ProtocolError> {
    let field = &buf[..PATH_LENGTH];
    let end = field.iter().position(|&b| b == 0).unwrap_or(PATH_LENGTH);
    let path = std::str::from_utf8(&field[..end])
        .map_err(|_| ProtocolError::InvalidPath)?
        .to_owned();
    buf.advance(PATH_LENGTH);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let frame = msg.encode().unwrap();
        assert_eq!(frame.len(), TAG_LEN + msg.body_len());
        assert_eq!(Message::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn chunk_index_is_little_endian() {
        let msg = Message::ChunkData(ChunkData {
            chunk: 300,
            data: Bytes::from_static(b"xy"),
        });
        let frame = msg.encode().unwrap();
        assert_eq!(&frame[..], &[4, 0x2C, 0x01, 0x00, 0x00, b'x', b'y']);
    }

    #[test]
    fn other_fields_are_big_endian() {
        let msg = Message::DownloadReply(DownloadReply {
            status: Status::Ok,
            file_size: 300,
            crc32: 0x1122_3344,
        });
        let frame = msg.encode().unwrap();
        assert_eq!(
            &frame[..],
            &[3, 0, 0x00, 0x00, 0x01, 0x2C, 0x11, 0x22, 0x33, 0x44]
        );

        let msg = Message::UploadRequest(UploadRequest {
            chunk_size: 300,
            file_size: 1000,
            crc32: 0,
            mem_addr: 0,
            backend: Backend::FILE,
            path: "/flash/a.bin".into(),
        });
        let frame = msg.encode().unwrap();
        assert_eq!(&frame[1..3], &[0x01, 0x2C]);
        assert_eq!(&frame[3..7], &[0x00, 0x00, 0x03, 0xE8]);
    }

    #[test]
    fn status_reply_layout() {
        let msg = Message::StatusReply(StatusReply {
            status: Status::Ok,
            complete: 3,
            total: 6,
            runs: vec![StatusRun::new(3, 3)],
        });
        let frame = msg.encode().unwrap();
        assert_eq!(
            &frame[..],
            &[6, 0, 0, 0, 0, 3, 0, 0, 0, 6, 0, 1, 0, 0, 0, 3, 0, 0, 0, 3]
        );
        roundtrip(msg);
    }

    #[test]
    fn request_families_roundtrip() {
        roundtrip(Message::UploadRequest(UploadRequest {
            chunk_size: 175,
            file_size: 1000,
            crc32: 0xDEAD_BEEF,
            mem_addr: 0,
            backend: Backend::FILE,
            path: "/flash/upload.bin".into(),
        }));
        roundtrip(Message::DownloadRequest(DownloadRequest {
            chunk_size: 185,
            mem_addr: 0x4800_0000,
            mem_size: 4096,
            backend: Backend::MEMORY,
            path: String::new(),
        }));
        roundtrip(Message::MoveRequest(PathPair {
            from: "/flash/a".into(),
            to: "/flash/b".into(),
            backend: Backend::FAT,
        }));
        roundtrip(Message::MkfsRequest(MkfsRequest {
            path: "/flash".into(),
            backend: Backend::FAT,
            force: true,
        }));
        roundtrip(Message::ZipRequest(ZipRequest {
            src: "/flash/log".into(),
            dest: "/flash/log.z".into(),
            action: ZipAction::Unzip,
            backend: Backend::FILE,
        }));
        roundtrip(Message::ListEntry(ListEntry {
            index: 2,
            kind: EntryKind::Directory,
            size: 0,
            path: "logs".into(),
        }));
        roundtrip(Message::Done);
        roundtrip(Message::CrcRequest);
    }

    #[test]
    fn copy_and_move_share_layout_but_not_tag() {
        let pair = PathPair {
            from: "/a".into(),
            to: "/b".into(),
            backend: Backend::FILE,
        };
        let mv = Message::MoveRequest(pair.clone()).encode().unwrap();
        let cp = Message::CopyRequest(pair).encode().unwrap();
        assert_eq!(mv[1..], cp[1..]);
        assert!(matches!(Message::decode(&cp).unwrap(), Message::CopyRequest(_)));
    }

    #[test]
    fn path_field_is_nul_padded() {
        let frame = Message::RemoveRequest(RemoveRequest {
            path: "/x".into(),
            backend: Backend::FILE,
        })
        .encode()
        .unwrap();
        assert_eq!(frame.len(), TAG_LEN + PATH_LENGTH + 1);
        assert_eq!(&frame[1..3], b"/x");
        assert!(frame[3..1 + PATH_LENGTH].iter().all(|&b| b == 0));
        assert_eq!(frame[1 + PATH_LENGTH], 3);
    }

    #[test]
    fn path_too_long_rejected() {
        let path = "p".repeat(PATH_LENGTH);
        let err = Message::RemoveRequest(RemoveRequest {
            path,
            backend: Backend::FILE,
        })
        .encode()
        .unwrap_err();
        assert!(matches!(err, ProtocolError::PathTooLong(64)));

        let longest = "p".repeat(PATH_LENGTH - 1);
        assert!(validate_path(&longest).is_ok());
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = Message::decode(&[1, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Length {
                kind: MessageKind::UploadReply,
                expected: 1,
                actual: 2
            }
        ));

        let err = Message::decode(&[4, 1, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::Length { .. }));
    }

    #[test]
    fn status_reply_run_count_is_bounded() {
        let runs = (0..17).map(|i| StatusRun::new(i * 2, 1)).collect();
        let err = Message::StatusReply(StatusReply {
            status: Status::Ok,
            complete: 0,
            total: 34,
            runs,
        })
        .encode()
        .unwrap_err();
        assert!(matches!(err, ProtocolError::TooManyRuns(17)));

        let err = Message::decode(&[6, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 17]).unwrap_err();
        assert!(matches!(err, ProtocolError::TooManyRuns(17)));
    }

    #[test]
    fn unknown_type_and_status() {
        assert!(matches!(
            Message::decode(&[0x7F]),
            Err(ProtocolError::UnknownType(0x7F))
        ));
        assert!(matches!(
            Message::decode(&[1, 42]),
            Err(ProtocolError::UnknownStatus(42))
        ));
        assert!(matches!(Message::decode(&[]), Err(ProtocolError::Empty)));
    }

    #[test]
    fn empty_chunk_payload_allowed() {
        roundtrip(Message::ChunkData(ChunkData {
            chunk: 0,
            data: Bytes::new(),
        }));
    }
}
