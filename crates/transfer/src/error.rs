//! Error types for the transfer engine.

use skyftp_link::LinkError;
use skyftp_protocol::{MessageKind, ProtocolError, Status};

/// Errors produced by a transfer session or a file management request.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("timeout during {phase}")]
    Timeout { phase: &'static str },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("invalid status reply: {0}")]
    InvalidStatus(String),

    #[error("chunk {chunk} carries {len} bytes, expected {expected}")]
    ShortChunk {
        chunk: u32,
        len: usize,
        expected: usize,
    },

    #[error("{op} failed: {status}")]
    Remote { op: &'static str, status: Status },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("chunk map {0} exists without its data file")]
    OrphanMap(String),

    #[error("chunk map has {actual} entries, transfer has {expected} chunks")]
    MapMismatch { expected: u32, actual: u64 },

    #[error("checksum mismatch: local {local:#010x}, remote {remote:#010x}")]
    ChecksumMismatch { local: u32, remote: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),

    #[error("transfer incomplete after {rounds} status rounds ({complete} of {total} chunks)")]
    Incomplete {
        rounds: u32,
        complete: u32,
        total: u32,
    },
}

impl TransferError {
    /// Whether retrying the same transfer, keeping the chunk map, can make progress.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TransferError::Link(_)
                | TransferError::Timeout { .. }
                | TransferError::Incomplete { .. }
        ) || matches!(
            self,
            TransferError::Remote {
                status: Status::Busy,
                ..
            }
        )
    }

    /// Maps a link failure during `phase`, keeping timeouts distinct.
    pub(crate) fn link(phase: &'static str, err: LinkError) -> Self {
        match err {
            LinkError::Timeout => TransferError::Timeout { phase },
            other => TransferError::Link(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_timeout_becomes_phase_timeout() {
        let err = TransferError::link("status reply", LinkError::Timeout);
        assert!(matches!(err, TransferError::Timeout { phase: "status reply" }));
        assert_eq!(err.to_string(), "timeout during status reply");

        let err = TransferError::link("chunk data", LinkError::Closed);
        assert!(matches!(err, TransferError::Link(LinkError::Closed)));
    }

    #[test]
    fn resumable_classification() {
        assert!(TransferError::Timeout { phase: "x" }.is_resumable());
        assert!(TransferError::Link(LinkError::Closed).is_resumable());
        assert!(
            TransferError::Remote {
                op: "download",
                status: Status::Busy
            }
            .is_resumable()
        );

        assert!(!TransferError::ChecksumMismatch { local: 1, remote: 2 }.is_resumable());
        assert!(!TransferError::AlreadyExists("a".into()).is_resumable());
        assert!(!TransferError::OrphanMap("a.map".into()).is_resumable());
        assert!(
            !TransferError::Remote {
                op: "download",
                status: Status::NotFound
            }
            .is_resumable()
        );
    }

    #[test]
    fn remote_error_is_human_readable() {
        let err = TransferError::Remote {
            op: "remove",
            status: Status::NotFound,
        };
        assert_eq!(err.to_string(), "remove failed: no such file or directory");
    }

    #[test]
    fn checksum_mismatch_shows_hex() {
        let err = TransferError::ChecksumMismatch {
            local: 0xCBF43926,
            remote: 0,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: local 0xcbf43926, remote 0x00000000"
        );
    }
}
