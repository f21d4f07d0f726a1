use skyftp_link::LinkError;
use skyftp_protocol::{Backend, ProtocolError};
use skyftp_transfer::TransferError;

/// Errors that end one simulated connection or the server loop.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("backend {0} not supported")]
    UnsupportedBackend(Backend),

    #[error("memory range {addr:#010x}+{len:#x} outside simulated memory")]
    OutOfRange { addr: u32, len: usize },
}
