//! Error types for the link layer.

/// Errors produced by a [`Link`](crate::Link).
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link timed out")]
    Timeout,

    #[error("link closed by peer")]
    Closed,

    #[error("frame of {len} bytes exceeds link MTU of {mtu}")]
    FrameTooLarge { len: usize, mtu: usize },
}

impl LinkError {
    /// Maps read errors so that a peer hanging up surfaces as [`LinkError::Closed`].
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => LinkError::Closed,
            _ => LinkError::Io(err),
        }
    }
}
