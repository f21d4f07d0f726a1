//! Link layer for skyftp.
//!
//! A link is a reliable, ordered, connection-oriented message pipe. Each
//! message is delivered intact or not at all; a peer that stops answering is
//! reported as a timeout. Two implementations are provided:
//!
//! - [`tcp`]: length-prefixed frames over a TCP stream.
//! - [`memory`]: an in-process pair of channels, used by tests and simulators.
//!
//! # Wire format
//!
//! See [`frame`] for the TCP framing.

pub mod error;
pub mod frame;
pub mod memory;
pub mod tcp;

pub use error::LinkError;
pub use memory::{MemoryConnector, MemoryLink, MemoryListener};
pub use tcp::{TcpConnector, TcpLink};

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

/// Default maximum size of a single message on the link, in bytes.
pub const DEFAULT_MTU: usize = 256;

/// Default timeout for establishing a connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A message-oriented connection to the remote node.
pub trait Link: Send {
    /// Sends one message, waiting at most `timeout` for the link to accept it.
    fn send(
        &mut self,
        frame: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Receives the next message, waiting at most `timeout`.
    fn recv(&mut self, timeout: Duration) -> impl Future<Output = Result<Bytes, LinkError>> + Send;

    /// Closes the connection. Further sends fail with [`LinkError::Closed`].
    fn close(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Largest message the link carries.
    fn mtu(&self) -> usize;
}

/// Opens fresh [`Link`]s to the same remote node.
pub trait Connector: Send + Sync {
    type Link: Link;

    fn connect(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Link, LinkError>> + Send;
}

/// Rejects frames that would not fit the link MTU.
pub(crate) fn check_mtu(len: usize, mtu: usize) -> Result<(), LinkError> {
    if len > mtu {
        return Err(LinkError::FrameTooLarge { len, mtu });
    }
    Ok(())
}
