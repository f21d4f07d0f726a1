//! TCP link.
//!
//! Messages travel as length-prefixed frames (see [`crate::frame`]). A
//! timed-out receive may leave a frame half read, so the link must not be
//! reused after a [`LinkError::Timeout`].

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

use crate::error::LinkError;
use crate::frame::{read_frame, write_frame};
use crate::{Connector, DEFAULT_MTU, Link};

/// Read/write buffer size. A few frames at the default MTU.
const TCP_BUFFER_SIZE: usize = 4 * 1024;

/// A [`Link`] over a TCP stream.
pub struct TcpLink {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    mtu: usize,
    closed: bool,
}

impl TcpLink {
    /// Wraps an established stream.
    pub fn from_stream(stream: TcpStream, mtu: usize) -> Result<Self, LinkError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::with_capacity(TCP_BUFFER_SIZE, reader),
            writer: BufWriter::with_capacity(TCP_BUFFER_SIZE, writer),
            peer,
            mtu,
            closed: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Link for TcpLink {
    async fn send(&mut self, frame: &[u8], timeout: Duration) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        let write = async {
            write_frame(&mut self.writer, frame, self.mtu).await?;
            self.writer.flush().await.map_err(LinkError::from_read)
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout),
        }
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Bytes, LinkError> {
        match tokio::time::timeout(timeout, read_frame(&mut self.reader, self.mtu)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout),
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(peer = %self.peer, "closing TCP link");
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

/// Connects to a remote node over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    mtu: usize,
}

impl TcpConnector {
    /// `addr` is a `host:port` string.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            mtu: DEFAULT_MTU,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Link = TcpLink;

    async fn connect(&self, timeout: Duration) -> Result<TcpLink, LinkError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(LinkError::Timeout),
        };
        let link = TcpLink::from_stream(stream, self.mtu)?;
        info!(peer = %link.peer_addr(), mtu = self.mtu, "TCP link connected");
        Ok(link)
    }
}
