//! In-process link.
//!
//! [`MemoryLink::pair`] returns two connected ends. [`listener`] returns a
//! [`MemoryConnector`] that hands the far end of every new pair to a
//! [`MemoryListener`], mirroring a TCP connect/accept.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::LinkError;
use crate::{Connector, Link, check_mtu};

/// Messages buffered per direction before `send` waits.
const CHANNEL_CAPACITY: usize = 64;

/// One end of an in-memory link.
pub struct MemoryLink {
    tx: Option<mpsc::Sender<Bytes>>,
    rx: mpsc::Receiver<Bytes>,
    mtu: usize,
}

impl MemoryLink {
    /// Creates two connected ends.
    pub fn pair(mtu: usize) -> (MemoryLink, MemoryLink) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            MemoryLink {
                tx: Some(a_tx),
                rx: a_rx,
                mtu,
            },
            MemoryLink {
                tx: Some(b_tx),
                rx: b_rx,
                mtu,
            },
        )
    }
}

impl Link for MemoryLink {
    async fn send(&mut self, frame: &[u8], timeout: Duration) -> Result<(), LinkError> {
        check_mtu(frame.len(), self.mtu)?;
        let tx = self.tx.as_ref().ok_or(LinkError::Closed)?;
        match tokio::time::timeout(timeout, tx.send(Bytes::copy_from_slice(frame))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(LinkError::Closed),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Bytes, LinkError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(LinkError::Closed),
            Err(_) => Err(LinkError::Timeout),
        }
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        if self.tx.take().is_some() {
            debug!("closing memory link");
        }
        Ok(())
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

/// Creates a connector/listener pair for in-memory links.
pub fn listener(mtu: usize) -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryConnector { tx, mtu }, MemoryListener { rx })
}

/// Opens in-memory links whose far ends are delivered to a [`MemoryListener`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<MemoryLink>,
    mtu: usize,
}

impl Connector for MemoryConnector {
    type Link = MemoryLink;

    async fn connect(&self, _timeout: Duration) -> Result<MemoryLink, LinkError> {
        let (local, remote) = MemoryLink::pair(self.mtu);
        self.tx.send(remote).map_err(|_| LinkError::Closed)?;
        Ok(local)
    }
}

/// Accepts links opened through the matching [`MemoryConnector`].
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<MemoryLink>,
}

impl MemoryListener {
    /// Waits for the next connection. `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<MemoryLink> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn pair_delivers_in_order() {
        let (mut a, mut b) = MemoryLink::pair(256);
        a.send(b"first", T).await.unwrap();
        a.send(b"second", T).await.unwrap();
        assert_eq!(&b.recv(T).await.unwrap()[..], b"first");
        assert_eq!(&b.recv(T).await.unwrap()[..], b"second");

        b.send(b"reply", T).await.unwrap();
        assert_eq!(&a.recv(T).await.unwrap()[..], b"reply");
    }

    #[tokio::test]
    async fn close_is_seen_by_peer() {
        let (mut a, mut b) = MemoryLink::pair(256);
        a.send(b"last", T).await.unwrap();
        a.close().await.unwrap();

        assert_eq!(&b.recv(T).await.unwrap()[..], b"last");
        assert!(matches!(b.recv(T).await, Err(LinkError::Closed)));
        assert!(matches!(a.send(b"x", T).await, Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn dropped_peer_closes_link() {
        let (mut a, b) = MemoryLink::pair(256);
        drop(b);
        assert!(matches!(a.send(b"x", T).await, Err(LinkError::Closed)));
        assert!(matches!(a.recv(T).await, Err(LinkError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn recv_times_out() {
        let (mut a, _b) = MemoryLink::pair(256);
        let result = a.recv(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(LinkError::Timeout)));
    }

    #[tokio::test]
    async fn mtu_enforced() {
        let (mut a, _b) = MemoryLink::pair(4);
        assert!(matches!(
            a.send(b"12345", T).await,
            Err(LinkError::FrameTooLarge { len: 5, mtu: 4 })
        ));
    }

    #[tokio::test]
    async fn listener_accepts_connections() {
        let (connector, mut listener) = listener(128);
        let mut client = connector.connect(T).await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.send(b"ping", T).await.unwrap();
        assert_eq!(&server.recv(T).await.unwrap()[..], b"ping");
        assert_eq!(server.mtu(), 128);

        drop(connector);
        assert!(listener.accept().await.is_none());
    }
}
