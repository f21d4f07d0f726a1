//! Accept loops that hand every incoming link to a [`RemoteNode`].

use skyftp_link::memory::{self, MemoryConnector, MemoryListener};
use skyftp_link::{Link, TcpLink};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SimError;
use crate::node::RemoteNode;

/// Serves in-memory connections until cancelled or every connector is gone.
pub async fn serve_memory(
    node: RemoteNode,
    mut listener: MemoryListener,
    cancel: CancellationToken,
) {
    loop {
        let link = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            link = listener.accept() => match link {
                Some(link) => link,
                None => break,
            },
        };
        spawn_connection(node.clone(), link, cancel.clone());
    }
    debug!("memory listener stopped");
}

/// Starts a node on an in-memory listener and returns the connector that
/// reaches it. The node stops once the connector and all its clones are
/// dropped.
pub fn spawn_memory(node: RemoteNode, mtu: usize) -> MemoryConnector {
    let (connector, listener) = memory::listener(mtu);
    tokio::spawn(serve_memory(node, listener, CancellationToken::new()));
    connector
}

/// Serves TCP connections until cancelled.
pub async fn serve_tcp(
    node: RemoteNode,
    listener: TcpListener,
    mtu: usize,
    cancel: CancellationToken,
) -> Result<(), SimError> {
    info!(
        addr = %listener.local_addr()?,
        mtu,
        root = %node.root().display(),
        "simulated node listening"
    );

    loop {
        let (stream, addr) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("simulated node shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };
        info!(%addr, "connection accepted");

        match TcpLink::from_stream(stream, mtu) {
            Ok(link) => spawn_connection(node.clone(), link, cancel.clone()),
            Err(e) => warn!(%addr, error = %e, "failed to set up link"),
        }
    }
}

fn spawn_connection<L: Link + 'static>(node: RemoteNode, link: L, cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => debug!("connection cancelled"),
            result = node.serve_link(link) => {
                if let Err(e) = result {
                    warn!(error = %e, "connection ended with error");
                }
            }
        }
    });
}
