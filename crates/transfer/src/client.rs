//! Ground-side client.
//!
//! Every operation opens its own connection through the [`Connector`].
//! Transfers run a full [`TransferSession`]; file management requests are a
//! single request/reply exchange followed by a close.

use std::path::PathBuf;
use std::time::Duration;

use skyftp_link::{Connector, Link};
use skyftp_protocol::{
    Backend, ListEntry, ListRequest, Message, MessageKind, MkfsRequest, PathPair, RemoveRequest,
    ZipAction, ZipReply, ZipRequest,
};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::exchange;
use crate::progress::ProgressCallback;
use crate::session::TransferSession;
use crate::types::{TransferRequest, TransferSummary};
use crate::TransferError;

/// Client for one remote node.
pub struct FtpClient<C: Connector> {
    connector: C,
    config: ClientConfig,
}

impl<C: Connector> FtpClient<C> {
    pub fn new(connector: C, config: ClientConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn connect(&self) -> Result<C::Link, TransferError> {
        self.connector
            .connect(self.config.connect_timeout)
            .await
            .map_err(|e| TransferError::link("connect", e))
    }

    /// Opens a fresh connection wrapped in an idle session.
    pub async fn open_session(&self) -> Result<TransferSession<C::Link>, TransferError> {
        let link = self.connect().await?;
        Ok(TransferSession::new(link, self.config.clone()))
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Uploads a local file, sending only the chunks the remote is missing.
    pub async fn upload(
        &self,
        req: &TransferRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<TransferSummary, TransferError> {
        let mut session = self.open_session().await?;
        if let Some(callback) = progress {
            session.set_progress(callback);
        }

        let result: Result<TransferSummary, TransferError> = async {
            session.request_upload(req).await?;
            session.upload_data().await?;
            session.verify_crc().await?;
            session.summary()
        }
        .await;

        close_session(&mut session, false).await;
        let summary = result?;
        info!(
            path = %summary.local_path.display(),
            remote = %summary.remote,
            bytes = summary.file_size,
            rounds = summary.rounds,
            "upload complete"
        );
        Ok(summary)
    }

    /// Downloads into `req.local_path`, resuming from an existing chunk map.
    ///
    /// On failure the data file and chunk map are kept so a later call can
    /// resume. On success the map is removed.
    pub async fn download(
        &self,
        req: &TransferRequest,
        progress: Option<ProgressCallback>,
    ) -> Result<TransferSummary, TransferError> {
        let mut session = self.open_session().await?;
        if let Some(callback) = progress {
            session.set_progress(callback);
        }

        let result: Result<TransferSummary, TransferError> = async {
            session.request_download(req).await?;
            session.receive_data().await?;
            session.verify_crc().await?;
            session.summary()
        }
        .await;

        let summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                close_session(&mut session, false).await;
                return Err(e);
            }
        };
        session.finish(true).await?;

        info!(
            path = %summary.local_path.display(),
            remote = %summary.remote,
            bytes = summary.file_size,
            resumed_chunks = summary.resumed_chunks,
            rounds = summary.rounds,
            "download complete"
        );
        Ok(summary)
    }

    pub async fn upload_file(
        &self,
        local_path: impl Into<PathBuf>,
        remote_path: &str,
        backend: Backend,
        chunk_size: u16,
    ) -> Result<TransferSummary, TransferError> {
        let req = TransferRequest::file(local_path, remote_path, backend, chunk_size);
        self.upload(&req, None).await
    }

    pub async fn download_file(
        &self,
        remote_path: &str,
        local_path: impl Into<PathBuf>,
        backend: Backend,
        chunk_size: u16,
    ) -> Result<TransferSummary, TransferError> {
        let req = TransferRequest::file(local_path, remote_path, backend, chunk_size);
        self.download(&req, None).await
    }

    /// Uploads a local file into remote memory at `addr`.
    pub async fn upload_memory(
        &self,
        local_path: impl Into<PathBuf>,
        addr: u32,
        chunk_size: u16,
    ) -> Result<TransferSummary, TransferError> {
        let req = TransferRequest::memory(local_path, addr, 0, chunk_size);
        self.upload(&req, None).await
    }

    /// Downloads `size` bytes of remote memory starting at `addr`.
    pub async fn download_memory(
        &self,
        addr: u32,
        size: u32,
        local_path: impl Into<PathBuf>,
        chunk_size: u16,
    ) -> Result<TransferSummary, TransferError> {
        let req = TransferRequest::memory(local_path, addr, size, chunk_size);
        self.download(&req, None).await
    }

    // -----------------------------------------------------------------------
    // File management
    // -----------------------------------------------------------------------

    pub async fn move_file(
        &self,
        from: &str,
        to: &str,
        backend: Backend,
    ) -> Result<(), TransferError> {
        exchange::check_path(from)?;
        exchange::check_path(to)?;
        let msg = Message::MoveRequest(PathPair {
            from: from.to_owned(),
            to: to.to_owned(),
            backend,
        });
        self.request(msg, MessageKind::MoveReply, "move", self.config.timeout).await?;
        info!(from, to, "moved");
        Ok(())
    }

    pub async fn copy_file(
        &self,
        from: &str,
        to: &str,
        backend: Backend,
    ) -> Result<(), TransferError> {
        exchange::check_path(from)?;
        exchange::check_path(to)?;
        let msg = Message::CopyRequest(PathPair {
            from: from.to_owned(),
            to: to.to_owned(),
            backend,
        });
        self.request(msg, MessageKind::CopyReply, "copy", self.config.timeout).await?;
        info!(from, to, "copied");
        Ok(())
    }

    pub async fn remove(&self, path: &str, backend: Backend) -> Result<(), TransferError> {
        exchange::check_path(path)?;
        let msg = Message::RemoveRequest(RemoveRequest {
            path: path.to_owned(),
            backend,
        });
        self.request(msg, MessageKind::RemoveReply, "remove", self.config.timeout).await?;
        info!(path, "removed");
        Ok(())
    }

    /// Formats the filesystem mounted at `path`. Bounded by the mkfs timeout.
    pub async fn mkfs(
        &self,
        path: &str,
        backend: Backend,
        force: bool,
    ) -> Result<(), TransferError> {
        exchange::check_path(path)?;
        let msg = Message::MkfsRequest(MkfsRequest {
            path: path.to_owned(),
            backend,
            force,
        });
        self.request(msg, MessageKind::MkfsReply, "mkfs", self.config.mkfs_timeout).await?;
        info!(path, force, "filesystem formatted");
        Ok(())
    }

    /// Lists a remote directory.
    pub async fn list(
        &self,
        path: &str,
        backend: Backend,
    ) -> Result<Vec<ListEntry>, TransferError> {
        exchange::check_path(path)?;
        let timeout = self.config.timeout;
        let mut link = self.connect().await?;

        let result = async {
            let msg = Message::ListRequest(ListRequest {
                path: path.to_owned(),
                backend,
            });
            exchange::send(&mut link, &msg, timeout, "list request").await?;
            let reply = match exchange::recv(&mut link, timeout, "list reply").await? {
                Message::ListReply(reply) => reply,
                other => return Err(exchange::unexpected(MessageKind::ListReply, &other, "list")),
            };
            if !reply.status.is_ok() {
                return Err(TransferError::Remote {
                    op: "list",
                    status: reply.status,
                });
            }

            let mut entries = Vec::with_capacity(reply.entries as usize);
            while entries.len() < reply.entries as usize {
                let entry = match exchange::recv(&mut link, timeout, "list entry").await? {
                    Message::ListEntry(entry) => entry,
                    other => {
                        return Err(exchange::unexpected(MessageKind::ListEntry, &other, "list"));
                    }
                };
                let last = entry.index as u32 + 1 >= reply.entries as u32;
                entries.push(entry);
                if last {
                    break;
                }
            }
            Ok(entries)
        }
        .await;

        close_link(&mut link).await;
        let entries = result?;
        debug!(path, entries = entries.len(), "listing received");
        Ok(entries)
    }

    pub async fn zip(
        &self,
        src: &str,
        dest: &str,
        backend: Backend,
    ) -> Result<ZipReply, TransferError> {
        self.zip_request(src, dest, ZipAction::Zip, backend).await
    }

    pub async fn unzip(
        &self,
        src: &str,
        dest: &str,
        backend: Backend,
    ) -> Result<ZipReply, TransferError> {
        self.zip_request(src, dest, ZipAction::Unzip, backend).await
    }

    async fn zip_request(
        &self,
        src: &str,
        dest: &str,
        action: ZipAction,
        backend: Backend,
    ) -> Result<ZipReply, TransferError> {
        exchange::check_path(src)?;
        exchange::check_path(dest)?;
        let msg = Message::ZipRequest(ZipRequest {
            src: src.to_owned(),
            dest: dest.to_owned(),
            action,
            backend,
        });
        match self.request(msg, MessageKind::ZipReply, "zip", self.config.timeout).await? {
            Message::ZipReply(reply) => {
                info!(
                    src,
                    dest,
                    ?action,
                    compressed = reply.compressed,
                    decompressed = reply.decompressed,
                    "zip request done"
                );
                Ok(reply)
            }
            other => Err(exchange::unexpected(MessageKind::ZipReply, &other, "zip")),
        }
    }

    /// One request/reply exchange on a fresh connection.
    ///
    /// Returns the reply once its kind and status have been checked.
    async fn request(
        &self,
        msg: Message,
        expected: MessageKind,
        op: &'static str,
        timeout: Duration,
    ) -> Result<Message, TransferError> {
        let mut link = self.connect().await?;
        let result = async {
            exchange::send(&mut link, &msg, timeout, op).await?;
            let reply = exchange::recv(&mut link, timeout, op).await?;
            if reply.kind() != expected {
                return Err(exchange::unexpected(expected, &reply, op));
            }
            exchange::check_status(&reply, op)?;
            Ok(reply)
        }
        .await;
        close_link(&mut link).await;
        result
    }
}

async fn close_link<L: Link>(link: &mut L) {
    if let Err(e) = link.close().await {
        debug!(error = %e, "link close failed");
    }
}

/// Finishes a session whose outcome is already decided, keeping the chunk
/// map unless `remove_map` is set.
async fn close_session<L: Link>(session: &mut TransferSession<L>, remove_map: bool) {
    if let Err(e) = session.finish(remove_map).await {
        warn!(error = %e, "session cleanup failed");
    }
}
