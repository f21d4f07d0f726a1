//! Simulated remote node.
//!
//! Serves the full request set over any [`Link`]. Uploads keep their chunk
//! map in the node between connections, so a ground client can resume an
//! interrupted upload exactly as it would against real hardware.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use skyftp_link::{Link, LinkError};
use skyftp_protocol::constants::STATUS_RUNS_MAX;
use skyftp_protocol::{
    Backend, ChunkData, CrcReply, DownloadReply, DownloadRequest, EntryKind, ListEntry, ListReply,
    ListRequest, Message, MkfsRequest, PathPair, RemoveRequest, Status, StatusReply,
    UploadRequest, ZipReply, ZipRequest, validate_path,
};
use skyftp_transfer::status::{missing_runs, scheduled_chunks, validate_status};
use skyftp_transfer::{
    ChunkGeometry, ChunkReader, ChunkWriter, calculate_file_checksum, checksum_bytes,
};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::SimError;
use crate::storage::{FileStore, MemoryRegion, status_for};

/// Idle time after which a connection is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Start address of simulated memory.
pub const DEFAULT_MEMORY_BASE: u32 = 0x4800_0000;

/// Size of simulated memory: 1 MiB.
pub const DEFAULT_MEMORY_SIZE: usize = 1024 * 1024;

/// Simulated node configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub idle_timeout: Duration,
    pub memory_base: u32,
    pub memory_size: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            memory_base: DEFAULT_MEMORY_BASE,
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }
}

/// A simulated remote node. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RemoteNode {
    inner: Arc<Inner>,
}

struct Inner {
    config: SimConfig,
    files: FileStore,
    memory: Mutex<MemoryRegion>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    /// One-shot fault: the next transfer loses its link after this many chunks.
    drop_after: Mutex<Option<u32>>,
}

/// Remote-side chunk map of an unfinished upload.
struct PendingUpload {
    geometry: ChunkGeometry,
    crc32: u32,
    delivered: Vec<bool>,
}

impl PendingUpload {
    fn complete(&self) -> u32 {
        self.delivered.iter().filter(|&&d| d).count() as u32
    }

    fn is_complete(&self) -> bool {
        self.delivered.iter().all(|&d| d)
    }
}

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    Memory(u32),
}

impl Target {
    fn key(&self) -> String {
        match self {
            Target::File(path) => path.display().to_string(),
            Target::Memory(addr) => format!("mem:{addr:#010x}"),
        }
    }
}

enum Active {
    Upload {
        key: String,
        target: Target,
        geometry: ChunkGeometry,
        writer: Option<ChunkWriter>,
    },
    Download {
        target: Target,
        geometry: ChunkGeometry,
        reader: Option<ChunkReader>,
    },
}

impl Active {
    fn target(&self) -> (&Target, ChunkGeometry) {
        match self {
            Active::Upload {
                target, geometry, ..
            }
            | Active::Download {
                target, geometry, ..
            } => (target, *geometry),
        }
    }
}

enum Flow {
    Continue,
    Close,
}

impl RemoteNode {
    /// Creates a node whose filesystems live below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, SimConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: SimConfig) -> Self {
        let memory = MemoryRegion::new(config.memory_base, config.memory_size);
        Self {
            inner: Arc::new(Inner {
                files: FileStore::new(root),
                memory: Mutex::new(memory),
                uploads: Mutex::new(HashMap::new()),
                drop_after: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        self.inner.files.root()
    }

    pub fn config(&self) -> &SimConfig {
        &self.inner.config
    }

    /// Makes the next upload or download lose its link after `chunks` chunks.
    pub async fn drop_next_transfer_after(&self, chunks: u32) {
        *self.inner.drop_after.lock().await = Some(chunks);
    }

    /// Uploads the node has started but not completed.
    pub async fn pending_uploads(&self) -> usize {
        self.inner.uploads.lock().await.len()
    }

    pub async fn read_memory(&self, addr: u32, len: usize) -> Result<Vec<u8>, SimError> {
        Ok(self.inner.memory.lock().await.read(addr, len)?.to_vec())
    }

    pub async fn write_memory(&self, addr: u32, data: &[u8]) -> Result<(), SimError> {
        self.inner.memory.lock().await.write(addr, data)
    }

    /// Serves one connection until the peer sends done, closes the link or
    /// stays idle for too long.
    pub async fn serve_link<L: Link>(&self, link: L) -> Result<(), SimError> {
        let conn = Connection {
            node: &self.inner,
            link,
            active: None,
            chunk_budget: None,
        };
        conn.run().await
    }
}

impl Inner {
    fn target(&self, backend: Backend, path: &str, addr: u32) -> Result<Target, SimError> {
        match backend {
            Backend::MEMORY => Ok(Target::Memory(addr)),
            Backend::FAT | Backend::VFS | Backend::FILE => {
                Ok(Target::File(self.files.resolve_entry(path)?))
            }
            other => Err(SimError::UnsupportedBackend(other)),
        }
    }

    fn path_backend(&self, backend: Backend) -> Result<(), SimError> {
        match backend {
            Backend::FAT | Backend::VFS | Backend::FILE => Ok(()),
            other => Err(SimError::UnsupportedBackend(other)),
        }
    }

    async fn checksum(&self, target: &Target, len: u32) -> Result<u32, SimError> {
        match target {
            Target::File(path) => Ok(calculate_file_checksum(path)?),
            Target::Memory(addr) => {
                let memory = self.memory.lock().await;
                Ok(checksum_bytes(memory.read(*addr, len as usize)?))
            }
        }
    }
}

/// State of one connection.
struct Connection<'a, L: Link> {
    node: &'a Inner,
    link: L,
    active: Option<Active>,
    /// Chunks left before the injected link loss.
    chunk_budget: Option<u32>,
}

impl<L: Link> Connection<'_, L> {
    async fn run(mut self) -> Result<(), SimError> {
        let result = self.serve().await;
        if let Err(e) = self.link.close().await {
            debug!(error = %e, "close failed");
        }
        result
    }

    async fn serve(&mut self) -> Result<(), SimError> {
        loop {
            let frame = match self.link.recv(self.node.config.idle_timeout).await {
                Ok(frame) => frame,
                Err(LinkError::Closed) => {
                    debug!("peer closed connection");
                    return Ok(());
                }
                Err(LinkError::Timeout) => {
                    debug!("connection idle, dropping");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let msg = match Message::decode(&frame) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, len = frame.len(), "undecodable frame");
                    continue;
                }
            };
            trace!(kind = %msg.kind(), "request");

            if let Flow::Close = self.handle(msg).await? {
                return Ok(());
            }
        }
    }

    async fn handle(&mut self, msg: Message) -> Result<Flow, SimError> {
        match msg {
            Message::UploadRequest(req) => {
                let status = match self.begin_upload(&req).await {
                    Ok(()) => Status::Ok,
                    Err(e) => failed("upload", &e),
                };
                self.reply(Message::UploadReply(status)).await?;
            }
            Message::DownloadRequest(req) => {
                let reply = match self.begin_download(&req).await {
                    Ok((file_size, crc32)) => DownloadReply {
                        status: Status::Ok,
                        file_size,
                        crc32,
                    },
                    Err(e) => DownloadReply {
                        status: failed("download", &e),
                        file_size: 0,
                        crc32: 0,
                    },
                };
                self.reply(Message::DownloadReply(reply)).await?;
            }
            Message::StatusRequest => {
                let reply = self.upload_status().await;
                self.reply(Message::StatusReply(reply)).await?;
            }
            Message::StatusReply(status) => return self.send_chunks(&status).await,
            Message::ChunkData(data) => return self.store_chunk(data).await,
            Message::CrcRequest => {
                let reply = match self.crc().await {
                    Ok(crc32) => CrcReply {
                        status: Status::Ok,
                        crc32,
                    },
                    Err(e) => CrcReply {
                        status: failed("crc", &e),
                        crc32: 0,
                    },
                };
                self.reply(Message::CrcReply(reply)).await?;
            }
            Message::Done => {
                self.done().await;
                return Ok(Flow::Close);
            }
            Message::ListRequest(req) => self.list(&req).await?,
            Message::MoveRequest(pair) => {
                let status = status_of("move", self.rename(&pair));
                self.reply(Message::MoveReply(status)).await?;
            }
            Message::CopyRequest(pair) => {
                let status = status_of("copy", self.copy(&pair));
                self.reply(Message::CopyReply(status)).await?;
            }
            Message::RemoveRequest(req) => {
                let status = status_of("remove", self.remove(&req));
                self.reply(Message::RemoveReply(status)).await?;
            }
            Message::MkfsRequest(req) => {
                let status = status_of("mkfs", self.mkfs(&req));
                self.reply(Message::MkfsReply(status)).await?;
            }
            Message::ZipRequest(req) => self.zip(&req).await?,
            other => warn!(kind = %other.kind(), "unexpected message, ignoring"),
        }
        Ok(Flow::Continue)
    }

    async fn reply(&mut self, msg: Message) -> Result<(), SimError> {
        let frame = msg.encode()?;
        trace!(kind = %msg.kind(), len = frame.len(), "reply");
        self.link.send(&frame, self.node.config.idle_timeout).await?;
        Ok(())
    }

    async fn arm_fault(&mut self) {
        self.chunk_budget = self.node.drop_after.lock().await.take();
        if let Some(chunks) = self.chunk_budget {
            info!(chunks, "link loss armed for this transfer");
        }
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    async fn begin_upload(&mut self, req: &UploadRequest) -> Result<(), SimError> {
        let geometry = ChunkGeometry::new(req.file_size, req.chunk_size)?;
        let target = self.node.target(req.backend, &req.path, req.mem_addr)?;
        let key = target.key();

        let mut uploads = self.node.uploads.lock().await;
        let resumable = match (uploads.get(&key), &target) {
            (Some(pending), Target::File(path)) => {
                pending.geometry == geometry && pending.crc32 == req.crc32 && path.exists()
            }
            (Some(pending), Target::Memory(_)) => {
                pending.geometry == geometry && pending.crc32 == req.crc32
            }
            (None, _) => false,
        };

        if resumable {
            info!(target = %key, "resuming upload");
        } else {
            match &target {
                Target::File(path) => {
                    let file = File::create(path)?;
                    file.set_len(req.file_size as u64)?;
                }
                Target::Memory(addr) => {
                    self.node
                        .memory
                        .lock()
                        .await
                        .read(*addr, req.file_size as usize)?;
                }
            }
            uploads.insert(
                key.clone(),
                PendingUpload {
                    geometry,
                    crc32: req.crc32,
                    delivered: vec![false; geometry.chunk_count() as usize],
                },
            );
            info!(
                target = %key,
                file_size = req.file_size,
                chunks = geometry.chunk_count(),
                "upload started"
            );
        }
        drop(uploads);

        let writer = match &target {
            Target::File(path) => Some(ChunkWriter::open(path, geometry)?),
            Target::Memory(_) => None,
        };
        self.active = Some(Active::Upload {
            key,
            target,
            geometry,
            writer,
        });
        self.arm_fault().await;
        Ok(())
    }

    async fn upload_status(&mut self) -> StatusReply {
        let key = match &self.active {
            Some(Active::Upload { key, .. }) => key,
            _ => {
                warn!("status request without an upload");
                return StatusReply {
                    status: Status::InvalidArgument,
                    complete: 0,
                    total: 0,
                    runs: Vec::new(),
                };
            }
        };

        let uploads = self.node.uploads.lock().await;
        match uploads.get(key) {
            Some(pending) => StatusReply {
                status: Status::Ok,
                complete: pending.complete(),
                total: pending.geometry.chunk_count(),
                runs: missing_runs(pending.delivered.iter().copied(), STATUS_RUNS_MAX),
            },
            None => StatusReply {
                status: Status::Io,
                complete: 0,
                total: 0,
                runs: Vec::new(),
            },
        }
    }

    async fn store_chunk(&mut self, data: ChunkData) -> Result<Flow, SimError> {
        let Some(Active::Upload {
            key,
            target,
            geometry,
            writer,
        }) = &mut self.active
        else {
            warn!(chunk = data.chunk, "chunk outside an upload, dropping");
            return Ok(Flow::Continue);
        };

        let chunk = data.chunk;
        if !geometry.contains(chunk) {
            warn!(chunk, chunks = geometry.chunk_count(), "chunk out of range, dropping");
            return Ok(Flow::Continue);
        }
        let len = geometry.chunk_len(chunk);
        if data.data.len() < len {
            warn!(chunk, len = data.data.len(), expected = len, "short chunk, dropping");
            return Ok(Flow::Continue);
        }

        match (target, writer) {
            (Target::File(_), Some(writer)) => writer.write_chunk(chunk, &data.data)?,
            (Target::Memory(addr), _) => {
                let at = addr.wrapping_add(geometry.chunk_offset(chunk) as u32);
                self.node.memory.lock().await.write(at, &data.data[..len])?;
            }
            (Target::File(path), None) => {
                return Err(SimError::InvalidPath(format!(
                    "{} has no open writer",
                    path.display()
                )));
            }
        }

        if let Some(pending) = self.node.uploads.lock().await.get_mut(key.as_str()) {
            pending.delivered[chunk as usize] = true;
        }
        trace!(chunk, "chunk stored");
        Ok(spend(&mut self.chunk_budget))
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    async fn begin_download(&mut self, req: &DownloadRequest) -> Result<(u32, u32), SimError> {
        let target = self.node.target(req.backend, &req.path, req.mem_addr)?;

        let (geometry, crc32, reader) = match &target {
            Target::File(path) => {
                let meta = std::fs::metadata(path)?;
                if meta.is_dir() {
                    return Err(SimError::InvalidPath(format!("{} is a directory", req.path)));
                }
                let file_size = u32::try_from(meta.len())
                    .map_err(|_| skyftp_transfer::TransferError::FileTooLarge(meta.len()))?;
                let geometry = ChunkGeometry::new(file_size, req.chunk_size)?;
                let crc32 = calculate_file_checksum(path)?;
                (geometry, crc32, Some(ChunkReader::new(path, geometry)?))
            }
            Target::Memory(addr) => {
                let geometry = ChunkGeometry::new(req.mem_size, req.chunk_size)?;
                let crc32 = self.node.checksum(&target, req.mem_size).await?;
                debug!(addr = %format!("{addr:#010x}"), size = req.mem_size, "memory download");
                (geometry, crc32, None)
            }
        };

        info!(
            target = %target.key(),
            file_size = geometry.file_size(),
            chunks = geometry.chunk_count(),
            "download started"
        );
        self.active = Some(Active::Download {
            target,
            geometry,
            reader,
        });
        self.arm_fault().await;
        Ok((geometry.file_size(), crc32))
    }

    /// Sends the chunks named by the ground's status message.
    async fn send_chunks(&mut self, status: &StatusReply) -> Result<Flow, SimError> {
        let Some(Active::Download {
            target,
            geometry,
            reader,
        }) = &mut self.active
        else {
            warn!("status message without a download, ignoring");
            return Ok(Flow::Continue);
        };
        if let Err(e) = validate_status(status, geometry.chunk_count()) {
            warn!(error = %e, "rejecting ground status");
            return Ok(Flow::Continue);
        }
        debug!(
            complete = status.complete,
            total = status.total,
            runs = status.runs.len(),
            "ground status"
        );

        for chunk in scheduled_chunks(&status.runs) {
            let data = match (&*target, reader.as_mut()) {
                (Target::File(_), Some(reader)) => reader.read_chunk(chunk)?,
                (Target::Memory(addr), _) => {
                    let at = addr.wrapping_add(geometry.chunk_offset(chunk) as u32);
                    let memory = self.node.memory.lock().await;
                    memory.read(at, geometry.chunk_len(chunk))?.to_vec()
                }
                (Target::File(path), None) => {
                    return Err(SimError::InvalidPath(format!(
                        "{} has no open reader",
                        path.display()
                    )));
                }
            };

            let frame = Message::ChunkData(ChunkData {
                chunk,
                data: Bytes::from(data),
            })
            .encode()?;
            self.link.send(&frame, self.node.config.idle_timeout).await?;

            if let Flow::Close = spend(&mut self.chunk_budget) {
                return Ok(Flow::Close);
            }
        }
        Ok(Flow::Continue)
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    async fn crc(&mut self) -> Result<u32, SimError> {
        let Some(active) = &self.active else {
            return Err(SimError::InvalidPath("no transfer in progress".into()));
        };
        let (target, geometry) = active.target();
        let crc32 = self.node.checksum(target, geometry.file_size()).await?;

        // A verified upload no longer needs its map, even if done never comes.
        if let Active::Upload { key, .. } = active {
            let mut uploads = self.node.uploads.lock().await;
            if uploads.get(key).is_some_and(PendingUpload::is_complete) {
                uploads.remove(key);
                info!(target = %key, "upload complete");
            }
        }
        Ok(crc32)
    }

    async fn done(&mut self) {
        if let Some(Active::Upload { key, .. }) = self.active.take() {
            let uploads = self.node.uploads.lock().await;
            if let Some(pending) = uploads.get(&key) {
                debug!(
                    target = %key,
                    complete = pending.complete(),
                    total = pending.geometry.chunk_count(),
                    "upload left for resume"
                );
            }
        }
        debug!("session done");
    }

    // -----------------------------------------------------------------------
    // File management
    // -----------------------------------------------------------------------

    async fn list(&mut self, req: &ListRequest) -> Result<(), SimError> {
        let entries = match self.read_dir(req) {
            Ok(entries) => entries,
            Err(e) => {
                let status = failed("list", &e);
                return self
                    .reply(Message::ListReply(ListReply { status, entries: 0 }))
                    .await;
            }
        };

        self.reply(Message::ListReply(ListReply {
            status: Status::Ok,
            entries: entries.len() as u16,
        }))
        .await?;
        for entry in entries {
            self.reply(Message::ListEntry(entry)).await?;
        }
        Ok(())
    }

    fn read_dir(&self, req: &ListRequest) -> Result<Vec<ListEntry>, SimError> {
        self.node.path_backend(req.backend)?;
        let dir = self.node.files.resolve(&req.path)?;

        let mut found = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_path(&name).is_err() {
                warn!(name, "name does not fit a list entry, skipping");
                continue;
            }
            let meta = entry.metadata()?;
            let kind = if meta.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            found.push((name, kind, meta.len().min(u32::MAX as u64) as u32));
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.truncate(u16::MAX as usize);

        Ok(found
            .into_iter()
            .enumerate()
            .map(|(index, (path, kind, size))| ListEntry {
                index: index as u16,
                kind,
                size,
                path,
            })
            .collect())
    }

    fn rename(&self, pair: &PathPair) -> Result<(), SimError> {
        self.node.path_backend(pair.backend)?;
        let from = self.node.files.resolve_entry(&pair.from)?;
        let to = self.node.files.resolve_entry(&pair.to)?;
        std::fs::rename(&from, &to)?;
        info!(from = %pair.from, to = %pair.to, "moved");
        Ok(())
    }

    fn copy(&self, pair: &PathPair) -> Result<(), SimError> {
        self.node.path_backend(pair.backend)?;
        let from = self.node.files.resolve_entry(&pair.from)?;
        let to = self.node.files.resolve_entry(&pair.to)?;
        let bytes = std::fs::copy(&from, &to)?;
        info!(from = %pair.from, to = %pair.to, bytes, "copied");
        Ok(())
    }

    fn remove(&self, req: &RemoveRequest) -> Result<(), SimError> {
        self.node.path_backend(req.backend)?;
        let path = self.node.files.resolve_entry(&req.path)?;
        if path.is_dir() {
            std::fs::remove_dir(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        info!(path = %req.path, "removed");
        Ok(())
    }

    fn mkfs(&self, req: &MkfsRequest) -> Result<(), SimError> {
        self.node.path_backend(req.backend)?;
        let dir = self.node.files.resolve(&req.path)?;
        self.node.files.clear(&dir)?;
        info!(path = %req.path, force = req.force, "filesystem formatted");
        Ok(())
    }

    async fn zip(&mut self, req: &ZipRequest) -> Result<(), SimError> {
        debug!(src = %req.src, dest = %req.dest, action = ?req.action, "zip not supported");
        self.reply(Message::ZipReply(ZipReply {
            status: Status::NotSupported,
            compressed: 0,
            decompressed: 0,
        }))
        .await
    }
}

/// Counts one chunk against the injected fault.
fn spend(budget: &mut Option<u32>) -> Flow {
    match budget {
        Some(left) => {
            *left = left.saturating_sub(1);
            if *left == 0 {
                warn!("injected link loss");
                *budget = None;
                Flow::Close
            } else {
                Flow::Continue
            }
        }
        None => Flow::Continue,
    }
}

fn failed(op: &str, err: &SimError) -> Status {
    let status = status_for(err);
    warn!(op, error = %err, %status, "request failed");
    status
}

fn status_of(op: &str, result: Result<(), SimError>) -> Status {
    match result {
        Ok(()) => Status::Ok,
        Err(e) => failed(op, &e),
    }
}
