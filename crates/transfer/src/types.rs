use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use skyftp_protocol::Backend;

use crate::geometry::ChunkGeometry;

/// Transfer direction, seen from the ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upload,
    Download,
}

/// Where the remote end of a transfer lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RemoteTarget {
    /// A file on one of the remote storage backends.
    File { path: String, backend: Backend },
    /// A raw memory range. `size` is only used by downloads; uploads send
    /// the local file size.
    Memory { addr: u32, size: u32 },
}

impl RemoteTarget {
    pub fn backend(&self) -> Backend {
        match self {
            RemoteTarget::File { backend, .. } => *backend,
            RemoteTarget::Memory { .. } => Backend::MEMORY,
        }
    }

    /// Path field of the request; empty for memory transfers.
    pub fn path(&self) -> &str {
        match self {
            RemoteTarget::File { path, .. } => path,
            RemoteTarget::Memory { .. } => "",
        }
    }

    pub fn mem_addr(&self) -> u32 {
        match self {
            RemoteTarget::File { .. } => 0,
            RemoteTarget::Memory { addr, .. } => *addr,
        }
    }

    pub fn mem_size(&self) -> u32 {
        match self {
            RemoteTarget::File { .. } => 0,
            RemoteTarget::Memory { size, .. } => *size,
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteTarget::File { path, backend } => write!(f, "{backend}:{path}"),
            RemoteTarget::Memory { addr, size } => write!(f, "mem:{addr:#010x}+{size:#x}"),
        }
    }
}

/// What the caller asks to move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub local_path: PathBuf,
    pub remote: RemoteTarget,
    pub chunk_size: u16,
}

impl TransferRequest {
    pub fn file(
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        backend: Backend,
        chunk_size: u16,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote: RemoteTarget::File {
                path: remote_path.into(),
                backend,
            },
            chunk_size,
        }
    }

    pub fn memory(local_path: impl Into<PathBuf>, addr: u32, size: u32, chunk_size: u16) -> Self {
        Self {
            local_path: local_path.into(),
            remote: RemoteTarget::Memory { addr, size },
            chunk_size,
        }
    }
}

/// Everything known about a transfer once the remote has accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferDescriptor {
    pub direction: Direction,
    pub local_path: PathBuf,
    pub remote: RemoteTarget,
    pub geometry: ChunkGeometry,
    /// CRC32 of the whole file as announced at session start.
    pub checksum: u32,
}

/// Session controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    RequestSent,
    AwaitingRequestReply,
    UploadDataPhase,
    DownloadStatusPhase,
    AwaitingStatusReply,
    ReceivingData,
    SendingData,
    CompletionPhase,
    Closed,
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub direction: Direction,
    pub local_path: PathBuf,
    pub remote: String,
    pub file_size: u32,
    pub chunk_size: u16,
    pub chunk_count: u32,
    /// Verified CRC32 of the file.
    pub crc32: u32,
    /// Chunks already present when the session started.
    pub resumed_chunks: u32,
    /// Data rounds needed to complete.
    pub rounds: u32,
}
