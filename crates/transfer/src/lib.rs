//! Chunked, resumable file transfer engine.
//!
//! Files travel as fixed-size chunks. The receiving side keeps a chunk map
//! (one byte per chunk) so an interrupted transfer resumes by exchanging
//! status messages that name the missing runs. Every transfer ends with a
//! CRC32 comparison of the whole file.
//!
//! [`FtpClient`] is the entry point; [`TransferSession`] exposes the
//! individual phases for callers that drive a transfer themselves.

pub mod chunk_map;
mod chunked;
mod client;
mod config;
mod error;
mod exchange;
pub mod geometry;
mod progress;
mod session;
pub mod status;
mod types;

pub use chunk_map::{ChunkMap, map_path, remove_map};
pub use chunked::{ChunkReader, ChunkWriter, calculate_file_checksum, checksum_bytes};
pub use client::FtpClient;
pub use config::{
    ClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_STATUS_ROUNDS, DEFAULT_MKFS_TIMEOUT,
    DEFAULT_TIMEOUT,
};
pub use error::TransferError;
pub use geometry::{ChunkGeometry, chunk_count};
pub use progress::{
    PROGRESS_WIDTH, ProgressCallback, ProgressEstimator, ProgressReport, format_eta,
};
pub use session::TransferSession;
pub use types::{
    Direction, RemoteTarget, SessionState, TransferDescriptor, TransferRequest, TransferSummary,
};

/// Default chunk size in bytes.
///
/// A chunk frame (five header bytes plus the payload) must fit the link MTU.
pub const DEFAULT_CHUNK_SIZE: u16 = 175;
