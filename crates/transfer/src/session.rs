//! Transfer session controller.
//!
//! A session owns one link, one local data file and (for downloads) its chunk
//! map. Phases are driven by the caller in a fixed order:
//!
//! ```text
//! upload:   request_upload -> upload_data  -> verify_crc -> finish
//! download: request_download -> receive_data -> verify_crc -> finish
//! ```
//!
//! Every exchange is awaited before the next one is issued, and every link
//! operation is bounded by [`ClientConfig::timeout`]. The session never
//! retries; callers decide whether to open a new session and resume.

use std::time::Instant;

use bytes::Bytes;
use skyftp_link::Link;
use skyftp_protocol::constants::CHUNK_HEADER_LEN;
use skyftp_protocol::{
    ChunkData, DownloadRequest, Message, MessageKind, StatusReply, StatusRun, UploadRequest,
};
use tracing::{debug, info, trace, warn};

use crate::chunk_map::ChunkMap;
use crate::chunked::{ChunkReader, ChunkWriter, calculate_file_checksum};
use crate::config::ClientConfig;
use crate::exchange;
use crate::geometry::ChunkGeometry;
use crate::progress::{ProgressCallback, ProgressEstimator, ProgressReport};
use crate::status::{scheduled_chunks, status_report, validate_status};
use crate::types::{
    Direction, SessionState, TransferDescriptor, TransferRequest, TransferSummary,
};
use crate::TransferError;

/// One upload or download over one link.
pub struct TransferSession<L: Link> {
    link: L,
    config: ClientConfig,
    state: SessionState,
    descriptor: Option<TransferDescriptor>,
    map: Option<ChunkMap>,
    reader: Option<ChunkReader>,
    writer: Option<ChunkWriter>,
    progress: Option<ProgressCallback>,
    resumed_chunks: u32,
    rounds: u32,
    verified_crc: Option<u32>,
}

impl<L: Link> TransferSession<L> {
    pub fn new(link: L, config: ClientConfig) -> Self {
        Self {
            link,
            config,
            state: SessionState::Idle,
            descriptor: None,
            map: None,
            reader: None,
            writer: None,
            progress: None,
            resumed_chunks: 0,
            rounds: 0,
            verified_crc: None,
        }
    }

    /// Registers a callback for throttled progress reports.
    pub fn set_progress(&mut self, callback: ProgressCallback) {
        self.progress = Some(callback);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn descriptor(&self) -> Option<&TransferDescriptor> {
        self.descriptor.as_ref()
    }

    /// Data rounds run so far.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Chunks already on disk when a download was resumed.
    pub fn resumed_chunks(&self) -> u32 {
        self.resumed_chunks
    }

    // -----------------------------------------------------------------------
    // Upload
    // -----------------------------------------------------------------------

    /// Announces an upload of `req.local_path` and waits for the remote to
    /// accept it.
    pub async fn request_upload(&mut self, req: &TransferRequest) -> Result<(), TransferError> {
        self.check_request(req)?;

        let len = std::fs::metadata(&req.local_path)?.len();
        let file_size = u32::try_from(len).map_err(|_| TransferError::FileTooLarge(len))?;
        let checksum = calculate_file_checksum(&req.local_path)?;
        let geometry = ChunkGeometry::new(file_size, req.chunk_size)?;
        self.reader = Some(ChunkReader::new(&req.local_path, geometry)?);

        info!(
            path = %req.local_path.display(),
            remote = %req.remote,
            file_size,
            chunks = geometry.chunk_count(),
            crc32 = %format!("{checksum:#010x}"),
            "requesting upload"
        );

        let msg = Message::UploadRequest(UploadRequest {
            chunk_size: req.chunk_size,
            file_size,
            crc32: checksum,
            mem_addr: req.remote.mem_addr(),
            backend: req.remote.backend(),
            path: req.remote.path().to_owned(),
        });
        self.state = SessionState::RequestSent;
        exchange::send(&mut self.link, &msg, self.config.timeout, "upload request").await?;

        self.state = SessionState::AwaitingRequestReply;
        match exchange::recv(&mut self.link, self.config.timeout, "upload reply").await? {
            Message::UploadReply(status) if status.is_ok() => {}
            Message::UploadReply(status) => {
                return Err(TransferError::Remote {
                    op: "upload",
                    status,
                });
            }
            other => return Err(exchange::unexpected(MessageKind::UploadReply, &other, "upload")),
        }

        self.descriptor = Some(TransferDescriptor {
            direction: Direction::Upload,
            local_path: req.local_path.clone(),
            remote: req.remote.clone(),
            geometry,
            checksum,
        });
        self.state = SessionState::UploadDataPhase;
        Ok(())
    }

    /// Sends the chunks the remote reports missing until it reports the file
    /// complete.
    pub async fn upload_data(&mut self) -> Result<(), TransferError> {
        let geometry = self.geometry()?;

        loop {
            let status = self.request_status(geometry).await?;
            if status.is_complete() {
                break;
            }
            if self.rounds >= self.config.max_status_rounds {
                return Err(TransferError::Incomplete {
                    rounds: self.rounds,
                    complete: status.complete,
                    total: status.total,
                });
            }
            self.rounds += 1;
            self.send_chunks(geometry, &status.runs).await?;
        }

        info!(rounds = self.rounds, "upload data complete");
        self.state = SessionState::CompletionPhase;
        Ok(())
    }

    async fn request_status(
        &mut self,
        geometry: ChunkGeometry,
    ) -> Result<StatusReply, TransferError> {
        self.state = SessionState::AwaitingStatusReply;
        exchange::send(
            &mut self.link,
            &Message::StatusRequest,
            self.config.timeout,
            "status request",
        )
        .await?;

        let timeout = self.config.timeout;
        let reply = match exchange::recv(&mut self.link, timeout, "status reply").await? {
            Message::StatusReply(reply) => reply,
            other => return Err(exchange::unexpected(MessageKind::StatusReply, &other, "status")),
        };
        if !reply.status.is_ok() {
            return Err(TransferError::Remote {
                op: "status",
                status: reply.status,
            });
        }
        validate_status(&reply, geometry.chunk_count())?;

        info!(
            complete = reply.complete,
            total = reply.total,
            runs = reply.runs.len(),
            "remote transfer status"
        );
        Ok(reply)
    }

    async fn send_chunks(
        &mut self,
        geometry: ChunkGeometry,
        runs: &[StatusRun],
    ) -> Result<(), TransferError> {
        self.state = SessionState::SendingData;
        let reader = self.reader.as_mut().ok_or_else(not_started)?;
        let mut estimator = ProgressEstimator::new(&geometry, Instant::now());

        for chunk in scheduled_chunks(runs) {
            let data = reader.read_chunk(chunk)?;
            let msg = Message::ChunkData(ChunkData {
                chunk,
                data: Bytes::from(data),
            });
            exchange::send(&mut self.link, &msg, self.config.timeout, "chunk data").await?;

            if let Some(report) = estimator.update(chunk, Instant::now()) {
                emit(&mut self.progress, &report);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Asks the remote for a file (or memory range) and prepares the local
    /// data file and chunk map, resuming a previous session when both exist.
    pub async fn request_download(&mut self, req: &TransferRequest) -> Result<(), TransferError> {
        self.check_request(req)?;

        let msg = Message::DownloadRequest(DownloadRequest {
            chunk_size: req.chunk_size,
            mem_addr: req.remote.mem_addr(),
            mem_size: req.remote.mem_size(),
            backend: req.remote.backend(),
            path: req.remote.path().to_owned(),
        });
        self.state = SessionState::RequestSent;
        exchange::send(&mut self.link, &msg, self.config.timeout, "download request").await?;

        self.state = SessionState::AwaitingRequestReply;
        let timeout = self.config.timeout;
        let reply = match exchange::recv(&mut self.link, timeout, "download reply").await? {
            Message::DownloadReply(reply) => reply,
            other => {
                return Err(exchange::unexpected(MessageKind::DownloadReply, &other, "download"));
            }
        };
        if !reply.status.is_ok() {
            return Err(TransferError::Remote {
                op: "download",
                status: reply.status,
            });
        }

        let geometry = ChunkGeometry::new(reply.file_size, req.chunk_size)?;
        info!(
            remote = %req.remote,
            path = %req.local_path.display(),
            file_size = reply.file_size,
            chunks = geometry.chunk_count(),
            crc32 = %format!("{:#010x}", reply.crc32),
            "download accepted"
        );

        let map = ChunkMap::open_or_create(&req.local_path, geometry.chunk_count())?;
        let writer = if map.is_resumed() {
            ChunkWriter::open(&req.local_path, geometry)?
        } else {
            match ChunkWriter::create(&req.local_path, geometry) {
                Ok(writer) => writer,
                Err(e) => {
                    if let Err(del) = map.delete() {
                        warn!(error = %del, "failed to remove fresh chunk map");
                    }
                    return Err(e);
                }
            }
        };

        self.resumed_chunks = map.count_delivered();
        if map.is_resumed() {
            info!(
                delivered = self.resumed_chunks,
                total = geometry.chunk_count(),
                "resuming download"
            );
        }

        self.map = Some(map);
        self.writer = Some(writer);
        self.descriptor = Some(TransferDescriptor {
            direction: Direction::Download,
            local_path: req.local_path.clone(),
            remote: req.remote.clone(),
            geometry,
            checksum: reply.crc32,
        });
        self.state = SessionState::DownloadStatusPhase;
        Ok(())
    }

    /// Reports local completion to the remote and stores the chunks it sends
    /// back, round after round, until every chunk is on disk.
    ///
    /// The chunk map is synced but kept; only [`finish`](Self::finish)
    /// removes it.
    pub async fn receive_data(&mut self) -> Result<(), TransferError> {
        let geometry = self.geometry()?;

        loop {
            let report = status_report(self.map.as_ref().ok_or_else(not_started)?);
            info!(
                complete = report.complete,
                total = report.total,
                runs = report.runs.len(),
                "local transfer status"
            );
            if report.is_complete() {
                break;
            }
            if self.rounds >= self.config.max_status_rounds {
                return Err(TransferError::Incomplete {
                    rounds: self.rounds,
                    complete: report.complete,
                    total: report.total,
                });
            }
            self.rounds += 1;

            self.state = SessionState::DownloadStatusPhase;
            let runs = report.runs.clone();
            exchange::send(
                &mut self.link,
                &Message::StatusReply(report),
                self.config.timeout,
                "status reply",
            )
            .await?;

            self.state = SessionState::ReceivingData;
            self.receive_round(geometry, &runs).await?;
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.sync()?;
        }
        if let Some(map) = self.map.as_mut() {
            map.sync()?;
        }
        self.state = SessionState::CompletionPhase;
        Ok(())
    }

    /// Receives chunks until the final index of the last reported run
    /// arrives, or every scheduled chunk has.
    async fn receive_round(
        &mut self,
        geometry: ChunkGeometry,
        runs: &[StatusRun],
    ) -> Result<(), TransferError> {
        let Some(last_run) = runs.last() else {
            return Ok(());
        };
        let final_index = (last_run.end() - 1) as u32;
        let mut outstanding: u64 = runs.iter().map(|run| run.count as u64).sum();

        let map = self.map.as_mut().ok_or_else(not_started)?;
        let writer = self.writer.as_mut().ok_or_else(not_started)?;
        let mut estimator = ProgressEstimator::new(&geometry, Instant::now());

        loop {
            let msg = exchange::recv(&mut self.link, self.config.timeout, "chunk data").await?;
            let data = match msg {
                Message::ChunkData(data) => data,
                other => {
                    return Err(exchange::unexpected(MessageKind::ChunkData, &other, "download"));
                }
            };

            let chunk = data.chunk;
            if !geometry.contains(chunk) {
                warn!(
                    chunk,
                    chunk_count = geometry.chunk_count(),
                    "dropping chunk outside file"
                );
                continue;
            }

            let fresh = !map.is_delivered(chunk);
            writer.write_chunk(chunk, &data.data)?;
            map.mark_delivered(chunk)?;
            if fresh && runs.iter().any(|run| run.indices().contains(&chunk)) {
                outstanding -= 1;
            }

            if let Some(report) = estimator.update(chunk, Instant::now()) {
                emit(&mut self.progress, &report);
            }

            if chunk == final_index || outstanding == 0 {
                break;
            }
        }

        debug!(
            delivered = map.count_delivered(),
            total = map.chunk_count(),
            "download round finished"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Asks the remote for its CRC32 of the file and compares it with the
    /// local file read back from disk.
    pub async fn verify_crc(&mut self) -> Result<u32, TransferError> {
        let local_path = self
            .descriptor
            .as_ref()
            .map(|d| d.local_path.clone())
            .ok_or_else(not_started)?;

        self.state = SessionState::CompletionPhase;
        exchange::send(
            &mut self.link,
            &Message::CrcRequest,
            self.config.timeout,
            "crc request",
        )
        .await?;

        let reply = match exchange::recv(&mut self.link, self.config.timeout, "crc reply").await? {
            Message::CrcReply(reply) => reply,
            other => return Err(exchange::unexpected(MessageKind::CrcReply, &other, "crc")),
        };
        if !reply.status.is_ok() {
            return Err(TransferError::Remote {
                op: "crc",
                status: reply.status,
            });
        }

        let local = calculate_file_checksum(&local_path)?;
        if local != reply.crc32 {
            warn!(
                local = %format!("{local:#010x}"),
                remote = %format!("{:#010x}", reply.crc32),
                "checksum mismatch"
            );
            return Err(TransferError::ChecksumMismatch {
                local,
                remote: reply.crc32,
            });
        }

        info!(crc32 = %format!("{local:#010x}"), "checksum verified");
        self.verified_crc = Some(local);
        Ok(local)
    }

    /// Closes the local files, optionally removes the chunk map, tells the
    /// remote the session is over and closes the link.
    ///
    /// The done message and the close are best effort. Calling `finish` on a
    /// closed session does nothing.
    pub async fn finish(&mut self, remove_map: bool) -> Result<(), TransferError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        self.reader = None;
        self.writer = None;

        let mut result = Ok(());
        if let Some(map) = self.map.take() {
            if remove_map {
                if let Err(e) = map.delete() {
                    warn!(error = %e, "failed to remove chunk map");
                    result = Err(e);
                }
            }
        }

        if let Err(e) =
            exchange::send(&mut self.link, &Message::Done, self.config.timeout, "done").await
        {
            debug!(error = %e, "done message not delivered");
        }
        if let Err(e) = self.link.close().await {
            debug!(error = %e, "link close failed");
        }

        self.state = SessionState::Closed;
        result
    }

    /// Summary of the transfer handled by this session.
    pub fn summary(&self) -> Result<TransferSummary, TransferError> {
        let d = self.descriptor.as_ref().ok_or_else(not_started)?;
        Ok(TransferSummary {
            direction: d.direction,
            local_path: d.local_path.clone(),
            remote: d.remote.to_string(),
            file_size: d.geometry.file_size(),
            chunk_size: d.geometry.chunk_size(),
            chunk_count: d.geometry.chunk_count(),
            crc32: self.verified_crc.unwrap_or(d.checksum),
            resumed_chunks: self.resumed_chunks,
            rounds: self.rounds,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn check_request(&self, req: &TransferRequest) -> Result<(), TransferError> {
        if self.state != SessionState::Idle {
            return Err(TransferError::InvalidArgument(format!(
                "session already in state {:?}",
                self.state
            )));
        }
        if req.chunk_size == 0 {
            return Err(TransferError::InvalidArgument(
                "chunk size must be greater than zero".into(),
            ));
        }
        let frame_len = CHUNK_HEADER_LEN + req.chunk_size as usize;
        if frame_len > self.link.mtu() {
            return Err(TransferError::InvalidArgument(format!(
                "chunk size {} does not fit link MTU {} ({CHUNK_HEADER_LEN} header bytes)",
                req.chunk_size,
                self.link.mtu()
            )));
        }
        exchange::check_path(req.remote.path())
    }

    fn geometry(&self) -> Result<ChunkGeometry, TransferError> {
        self.descriptor
            .as_ref()
            .map(|d| d.geometry)
            .ok_or_else(not_started)
    }
}

fn not_started() -> TransferError {
    TransferError::InvalidArgument("no transfer in progress".into())
}

fn emit(progress: &mut Option<ProgressCallback>, report: &ProgressReport) {
    trace!(progress = %report.render(), "progress");
    if let Some(callback) = progress.as_mut() {
        callback(report);
    }
}
