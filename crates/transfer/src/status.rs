//! Status run codec.
//!
//! A status message summarises a chunk map as a completion count plus the
//! first [`STATUS_RUNS_MAX`] runs of missing chunks. The receiver of a status
//! message sends exactly the chunks the runs name; later rounds reveal runs
//! that did not fit.

use skyftp_protocol::constants::STATUS_RUNS_MAX;
use skyftp_protocol::{Status, StatusReply, StatusRun};

use crate::TransferError;
use crate::chunk_map::ChunkMap;

/// Collects up to `limit` runs of missing chunks from per-chunk delivered
/// flags, in index order. A run still open at the last chunk is closed there.
pub fn missing_runs<I>(delivered: I, limit: usize) -> Vec<StatusRun>
where
    I: IntoIterator<Item = bool>,
{
    let mut runs = Vec::new();
    if limit == 0 {
        return runs;
    }

    let mut open: Option<u32> = None;
    let mut len = 0u32;
    for (i, done) in delivered.into_iter().enumerate() {
        let i = i as u32;
        len = i + 1;
        match (done, open) {
            (false, None) => open = Some(i),
            (true, Some(start)) => {
                runs.push(StatusRun::new(start, i - start));
                open = None;
                if runs.len() == limit {
                    return runs;
                }
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        runs.push(StatusRun::new(start, len - start));
    }
    runs
}

/// Builds the status message describing `map`.
pub fn status_report(map: &ChunkMap) -> StatusReply {
    StatusReply {
        status: Status::Ok,
        complete: map.count_delivered(),
        total: map.chunk_count(),
        runs: map.missing_runs(STATUS_RUNS_MAX),
    }
}

/// Checks a status message received from the remote against the local
/// chunk count.
pub fn validate_status(reply: &StatusReply, chunk_count: u32) -> Result<(), TransferError> {
    if reply.total != chunk_count {
        return Err(TransferError::InvalidStatus(format!(
            "remote reports {} chunks, transfer has {chunk_count}",
            reply.total
        )));
    }
    if reply.complete > reply.total {
        return Err(TransferError::InvalidStatus(format!(
            "{} of {} chunks complete",
            reply.complete, reply.total
        )));
    }

    let mut next_free = 0u64;
    for run in &reply.runs {
        if run.count == 0 || (run.start as u64) < next_free || run.end() > chunk_count as u64 {
            return Err(TransferError::InvalidStatus(format!(
                "run {}+{} outside 0..{chunk_count} or out of order",
                run.start, run.count
            )));
        }
        next_free = run.end();
    }
    Ok(())
}

/// Chunk indices scheduled by `runs`, in order.
pub fn scheduled_chunks(runs: &[StatusRun]) -> impl Iterator<Item = u32> + '_ {
    runs.iter().flat_map(|run| run.indices())
}
