//! Single message send/receive over a link, with errors mapped to
//! [`TransferError`].

use std::time::Duration;

use skyftp_link::Link;
use skyftp_protocol::{Message, MessageKind, validate_path};
use tracing::trace;

use crate::TransferError;

pub(crate) async fn send<L: Link>(
    link: &mut L,
    msg: &Message,
    timeout: Duration,
    phase: &'static str,
) -> Result<(), TransferError> {
    let frame = msg.encode()?;
    trace!(kind = %msg.kind(), len = frame.len(), "send");
    link.send(&frame, timeout)
        .await
        .map_err(|e| TransferError::link(phase, e))
}

pub(crate) async fn recv<L: Link>(
    link: &mut L,
    timeout: Duration,
    phase: &'static str,
) -> Result<Message, TransferError> {
    let frame = link
        .recv(timeout)
        .await
        .map_err(|e| TransferError::link(phase, e))?;
    let msg = Message::decode(&frame)?;
    trace!(kind = %msg.kind(), len = frame.len(), "recv");
    Ok(msg)
}

/// Error for a reply of the wrong kind.
///
/// A wrong-kind message that carries a failure status is reported as that
/// remote failure, since that is what the peer meant to say.
pub(crate) fn unexpected(expected: MessageKind, msg: &Message, op: &'static str) -> TransferError {
    match msg.reply_status() {
        Some(status) if !status.is_ok() => TransferError::Remote { op, status },
        _ => TransferError::UnexpectedReply {
            expected,
            actual: msg.kind(),
        },
    }
}

/// Checks the status carried by a reply of the expected kind.
pub(crate) fn check_status(msg: &Message, op: &'static str) -> Result<(), TransferError> {
    match msg.reply_status() {
        Some(status) if !status.is_ok() => Err(TransferError::Remote { op, status }),
        _ => Ok(()),
    }
}

/// Rejects a remote path that cannot be encoded in a request.
pub(crate) fn check_path(path: &str) -> Result<(), TransferError> {
    validate_path(path).map_err(|e| TransferError::InvalidArgument(format!("remote path: {e}")))
}
