//! Stream framing for message links.
//!
//! # Wire format
//!
//! ```text
//! [2 bytes BE: frame_len][frame_len bytes: message]
//! ```
//!
//! `frame_len` never exceeds the link MTU; a larger announced length is
//! treated as a corrupt stream.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::check_mtu;
use crate::error::LinkError;

/// Writes one frame to the stream. Does not flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
    mtu: usize,
) -> Result<(), LinkError> {
    check_mtu(frame.len(), mtu)?;
    let len = u16::try_from(frame.len()).map_err(|_| LinkError::FrameTooLarge {
        len: frame.len(),
        mtu: u16::MAX as usize,
    })?;
    writer.write_u16(len).await?;
    writer.write_all(frame).await?;
    Ok(())
}

/// Reads one frame from the stream.
///
/// End of stream before or inside a frame is reported as [`LinkError::Closed`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    mtu: usize,
) -> Result<Bytes, LinkError> {
    let len = reader.read_u16().await.map_err(LinkError::from_read)? as usize;
    check_mtu(len, mtu)?;

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(LinkError::from_read)?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"\x04\x2c\x01\x00\x00hello", 256)
            .await
            .unwrap();
        assert_eq!(&buf[..2], &[0x00, 0x0A]);

        let mut cursor = &buf[..];
        let frame = read_frame(&mut cursor, 256).await.unwrap();
        assert_eq!(&frame[..], b"\x04\x2c\x01\x00\x00hello");
    }

    #[tokio::test]
    async fn consecutive_frames() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"one", 16).await.unwrap();
        write_frame(&mut buf, b"", 16).await.unwrap();
        write_frame(&mut buf, b"three", 16).await.unwrap();

        let mut cursor = &buf[..];
        assert_eq!(&read_frame(&mut cursor, 16).await.unwrap()[..], b"one");
        assert!(read_frame(&mut cursor, 16).await.unwrap().is_empty());
        assert_eq!(&read_frame(&mut cursor, 16).await.unwrap()[..], b"three");
        assert!(matches!(
            read_frame(&mut cursor, 16).await,
            Err(LinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn oversized_frame_rejected_on_write() {
        let mut buf = Vec::new();
        let result = write_frame(&mut buf, &[0u8; 300], 256).await;
        assert!(matches!(
            result,
            Err(LinkError::FrameTooLarge { len: 300, mtu: 256 })
        ));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_rejected_on_read() {
        let buf = [0x01u8, 0x00];
        let mut cursor = &buf[..];
        assert!(matches!(
            read_frame(&mut cursor, 64).await,
            Err(LinkError::FrameTooLarge { len: 256, mtu: 64 })
        ));
    }

    #[tokio::test]
    async fn truncated_frame_is_closed() {
        let buf = [0x00u8, 0x05, b'a', b'b'];
        let mut cursor = &buf[..];
        assert!(matches!(
            read_frame(&mut cursor, 64).await,
            Err(LinkError::Closed)
        ));
    }
}
