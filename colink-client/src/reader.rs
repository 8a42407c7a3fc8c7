//! Frame reader: turns a byte stream into complete frames.

use crate::error::ClientError;
use bytes::BytesMut;
use colink_protocol::{FrameHeader, FRAME_HEADER_SIZE};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads length-delimited frames from an async byte stream.
///
/// Headers declaring fewer than [`colink_protocol::MIN_FRAME_SIZE`] bytes
/// are skipped without ending the stream. A stream that ends mid-header or mid-frame yields
/// [`ClientError::ConnectionClosed`].
pub struct FrameReader<R> {
    inner: R,
    frames_read: u64,
    headers_skipped: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            frames_read: 0,
            headers_skipped: 0,
        }
    }

    /// Reads the next complete frame, header included.
    pub async fn next_frame(&mut self) -> Result<BytesMut, ClientError> {
        loop {
            let mut header = [0u8; FRAME_HEADER_SIZE];
            self.read_full(&mut header).await?;

            let parsed = FrameHeader::from_bytes(header);
            if !parsed.is_plausible() {
                self.headers_skipped += 1;
                tracing::debug!(
                    "skipping header with implausible length {} ({:02x?})",
                    parsed.frame_len(),
                    header
                );
                continue;
            }

            let mut frame = BytesMut::zeroed(parsed.frame_len());
            frame[..FRAME_HEADER_SIZE].copy_from_slice(&header);
            self.read_full(&mut frame[FRAME_HEADER_SIZE..]).await?;

            self.frames_read += 1;
            return Ok(frame);
        }
    }

    /// Number of complete frames returned so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Number of headers discarded as noise.
    pub fn headers_skipped(&self) -> u64 {
        self.headers_skipped
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn read_full(&mut self, buf: &mut [u8]) -> Result<(), ClientError> {
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ClientError::ConnectionClosed),
            Err(e) => Err(ClientError::Io(e)),
        }
    }
}
