//! Length-prefixed framing for byte streams

use crate::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length of the big-endian size prefix
const PREFIX_LEN: usize = 4;

/// Frame codec for splitting a byte stream into payloads
#[derive(Debug)]
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum payload size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Prefix a payload with its length
    pub fn encode_frame(&self, payload: &[u8]) -> Result<Bytes, TransportError> {
        if payload.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(PREFIX_LEN + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Write one framed payload and flush
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_frame(payload)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read the next payload. Returns `None` on a clean end of stream.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, TransportError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(payload) = self.try_decode_frame()? {
                return Ok(Some(payload));
            }

            let n = reader.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::TruncatedFrame);
            }
        }
    }

    /// Try to split one payload off the internal buffer
    pub fn try_decode_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        if self.read_buf.len() < PREFIX_LEN {
            return Ok(None);
        }

        let frame_len = (&self.read_buf[..PREFIX_LEN]).get_u32() as usize;
        if frame_len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if self.read_buf.len() < PREFIX_LEN + frame_len {
            self.read_buf.reserve(PREFIX_LEN + frame_len - self.read_buf.len());
            return Ok(None);
        }

        self.read_buf.advance(PREFIX_LEN);
        Ok(Some(self.read_buf.split_to(frame_len).freeze()))
    }

    /// Bytes buffered but not yet returned
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}
