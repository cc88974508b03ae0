//! Frame codec over byte streams
//!
//! Encoding emits the header and payload as one contiguous buffer so a frame
//! goes out in a single write. Decoding validates the header before the
//! payload buffer is allocated.

use super::frame::{Frame, FrameHeader, HEADER_SIZE};
use crate::error::{GatewayError, ProtocolError, TransportError};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default payload ceiling (10 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(frame.encoded_len());
        self.encode_into(frame, &mut buf)?;
        Ok(buf)
    }

    /// Append the encoded frame to `buf`
    pub fn encode_into(&self, frame: &Frame, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let len = frame.payload.len();
        if len > self.max_payload || len > u32::MAX as usize {
            return Err(ProtocolError::Oversized {
                len,
                max: self.max_payload,
            });
        }
        buf.extend_from_slice(&frame.header().to_bytes());
        buf.extend_from_slice(&frame.payload);
        Ok(())
    }

    /// Decode one frame from the front of `bytes`.
    ///
    /// Returns the frame and the number of bytes consumed.
    pub fn decode(&self, bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
        let header_bytes: &[u8; HEADER_SIZE] = bytes
            .get(..HEADER_SIZE)
            .and_then(|s| s.try_into().ok())
            .ok_or(ProtocolError::Truncated {
                what: "frame header",
                expected: HEADER_SIZE,
                actual: bytes.len(),
            })?;
        let header = FrameHeader::from_bytes(header_bytes);
        let msg_type = header.validate(self.max_payload)?;

        let total = HEADER_SIZE + header.payload_len as usize;
        let payload = bytes
            .get(HEADER_SIZE..total)
            .ok_or(ProtocolError::Truncated {
                what: "frame payload",
                expected: header.payload_len as usize,
                actual: bytes.len() - HEADER_SIZE,
            })?;

        let frame = Frame {
            msg_type,
            flags: header.flags,
            sequence: header.sequence,
            payload: payload.to_vec(),
        };
        Ok((frame, total))
    }

    /// Read one frame.
    ///
    /// Returns `Ok(None)` when the stream closes cleanly on a frame boundary.
    /// A close partway through a frame is a truncation error. `payload_timeout`
    /// bounds the wait for the payload once its header has arrived.
    pub async fn read_frame<R>(
        &self,
        reader: &mut R,
        payload_timeout: Option<Duration>,
    ) -> Result<Option<Frame>, GatewayError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header_buf = [0u8; HEADER_SIZE];
        let n = read_full(reader, &mut header_buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                what: "frame header",
                expected: HEADER_SIZE,
                actual: n,
            }
            .into());
        }

        let header = FrameHeader::from_bytes(&header_buf);
        let msg_type = header.validate(self.max_payload)?;

        let len = header.payload_len as usize;
        let mut payload = vec![0u8; len];
        let read = match payload_timeout {
            Some(limit) => tokio::time::timeout(limit, read_full(reader, &mut payload))
                .await
                .map_err(|_| ProtocolError::Stalled {
                    expected: len,
                    timeout: limit,
                })??,
            None => read_full(reader, &mut payload).await?,
        };
        if read < len {
            return Err(ProtocolError::Truncated {
                what: "frame payload",
                expected: len,
                actual: read,
            }
            .into());
        }

        Ok(Some(Frame {
            msg_type,
            flags: header.flags,
            sequence: header.sequence,
            payload,
        }))
    }

    /// Write one frame as a single contiguous buffer, then flush
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &Frame) -> Result<(), GatewayError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let bytes = self.encode(frame)?;
        writer
            .write_all(&bytes)
            .await
            .map_err(TransportError::from)?;
        writer.flush().await.map_err(TransportError::from)?;
        Ok(())
    }
}

/// Fill `buf` unless the stream ends first. Returns the bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
