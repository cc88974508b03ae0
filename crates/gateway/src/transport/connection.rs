//! One live connection: a serialized writer handle and a read loop
//!
//! Writes from any task go through the handle's async mutex so frames are
//! never interleaved. The read loop only decodes and hands frames off to a
//! bounded channel; dispatch happens elsewhere.

use super::endpoint::BoxedStream;
use crate::error::{GatewayError, TransportError};
use crate::protocol::{Frame, FrameCodec};
use log::{debug, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc, watch};

pub type ConnectionId = u64;

/// Connection lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(ConnectionId),
    Disconnected { id: ConnectionId, reason: String },
}

/// Why a read loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed the stream on a frame boundary
    PeerClosed,
    /// Local shutdown was requested
    Shutdown,
    /// Nobody is consuming inbound frames any more
    InboundClosed,
    /// Malformed frame or I/O failure
    Failed(GatewayError),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::PeerClosed => write!(f, "peer closed"),
            DisconnectReason::Shutdown => write!(f, "shutdown"),
            DisconnectReason::InboundClosed => write!(f, "inbound channel closed"),
            DisconnectReason::Failed(e) => write!(f, "{e}"),
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct ConnectionInner {
    id: ConnectionId,
    codec: FrameCodec,
    writer: Mutex<BoxedWriter>,
    open: AtomicBool,
    frames_sent: AtomicU64,
}

/// Cloneable write side of a connection
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl ConnectionHandle {
    pub fn new<W>(id: ConnectionId, codec: FrameCodec, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                codec,
                writer: Mutex::new(Box::new(writer)),
                open: AtomicBool::new(true),
                frames_sent: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn frames_sent(&self) -> u64 {
        self.inner.frames_sent.load(Ordering::Relaxed)
    }

    /// Write one frame. Concurrent callers are serialized.
    pub async fn send(&self, frame: &Frame) -> Result<(), GatewayError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed.into());
        }
        let bytes = self.inner.codec.encode(frame)?;

        let mut writer = self.inner.writer.lock().await;
        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                self.inner.frames_sent.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "conn {} sent {} seq={} len={}",
                    self.inner.id,
                    frame.msg_type,
                    frame.sequence,
                    frame.payload.len()
                );
                Ok(())
            }
            Err(e) => {
                self.inner.open.store(false, Ordering::Release);
                warn!("conn {} write failed: {}", self.inner.id, e);
                Err(TransportError::ConnectionLost.into())
            }
        }
    }

    /// Mark closed and shut the write side down
    pub async fn close(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            let mut writer = self.inner.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                debug!("conn {} shutdown: {}", self.inner.id, e);
            }
        }
    }
}

/// Split a stream into its read half and a write handle
pub fn split_stream(
    id: ConnectionId,
    codec: FrameCodec,
    stream: BoxedStream,
) -> (ReadHalf<BoxedStream>, ConnectionHandle) {
    let (reader, writer): (ReadHalf<BoxedStream>, WriteHalf<BoxedStream>) = tokio::io::split(stream);
    (reader, ConnectionHandle::new(id, codec, writer))
}

/// Read frames until the stream ends, an error occurs or shutdown is signalled.
///
/// Each frame is wrapped by `wrap` and handed to `inbound`. A full inbound
/// channel applies backpressure to the peer.
pub async fn run_read_loop<R, T, F>(
    id: ConnectionId,
    mut reader: R,
    codec: FrameCodec,
    payload_timeout: Option<Duration>,
    inbound: mpsc::Sender<T>,
    mut shutdown: watch::Receiver<bool>,
    wrap: F,
) -> DisconnectReason
where
    R: AsyncRead + Unpin,
    F: Fn(Frame) -> T,
{
    if *shutdown.borrow() {
        return DisconnectReason::Shutdown;
    }
    loop {
        let frame = tokio::select! {
            result = codec.read_frame(&mut reader, payload_timeout) => result,
            _ = shutdown.changed() => return DisconnectReason::Shutdown,
        };

        match frame {
            Ok(Some(frame)) => {
                trace!(
                    "conn {} recv {} seq={} flags={:#04b} len={}",
                    id,
                    frame.msg_type,
                    frame.sequence,
                    frame.flags,
                    frame.payload.len()
                );
                if inbound.send(wrap(frame)).await.is_err() {
                    return DisconnectReason::InboundClosed;
                }
            }
            Ok(None) => return DisconnectReason::PeerClosed,
            Err(e) => {
                warn!("conn {} read failed: {}", id, e);
                return DisconnectReason::Failed(e);
            }
        }
    }
}
