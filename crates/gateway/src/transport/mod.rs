//! Pipe transport
//!
//! A server exposes a fixed number of connection slots on a named endpoint;
//! a client connects to it and reconnects when the link drops. Both speak the
//! same framed protocol over a duplex byte stream.

pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod server;

pub use client::PipeClient;
pub use config::PipeConfig;
pub use connection::{ConnectionEvent, ConnectionHandle, ConnectionId, DisconnectReason};
pub use endpoint::{BoxedStream, DuplexStream, PipeListener, endpoint_address};
pub use server::{InboundFrame, PipeServer};

use crate::error::GatewayError;
use crate::protocol::Frame;
use async_trait::async_trait;

/// Anything frames can be written to
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, frame: &Frame) -> Result<(), GatewayError>;
}

#[async_trait]
impl FrameSink for ConnectionHandle {
    async fn send_frame(&self, frame: &Frame) -> Result<(), GatewayError> {
        self.send(frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Ensure the sink trait is object-safe
    fn _assert_sink_object_safe(_: &dyn FrameSink) {}
}
