//! Error types for the gateway crate

use std::time::Duration;
use thiserror::Error;

/// Framing and payload decoding errors.
///
/// Any of these on an inbound frame terminates the connection that carried it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown message type: 0x{0:02X}")]
    UnknownType(u8),

    #[error("Payload of {len} bytes exceeds limit of {max} bytes")]
    Oversized { len: usize, max: usize },

    #[error("Truncated {what}: expected {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Payload of {expected} bytes not received within {timeout:?}")]
    Stalled { expected: usize, timeout: Duration },

    #[error("Message type 0x{msg_type:02X} does not use the {expected} encoding")]
    TierMismatch { msg_type: u8, expected: &'static str },

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Schema payload error: {0}")]
    Schema(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Schema(e.to_string())
    }
}

/// Transport-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Transport stopped")]
    Stopped,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Gateway-level errors surfaced to callers of the request/response API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Request {sequence} timed out after {timeout:?}")]
    RequestTimeout { sequence: u32, timeout: Duration },

    #[error("Request rejected by peer: {0}")]
    Rejected(String),

    #[error("Unexpected response type 0x{0:02X}")]
    UnexpectedResponse(u8),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// True when the failure came from the link rather than the peer's answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Transport(e.into())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Protocol(e.into())
    }
}
