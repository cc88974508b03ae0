//! Bridge Gateway
//!
//! Transport layer between the broker-side process and the UI-side process.
//! Provides:
//! - Length-prefixed framing with a fixed 10-byte header
//! - Three payload tiers selected by message type
//! - A named-pipe (Unix socket on Unix) server with bounded connection slots
//! - A reconnecting client with request/response correlation and push fan-out
//!
//! ## Architecture
//!
//! ```text
//!  UI process                                   Broker process
//!  ┌──────────────┐                             ┌──────────────┐
//!  │ PipeClient   │  request (seq > 0) ───────▶ │ PipeServer   │
//!  │  ├ broker    │ ◀─────── response (seq echo)│  slot 0..N   │
//!  │  └ router    │ ◀─────── push (seq = 0)     │              │
//!  └──────────────┘                             └──────────────┘
//! ```
//!
//! ## Tiers
//!
//! - `0x00..0x1F` fixed-layout records, one per frame
//! - `0x20..0x7F` schema batches or counted fixed records
//! - `0x80..0xFF` schema control messages

pub mod error;
pub mod protocol;
pub mod router;
pub mod transport;

// Re-export commonly used types
pub use error::{GatewayError, ProtocolError, TransportError};
pub use protocol::{
    BalanceRecord, CandleRecord, ExecEvent, ExecRecord, FixedLayout, FixedStr, Frame, FrameCodec,
    FrameHeader, HogaRecord, MessageType, SchemaMessage, TickRecord, Tier,
};
pub use router::{Dispatch, PushSubscriber, RequestBroker, RouterStats};
pub use transport::{
    ConnectionEvent, ConnectionHandle, FrameSink, InboundFrame, PipeClient, PipeConfig, PipeServer,
};
