//! Bridge Runner - broker-side service and UI-side client
//!
//! Wires the gateway and the order manager into the two processes of the
//! bridge:
//!
//! - **Server**: pipe server plus an order manager over the broker adapter
//! - **Client**: typed request calls and push streams for the UI process
//! - **Executor**: broker port implemented over the pipe, so a UI-side
//!   order manager can drive orders remotely
//! - **Paper**: in-process broker and tick feed for running without the
//!   proprietary adapter
//! - **Config**: JSON file plus environment overrides
//!
//! ## Architecture
//!
//! ```text
//!   UI process                                  Broker process
//! ┌──────────────────────────┐               ┌──────────────────────────┐
//! │  OrderLifecycleManager   │               │      BridgeServer        │
//! │           │              │               │           │              │
//! │           ▼              │   requests    │           ▼              │
//! │     PipeExecutor ────────┼──────────────▶│  OrderLifecycleManager   │
//! │           ▲              │               │           │              │
//! │           │ pushes       │◀──────────────┼───────────┤              │
//! │     BridgeClient         │  exec/balance │           ▼              │
//! │                          │  tick/reject  │   BrokerExecutor         │
//! └──────────────────────────┘               │  (adapter or paper)      │
//!                                            └──────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod executor;
pub mod paper;
pub mod server;
pub mod wire;

// Re-export main types
pub use client::{BridgeClient, PushPayload, PushStream};
pub use config::{BridgeConfig, ConfigError, load_config, load_config_from_str, load_from_env};
pub use executor::{PipeExecutor, broker_error};
pub use paper::{PaperBroker, PaperConfig};
pub use server::{BridgeServer, local_order_id, split_local_order_id};
