//! Pipe transport configuration

use crate::error::GatewayError;
use crate::protocol::DEFAULT_MAX_PAYLOAD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pipe endpoint and timing settings, shared by server and client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Pipe name. On Unix this maps to `<temp dir>/<name>.sock`, or is used
    /// as-is when it contains a path separator.
    #[serde(default = "default_pipe_name")]
    pub pipe_name: String,

    /// Kernel buffer hint in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Concurrent connection slots on the server
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on receiving a payload once its header has arrived
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_max_payload")]
    pub max_payload: usize,

    /// Inbound frames buffered between the read loop and the router
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// Capacity of each push subscription channel
    #[serde(default = "default_push_capacity")]
    pub push_capacity: usize,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

fn default_pipe_name() -> String {
    "TradingBridge".to_string()
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_max_connections() -> usize {
    4
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_read_timeout_ms() -> u64 {
    1_000
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

fn default_inbound_capacity() -> usize {
    1_024
}

fn default_push_capacity() -> usize {
    4_096
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    3_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    3_000
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            pipe_name: default_pipe_name(),
            buffer_size: default_buffer_size(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_payload: default_max_payload(),
            inbound_capacity: default_inbound_capacity(),
            push_capacity: default_push_capacity(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl PipeConfig {
    pub fn with_pipe_name(mut self, name: impl Into<String>) -> Self {
        self.pipe_name = name.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms.max(self.reconnect_delay_ms))
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.pipe_name.trim().is_empty() {
            return Err(GatewayError::Config("pipe_name must not be empty".into()));
        }
        if self.max_connections == 0 {
            return Err(GatewayError::Config("max_connections must be at least 1".into()));
        }
        if self.max_payload == 0 || self.max_payload > u32::MAX as usize {
            return Err(GatewayError::Config(format!(
                "max_payload must be in 1..={}",
                u32::MAX
            )));
        }
        if self.inbound_capacity == 0 || self.push_capacity == 0 {
            return Err(GatewayError::Config("channel capacities must be non-zero".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(GatewayError::Config("request_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }
}
