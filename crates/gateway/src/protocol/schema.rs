//! Schema-encoded payloads (batch tier messages and control messages)
//!
//! Payloads are JSON objects keyed by field name. Unknown fields are ignored
//! and fields marked `#[serde(default)]` may be absent, so either side can add
//! fields without breaking an older peer.

use super::message_type::MessageType;
use crate::error::ProtocolError;
use bridge_core::{CandleInterval, FailureCause, OrderStatus, RoutingHint, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// A message bound to one schema-encoded type code
pub trait SchemaMessage: Serialize + DeserializeOwned {
    const MESSAGE_TYPE: MessageType;
    const NAME: &'static str;

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

macro_rules! schema_message {
    ($ty:ty, $msg:ident) => {
        impl SchemaMessage for $ty {
            const MESSAGE_TYPE: MessageType = MessageType::$msg;
            const NAME: &'static str = stringify!($ty);
        }
    };
}

// ---------------------------------------------------------------------------
// Tier 1
// ---------------------------------------------------------------------------

/// Historical candle query, answered with a `BatchCandleResponse` record batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleRequest {
    pub code: String,
    #[serde(default)]
    pub interval: CandleInterval,
    pub count: u32,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}
schema_message!(CandleRequest, BatchCandleRequest);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramTrade {
    pub code: String,
    pub time: DateTime<Utc>,
    pub buy_amount: i64,
    pub sell_amount: i64,
    #[serde(default)]
    pub net_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgramTradeBatch {
    #[serde(default)]
    pub items: Vec<ProgramTrade>,
}
schema_message!(ProgramTradeBatch, BatchProgramTrade);

/// Execution strength (buy volume over sell volume, in percent)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strength {
    pub code: String,
    pub time: DateTime<Utc>,
    pub strength: f64,
    #[serde(default)]
    pub buy_volume: i64,
    #[serde(default)]
    pub sell_volume: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StrengthBatch {
    #[serde(default)]
    pub items: Vec<Strength>,
}
schema_message!(StrengthBatch, BatchStrength);

// ---------------------------------------------------------------------------
// Tier 2
// ---------------------------------------------------------------------------

/// New order. A zero price means market order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequestMessage {
    pub code: String,
    pub side: Side,
    pub qty: u64,
    pub price: Decimal,
    #[serde(default)]
    pub routing: RoutingHint,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
}
schema_message!(OrderRequestMessage, OrderRequest);

/// Modification of a live order, addressed by its broker order id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderModifyMessage {
    pub broker_order_id: String,
    pub code: String,
    pub side: Side,
    pub qty: u64,
    pub price: Decimal,
    #[serde(default)]
    pub routing: RoutingHint,
    #[serde(default)]
    pub client_order_id: Option<String>,
}
schema_message!(OrderModifyMessage, OrderModify);

/// Cancellation of a live order, addressed by its broker order id.
/// A zero quantity cancels the full remainder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelMessage {
    pub broker_order_id: String,
    pub code: String,
    pub side: Side,
    #[serde(default)]
    pub qty: u64,
    #[serde(default)]
    pub client_order_id: Option<String>,
}
schema_message!(OrderCancelMessage, OrderCancel);

/// Response to order, modify and cancel requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAckMessage {
    #[serde(default)]
    pub client_order_id: Option<String>,
    /// Broker-assigned id, absent when the broker has not bound one yet
    #[serde(default)]
    pub broker_order_id: Option<String>,
    pub status: OrderStatus,
    /// Why a `Failed` order never reached the broker
    #[serde(default)]
    pub failure: Option<FailureCause>,
    #[serde(default)]
    pub message: Option<String>,
}
schema_message!(OrderAckMessage, OrderAck);

/// Broker refusal of an order, with the broker's reason verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRejectNotice {
    pub broker_order_id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub code: String,
    pub reason: String,
    pub time: DateTime<Utc>,
}
schema_message!(OrderRejectNotice, OrderReject);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscribeMessage {
    #[serde(default)]
    pub codes: Vec<String>,
}
schema_message!(SubscribeMessage, SubscribeRequest);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnsubscribeMessage {
    #[serde(default)]
    pub codes: Vec<String>,
}
schema_message!(UnsubscribeMessage, UnsubscribeRequest);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerStatusMessage {
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub broker_connected: bool,
    #[serde(default)]
    pub connected_clients: u32,
    #[serde(default)]
    pub active_subscriptions: u32,
    #[serde(default)]
    pub frames_handled: u64,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}
schema_message!(ServerStatusMessage, ServerStatus);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}
schema_message!(ErrorBody, ErrorResponse);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub time: DateTime<Utc>,
}
schema_message!(HeartbeatMessage, Heartbeat);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AckMessage {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
}
schema_message!(AckMessage, Ack);
