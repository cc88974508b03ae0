use async_trait::async_trait;
use bridge_core::{InstrumentCode, OrderKind, Price, Quantity, RoutingHint, Side};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::BrokerResult;
use crate::events::BrokerEvent;

/// Stream of typed broker callbacks
pub type BrokerEventReceiver = mpsc::UnboundedReceiver<BrokerEvent>;

/// Order request as handed to the broker adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerOrderRequest {
    /// Locally generated id. Adapters that can thread it through to their
    /// callbacks should echo it on `OrderEvent::client_order_id`.
    pub client_order_id: String,
    pub code: InstrumentCode,
    pub side: Side,
    pub kind: OrderKind,
    pub qty: Quantity,
    /// Zero means market
    pub price: Price,
    pub routing: RoutingHint,
}

/// Result of a successful submit call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Broker id, when the broker API returns it synchronously. `None` means
    /// the id only arrives with the first asynchronous acknowledgement.
    pub broker_order_id: Option<String>,
}

impl SubmitReceipt {
    pub fn bound(broker_order_id: impl Into<String>) -> Self {
        Self {
            broker_order_id: Some(broker_order_id.into()),
        }
    }

    pub fn pending() -> Self {
        Self::default()
    }
}

/// Port for order execution at the broker
///
/// `submit` is a single request/response exchange: it returns once the
/// broker accepted or refused the hand-off. Everything after that (acks,
/// fills, confirmations, refusals) arrives on the event stream.
#[async_trait]
pub trait BrokerExecutor: Send + Sync {
    /// Hand an order to the broker
    async fn submit(&self, order: &BrokerOrderRequest) -> BrokerResult<SubmitReceipt>;

    /// Open a new stream of broker callbacks
    fn event_stream(&self) -> BrokerEventReceiver;

    /// Adapter name for logging
    fn name(&self) -> &str {
        "BrokerExecutor"
    }
}
