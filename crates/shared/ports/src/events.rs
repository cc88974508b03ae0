use bridge_core::{InstrumentCode, Price, Quantity, Timestamp};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Status carried by an order callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderEventStatus {
    /// Broker accepted the order into its book
    Accepted,
    /// An execution happened
    Filled,
    /// A modify/cancel was confirmed
    Confirmed,
    /// The broker refused the order
    Rejected,
}

/// Typed order callback, keyed by the broker id and instrument code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub broker_order_id: String,
    /// Present only when the adapter could thread the local id through
    pub client_order_id: Option<String>,
    /// Broker id of the order a modify/cancel acted on
    pub original_order_id: Option<String>,
    pub code: InstrumentCode,
    pub status: OrderEventStatus,
    pub fill_id: Option<String>,
    /// Quantity of this execution (zero unless `status == Filled`)
    pub filled_qty: Quantity,
    /// Price of this execution
    pub filled_price: Price,
    /// Quantity still working at the broker after this event
    pub remaining_qty: Quantity,
    pub reject_reason: Option<String>,
    pub time: Timestamp,
}

impl OrderEvent {
    fn base(
        broker_order_id: impl Into<String>,
        code: impl Into<InstrumentCode>,
        status: OrderEventStatus,
        remaining_qty: Quantity,
    ) -> Self {
        Self {
            broker_order_id: broker_order_id.into(),
            client_order_id: None,
            original_order_id: None,
            code: code.into(),
            status,
            fill_id: None,
            filled_qty: 0,
            filled_price: Decimal::ZERO,
            remaining_qty,
            reject_reason: None,
            time: Utc::now(),
        }
    }

    /// Broker acknowledged the order
    pub fn accepted(
        broker_order_id: impl Into<String>,
        code: impl Into<InstrumentCode>,
        remaining_qty: Quantity,
    ) -> Self {
        Self::base(
            broker_order_id,
            code,
            OrderEventStatus::Accepted,
            remaining_qty,
        )
    }

    /// An execution of `qty` at `price`
    pub fn fill(
        broker_order_id: impl Into<String>,
        code: impl Into<InstrumentCode>,
        fill_id: impl Into<String>,
        price: Price,
        qty: Quantity,
        remaining_qty: Quantity,
    ) -> Self {
        let mut event = Self::base(
            broker_order_id,
            code,
            OrderEventStatus::Filled,
            remaining_qty,
        );
        event.fill_id = Some(fill_id.into());
        event.filled_price = price;
        event.filled_qty = qty;
        event
    }

    /// Modify/cancel confirmation
    pub fn confirmed(
        broker_order_id: impl Into<String>,
        code: impl Into<InstrumentCode>,
        original_order_id: Option<String>,
        remaining_qty: Quantity,
    ) -> Self {
        let mut event = Self::base(
            broker_order_id,
            code,
            OrderEventStatus::Confirmed,
            remaining_qty,
        );
        event.original_order_id = original_order_id;
        event
    }

    /// Broker refusal with reason text
    pub fn rejected(
        broker_order_id: impl Into<String>,
        code: impl Into<InstrumentCode>,
        reason: impl Into<String>,
    ) -> Self {
        let mut event = Self::base(broker_order_id, code, OrderEventStatus::Rejected, 0);
        event.reject_reason = Some(reason.into());
        event
    }

    /// Attach the local correlation id
    pub fn with_client_order_id(mut self, client_order_id: impl Into<String>) -> Self {
        self.client_order_id = Some(client_order_id.into());
        self
    }

    pub fn with_time(mut self, time: Timestamp) -> Self {
        self.time = time;
        self
    }
}

/// Balance (holding) change for one instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub code: InstrumentCode,
    pub qty: Quantity,
    pub avg_price: Price,
    pub total_buy_amount: Price,
    pub available_qty: Quantity,
    pub current_price: Price,
    pub profit_rate: Decimal,
    pub time: Timestamp,
}

/// Everything the broker reports asynchronously
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerEvent {
    Order(OrderEvent),
    Balance(BalanceEvent),
}
