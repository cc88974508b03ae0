//! Managed order records

use bridge_core::{
    FailureCause, FillRecord, InstrumentCode, OrderKind, OrderStatus, Position, Price, Quantity,
    RoutingHint, Side, Timestamp,
};
use chrono::Utc;
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A new order as requested by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub code: InstrumentCode,
    pub side: Side,
    pub qty: Quantity,
    /// Zero means market
    pub price: Price,
    pub routing: RoutingHint,
    /// Caller-chosen id. Generated when absent.
    pub client_order_id: Option<String>,
}

impl NewOrder {
    pub fn limit(code: impl Into<InstrumentCode>, side: Side, qty: Quantity, price: Price) -> Self {
        Self {
            code: code.into(),
            side,
            qty,
            price,
            routing: RoutingHint::Limit,
            client_order_id: None,
        }
    }

    pub fn market(code: impl Into<InstrumentCode>, side: Side, qty: Quantity) -> Self {
        Self {
            code: code.into(),
            side,
            qty,
            price: Decimal::ZERO,
            routing: RoutingHint::Market,
            client_order_id: None,
        }
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }
}

/// How the manager addresses an existing order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderRef {
    Client(String),
    Broker(String),
}

impl OrderRef {
    pub fn client(id: impl Into<String>) -> Self {
        OrderRef::Client(id.into())
    }

    pub fn broker(id: impl Into<String>) -> Self {
        OrderRef::Broker(id.into())
    }
}

impl std::fmt::Display for OrderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderRef::Client(id) => write!(f, "client order {id}"),
            OrderRef::Broker(id) => write!(f, "broker order {id}"),
        }
    }
}

/// One order as tracked by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedOrder {
    pub client_order_id: String,
    /// Bound on acknowledgement or first reconciled event
    pub broker_order_id: Option<String>,
    pub kind: OrderKind,
    pub code: InstrumentCode,
    pub side: Side,
    pub qty: Quantity,
    pub price: Price,
    pub routing: RoutingHint,
    pub status: OrderStatus,
    pub filled_qty: Quantity,
    pub filled_amount: Price,
    pub remaining_qty: Quantity,
    pub fills: Vec<FillRecord>,
    pub reject_reason: Option<String>,
    pub failure: Option<FailureCause>,
    pub created_at: Timestamp,
    pub submitted_at: Option<Timestamp>,
    pub accepted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl ManagedOrder {
    pub fn new(client_order_id: String, kind: OrderKind, order: &NewOrder) -> Self {
        let now = Utc::now();
        Self {
            client_order_id,
            broker_order_id: None,
            kind,
            code: order.code.clone(),
            side: order.side,
            qty: order.qty,
            price: order.price,
            routing: order.routing,
            status: OrderStatus::Queued,
            filled_qty: 0,
            filled_amount: Decimal::ZERO,
            remaining_qty: order.qty,
            fills: Vec::new(),
            reject_reason: None,
            failure: None,
            created_at: now,
            submitted_at: None,
            accepted_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_market(&self) -> bool {
        self.price.is_zero()
    }

    /// Filled amount over filled quantity
    pub fn avg_fill_price(&self) -> Option<Price> {
        (self.filled_qty > 0).then(|| self.filled_amount / Decimal::from(self.filled_qty))
    }

    /// Time from hand-off to the broker until a terminal state
    pub fn latency(&self) -> Option<chrono::Duration> {
        match (self.submitted_at, self.completed_at) {
            (Some(submitted), Some(completed)) => Some(completed - submitted),
            _ => None,
        }
    }

    pub fn has_fill(&self, fill_id: &str) -> bool {
        self.fills.iter().any(|f| f.fill_id == fill_id)
    }

    pub(crate) fn transition(&mut self, to: OrderStatus) {
        if self.status == to {
            return;
        }
        let now = Utc::now();
        info!(
            "order {} ({}) {:?} -> {:?}",
            self.client_order_id,
            self.broker_order_id.as_deref().unwrap_or("-"),
            self.status,
            to
        );
        match to {
            OrderStatus::Submitted => self.submitted_at = Some(now),
            OrderStatus::Accepted => self.accepted_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        self.status = to;
        self.updated_at = now;
    }

    /// Record a fill and move to `PartialFilled` or `Filled`
    pub(crate) fn apply_fill(&mut self, fill: FillRecord, remaining: Quantity) {
        self.filled_qty += fill.qty;
        self.filled_amount += fill.amount();
        self.remaining_qty = remaining;
        self.fills.push(fill);
        if self.accepted_at.is_none() {
            self.accepted_at = Some(Utc::now());
        }
        if remaining == 0 {
            self.transition(OrderStatus::Filled);
        } else {
            self.transition(OrderStatus::PartialFilled);
        }
    }

    pub(crate) fn fail(&mut self, cause: FailureCause) {
        self.failure = Some(cause);
        self.transition(OrderStatus::Failed);
    }

    pub(crate) fn reject(&mut self, reason: String) {
        self.reject_reason = Some(reason);
        self.transition(OrderStatus::Rejected);
    }
}

/// Counters over every order the manager has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStats {
    pub total: u64,
    pub active: u64,
    pub filled: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Published on every order or position change
#[derive(Debug, Clone, PartialEq)]
pub enum OrderUpdate {
    Order(ManagedOrder),
    Position(Position),
}
