use serde::{Deserialize, Serialize};

/// What an order request asks the broker to do
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    /// A fresh order
    New,
    /// Replace quantity/price of a working order
    Modify { parent_broker_id: String },
    /// Cancel the remaining quantity of a working order
    Cancel { parent_broker_id: String },
}

impl OrderKind {
    /// Broker id of the order this request acts on, if any
    pub fn parent_broker_id(&self) -> Option<&str> {
        match self {
            OrderKind::New => None,
            OrderKind::Modify { parent_broker_id } | OrderKind::Cancel { parent_broker_id } => {
                Some(parent_broker_id)
            }
        }
    }
}

/// Routing hint passed through to the broker adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoutingHint {
    /// Limit order at the request price
    #[default]
    Limit,
    /// Market order (request price is zero)
    Market,
}
