use serde::{Deserialize, Serialize};

/// Order lifecycle status
///
/// ```text
/// Queued -> Submitted -> Accepted -> PartialFilled* -> Filled
///    |          |            |             |
///    +----------+------------+-------------+--> Cancelled | Rejected | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Local record exists, not yet sent (may be waiting on a throttle slot)
    Queued,
    /// Handed to the broker; broker id not yet known
    Submitted,
    /// Broker acknowledged the order
    Accepted,
    /// One or more fills, quantity remains
    PartialFilled,
    /// Completely filled
    Filled,
    /// Cancel (or replace) confirmed while quantity remained
    Cancelled,
    /// Explicit broker refusal
    Rejected,
    /// Local failure before reaching the broker
    Failed,
}

/// Local failure that kept an order from reaching the broker. Each cause
/// calls for a different retry policy, so it travels with failed orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCause {
    ThrottleTimeout,
    Transport,
    RequestTimeout,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }

    /// Returns true if the order is still working (locally or at the broker)
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Wire byte used by the fixed-layout records
    pub fn as_u8(&self) -> u8 {
        match self {
            OrderStatus::Queued => 0,
            OrderStatus::Submitted => 1,
            OrderStatus::Accepted => 2,
            OrderStatus::PartialFilled => 3,
            OrderStatus::Filled => 4,
            OrderStatus::Cancelled => 5,
            OrderStatus::Rejected => 6,
            OrderStatus::Failed => 7,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => OrderStatus::Queued,
            1 => OrderStatus::Submitted,
            2 => OrderStatus::Accepted,
            3 => OrderStatus::PartialFilled,
            4 => OrderStatus::Filled,
            5 => OrderStatus::Cancelled,
            6 => OrderStatus::Rejected,
            7 => OrderStatus::Failed,
            _ => return None,
        })
    }
}
