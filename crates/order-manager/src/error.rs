//! Order Manager errors

use bridge_core::OrderStatus;
use bridge_ports::BrokerError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("No submission slot within {0:?}")]
    ThrottleTimeout(Duration),

    /// The remote broker-side process timed out on its own throttle
    #[error("Broker-side throttle timed out: {0}")]
    RemoteThrottleTimeout(String),

    #[error("Broker rejected order: {0}")]
    BrokerRejection(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Broker request timed out: {0}")]
    RequestTimeout(String),

    #[error("Cannot reconcile event for broker order {broker_order_id} ({code}): {reason}")]
    Reconciliation {
        broker_order_id: String,
        code: String,
        reason: String,
    },

    #[error("Parent order not found: {0}")]
    ParentOrderNotFound(String),

    #[error("Order {client_order_id} is already {status:?}")]
    OrderTerminal {
        client_order_id: String,
        status: OrderStatus,
    },

    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Order {client_order_id} not complete after {timeout:?}")]
    WaitTimeout {
        client_order_id: String,
        timeout: Duration,
    },
}

impl From<BrokerError> for Error {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Rejected(reason) => Error::BrokerRejection(reason),
            BrokerError::Throttled(reason) => Error::RemoteThrottleTimeout(reason),
            BrokerError::Unavailable(reason) => Error::Transport(reason),
            BrokerError::Timeout(reason) => Error::RequestTimeout(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
