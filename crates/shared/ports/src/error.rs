use thiserror::Error;

/// Errors surfaced by broker and feed adapters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker explicitly refused the request; reason text is verbatim
    #[error("Broker rejected request: {0}")]
    Rejected(String),

    /// The broker (or the link to it) could not be reached
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The broker side ran out of submission slots before the deadline
    #[error("Broker-side throttle timed out: {0}")]
    Throttled(String),

    /// The broker did not answer in time
    #[error("Broker request timed out: {0}")]
    Timeout(String),
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
