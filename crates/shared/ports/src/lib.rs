//! Bridge Ports
//!
//! Port definitions (traits) for the collaborators the bridge does not own:
//! the proprietary broker adapter and its market-data feed. Adapters turn
//! their raw callback data into the typed events defined here once, so the
//! order manager never parses broker field codes.

mod broker;
mod error;
mod events;
mod market_data;

pub use broker::{BrokerEventReceiver, BrokerExecutor, BrokerOrderRequest, SubmitReceipt};
pub use error::{BrokerError, BrokerResult};
pub use events::{BalanceEvent, BrokerEvent, OrderEvent, OrderEventStatus};
pub use market_data::{CandleProvider, MarketDataFeed, TickReceiver, TickUpdate};
