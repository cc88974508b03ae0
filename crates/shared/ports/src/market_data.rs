use async_trait::async_trait;
use bridge_core::{Candle, CandleInterval, InstrumentCode, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::BrokerResult;

/// Per-code real-time tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickUpdate {
    pub code: InstrumentCode,
    pub time: Timestamp,
    pub price: i32,
    pub open: i32,
    pub high: i32,
    pub low: i32,
    pub prev_close: i32,
    pub volume: i64,
}

/// Stream of ticks for every subscribed code
pub type TickReceiver = broadcast::Receiver<TickUpdate>;

/// Port for real-time market data
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Start receiving ticks for `code`
    async fn subscribe(&self, code: &str) -> BrokerResult<()>;

    /// Stop receiving ticks for `code`
    async fn unsubscribe(&self, code: &str) -> BrokerResult<()>;

    /// Tick stream covering all subscribed codes
    fn tick_stream(&self) -> TickReceiver;
}

/// Port for historical candle queries
#[async_trait]
pub trait CandleProvider: Send + Sync {
    async fn candles(
        &self,
        code: &str,
        interval: CandleInterval,
        count: usize,
    ) -> BrokerResult<Vec<Candle>>;
}
