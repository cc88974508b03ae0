use serde::{Deserialize, Serialize};

use crate::values::Timestamp;

/// Candle period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CandleInterval {
    Tick,
    #[default]
    Minute,
    Day,
    Week,
    Month,
}

/// OHLCV bar. Prices are whole currency units as the broker reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub time: Timestamp,
    pub open: i32,
    pub high: i32,
    pub low: i32,
    pub close: i32,
    pub volume: i64,
    pub trading_value: i64,
}
