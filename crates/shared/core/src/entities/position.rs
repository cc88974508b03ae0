use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::{InstrumentCode, Price, Quantity, Timestamp};

/// Holding snapshot for one instrument, as last reported by the broker.
///
/// Positions are replaced wholesale by balance events; they are never
/// derived from order fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub code: InstrumentCode,
    /// Shares held
    pub qty: Quantity,
    /// Average buy price
    pub avg_price: Price,
    /// Total buy amount
    pub total_buy_amount: Price,
    /// Shares available to sell (not locked by working orders)
    pub available_qty: Quantity,
    pub current_price: Price,
    /// Profit rate in percent
    pub profit_rate: Decimal,
    pub last_updated: Timestamp,
}

impl Position {
    /// Create an empty position for an instrument
    pub fn empty(code: impl Into<InstrumentCode>) -> Self {
        Self {
            code: code.into(),
            qty: 0,
            avg_price: Decimal::ZERO,
            total_buy_amount: Decimal::ZERO,
            available_qty: 0,
            current_price: Decimal::ZERO,
            profit_rate: Decimal::ZERO,
            last_updated: Utc::now(),
        }
    }

    /// Market value at the last reported price
    pub fn market_value(&self) -> Price {
        self.current_price * Decimal::from(self.qty)
    }

    pub fn is_flat(&self) -> bool {
        self.qty == 0
    }
}
