use serde::{Deserialize, Serialize};

use crate::values::{Price, Quantity, Timestamp};

/// A single execution against an order. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillRecord {
    /// Broker-assigned execution id
    pub fill_id: String,
    pub price: Price,
    pub qty: Quantity,
    pub time: Timestamp,
}

impl FillRecord {
    pub fn new(fill_id: impl Into<String>, price: Price, qty: Quantity, time: Timestamp) -> Self {
        Self {
            fill_id: fill_id.into(),
            price,
            qty,
            time,
        }
    }

    /// Traded amount of this fill (price x qty)
    pub fn amount(&self) -> Price {
        self.price * Price::from(self.qty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount() {
        let fill = FillRecord::new("F-1", dec!(70100), 3, Utc::now());
        assert_eq!(fill.amount(), dec!(210300));
    }
}
