//! Position book
//!
//! Holds the latest broker-reported holding per instrument. Balance events
//! replace the snapshot wholesale; fills never touch it.

use bridge_core::Position;
use bridge_ports::BalanceEvent;
use dashmap::DashMap;
use rust_decimal::Decimal;

#[derive(Debug, Default)]
pub struct PositionBook {
    positions: DashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the instrument's snapshot. A zero quantity removes it.
    pub fn apply_balance(&self, event: &BalanceEvent) -> Position {
        let position = Position {
            code: event.code.clone(),
            qty: event.qty,
            avg_price: event.avg_price,
            total_buy_amount: event.total_buy_amount,
            available_qty: event.available_qty,
            current_price: event.current_price,
            profit_rate: event.profit_rate,
            last_updated: event.time,
        };
        if position.is_flat() {
            self.positions.remove(&event.code);
        } else {
            self.positions.insert(event.code.clone(), position.clone());
        }
        position
    }

    pub fn get(&self, code: &str) -> Option<Position> {
        self.positions.get(code).map(|p| p.value().clone())
    }

    /// All held positions, ordered by code
    pub fn all(&self) -> Vec<Position> {
        let mut positions: Vec<_> = self.positions.iter().map(|p| p.value().clone()).collect();
        positions.sort_by(|a, b| a.code.cmp(&b.code));
        positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Total market value at last reported prices
    pub fn market_value(&self) -> Decimal {
        self.positions.iter().map(|p| p.value().market_value()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn balance(code: &str, qty: u64, price: Decimal) -> BalanceEvent {
        BalanceEvent {
            code: code.to_string(),
            qty,
            avg_price: dec!(70000),
            total_buy_amount: dec!(70000) * Decimal::from(qty),
            available_qty: qty,
            current_price: price,
            profit_rate: dec!(1.43),
            time: Utc::now(),
        }
    }

    #[test]
    fn test_balance_replaces_snapshot() {
        let book = PositionBook::new();
        book.apply_balance(&balance("005930", 10, dec!(71000)));
        book.apply_balance(&balance("005930", 4, dec!(72000)));

        let pos = book.get("005930").unwrap();
        assert_eq!(pos.qty, 4);
        assert_eq!(pos.current_price, dec!(72000));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_flat_balance_removes_position() {
        let book = PositionBook::new();
        book.apply_balance(&balance("000660", 3, dec!(180000)));
        let flat = book.apply_balance(&balance("000660", 0, dec!(180000)));
        assert!(flat.is_flat());
        assert!(book.get("000660").is_none());
        assert!(book.is_empty());
    }

    #[test]
    fn test_all_sorted_and_market_value() {
        let book = PositionBook::new();
        book.apply_balance(&balance("035720", 2, dec!(50000)));
        book.apply_balance(&balance("005930", 10, dec!(71000)));
        let codes: Vec<_> = book.all().into_iter().map(|p| p.code).collect();
        assert_eq!(codes, vec!["005930", "035720"]);
        assert_eq!(book.market_value(), dec!(810000));
    }
}
