//! Bridge Core Domain
//!
//! Pure domain types shared by both processes of the trading bridge.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod entities;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    Candle, CandleInterval, FailureCause, FillRecord, OrderKind, OrderStatus, Position, RoutingHint, Side,
};
pub use values::{InstrumentCode, Price, Quantity, Timestamp};
