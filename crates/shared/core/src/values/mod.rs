use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Price value - uses Decimal for precision
///
/// A price of zero on an order request means "market".
pub type Price = Decimal;

/// Quantity value - whole shares
pub type Quantity = u64;

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Instrument code as the broker knows it (e.g. `005930`)
pub type InstrumentCode = String;
