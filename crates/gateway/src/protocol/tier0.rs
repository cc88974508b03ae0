//! Tier 0 realtime records
//!
//! One record per frame, fixed size, no allocation on the encode path.
//! Prices are integer won. Times are Unix epoch nanoseconds.

use super::fixed::{FieldReader, FieldWriter, FixedLayout, FixedStr};
use crate::error::ProtocolError;
use bridge_core::Side;
use chrono::{DateTime, Utc};

pub type CodeStr = FixedStr<8>;
pub type OrderNoStr = FixedStr<16>;

/// Depth of each side of a quote record
pub const HOGA_DEPTH: usize = 5;

pub fn to_epoch_nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

pub fn from_epoch_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// Trade tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRecord {
    pub code: CodeStr,
    pub time_ns: i64,
    pub price: i32,
    pub open: i32,
    pub high: i32,
    pub low: i32,
    pub prev_close: i32,
    pub volume: i64,
}

impl FixedLayout for TickRecord {
    const SIZE: usize = 44;
    const NAME: &'static str = "TickRecord";

    fn write_fields(&self, w: &mut FieldWriter<'_>) {
        w.put_str(&self.code);
        w.put_i64(self.time_ns);
        w.put_i32(self.price);
        w.put_i32(self.open);
        w.put_i32(self.high);
        w.put_i32(self.low);
        w.put_i32(self.prev_close);
        w.put_i64(self.volume);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            code: r.fixed_str()?,
            time_ns: r.i64()?,
            price: r.i32()?,
            open: r.i32()?,
            high: r.i32()?,
            low: r.i32()?,
            prev_close: r.i32()?,
            volume: r.i64()?,
        })
    }
}

/// Five-level order book quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HogaRecord {
    pub code: CodeStr,
    pub time_ns: i64,
    pub ask_prices: [i32; HOGA_DEPTH],
    pub ask_qtys: [i32; HOGA_DEPTH],
    pub bid_prices: [i32; HOGA_DEPTH],
    pub bid_qtys: [i32; HOGA_DEPTH],
}

impl HogaRecord {
    /// Best ask and best bid, if both sides are populated
    pub fn top_of_book(&self) -> Option<(i32, i32)> {
        match (self.ask_prices[0], self.bid_prices[0]) {
            (ask, bid) if ask > 0 && bid > 0 => Some((ask, bid)),
            _ => None,
        }
    }
}

impl FixedLayout for HogaRecord {
    const SIZE: usize = 96;
    const NAME: &'static str = "HogaRecord";

    fn write_fields(&self, w: &mut FieldWriter<'_>) {
        w.put_str(&self.code);
        w.put_i64(self.time_ns);
        for level in [
            &self.ask_prices,
            &self.ask_qtys,
            &self.bid_prices,
            &self.bid_qtys,
        ] {
            for v in level {
                w.put_i32(*v);
            }
        }
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        let code = r.fixed_str()?;
        let time_ns = r.i64()?;
        let mut levels = [[0i32; HOGA_DEPTH]; 4];
        for level in levels.iter_mut() {
            for v in level.iter_mut() {
                *v = r.i32()?;
            }
        }
        let [ask_prices, ask_qtys, bid_prices, bid_qtys] = levels;
        Ok(Self {
            code,
            time_ns,
            ask_prices,
            ask_qtys,
            bid_prices,
            bid_qtys,
        })
    }
}

/// Broker-side order event carried by an execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExecEvent {
    Accepted = 1,
    Filled = 2,
    Confirmed = 3,
}

impl ExecEvent {
    pub fn from_u8(v: u8) -> Result<Self, ProtocolError> {
        match v {
            1 => Ok(ExecEvent::Accepted),
            2 => Ok(ExecEvent::Filled),
            3 => Ok(ExecEvent::Confirmed),
            other => Err(ProtocolError::InvalidField {
                field: "exec event",
                reason: format!("unknown value {other}"),
            }),
        }
    }
}

/// Order acknowledgement, fill or modify/cancel confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecRecord {
    pub order_no: OrderNoStr,
    pub orig_order_no: OrderNoStr,
    /// Caller correlation id, empty when the broker did not echo it
    pub client_id: OrderNoStr,
    /// Fill identifier, empty for non-fill events
    pub fill_no: OrderNoStr,
    pub code: CodeStr,
    pub time_ns: i64,
    pub side: Side,
    pub event: ExecEvent,
    pub price: i32,
    pub qty: i32,
    pub remaining: i32,
}

impl FixedLayout for ExecRecord {
    const SIZE: usize = 96;
    const NAME: &'static str = "ExecRecord";

    fn write_fields(&self, w: &mut FieldWriter<'_>) {
        w.put_str(&self.order_no);
        w.put_str(&self.orig_order_no);
        w.put_str(&self.client_id);
        w.put_str(&self.fill_no);
        w.put_str(&self.code);
        w.put_i64(self.time_ns);
        w.put_u8(self.side.as_u8());
        w.put_u8(self.event as u8);
        w.skip(2);
        w.put_i32(self.price);
        w.put_i32(self.qty);
        w.put_i32(self.remaining);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        let order_no = r.fixed_str()?;
        let orig_order_no = r.fixed_str()?;
        let client_id = r.fixed_str()?;
        let fill_no = r.fixed_str()?;
        let code = r.fixed_str()?;
        let time_ns = r.i64()?;
        let side_raw = r.u8()?;
        let side = Side::from_u8(side_raw).ok_or_else(|| ProtocolError::InvalidField {
            field: "side",
            reason: format!("unknown value {side_raw}"),
        })?;
        let event = ExecEvent::from_u8(r.u8()?)?;
        r.skip(2)?;
        Ok(Self {
            order_no,
            orig_order_no,
            client_id,
            fill_no,
            code,
            time_ns,
            side,
            event,
            price: r.i32()?,
            qty: r.i32()?,
            remaining: r.i32()?,
        })
    }
}

/// Holding snapshot for one instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceRecord {
    pub code: CodeStr,
    pub qty: i64,
    pub avg_price: i32,
    pub total_buy_amount: i64,
    pub available_qty: i64,
    pub current_price: i32,
    pub profit_rate: f64,
    pub time_ns: i64,
}

impl FixedLayout for BalanceRecord {
    const SIZE: usize = 56;
    const NAME: &'static str = "BalanceRecord";

    fn write_fields(&self, w: &mut FieldWriter<'_>) {
        w.put_str(&self.code);
        w.put_i64(self.qty);
        w.put_i32(self.avg_price);
        w.put_i64(self.total_buy_amount);
        w.put_i64(self.available_qty);
        w.put_i32(self.current_price);
        w.put_f64(self.profit_rate);
        w.put_i64(self.time_ns);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            code: r.fixed_str()?,
            qty: r.i64()?,
            avg_price: r.i32()?,
            total_buy_amount: r.i64()?,
            available_qty: r.i64()?,
            current_price: r.i32()?,
            profit_rate: r.f64()?,
            time_ns: r.i64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick() -> TickRecord {
        TickRecord {
            code: CodeStr::new("005930").unwrap(),
            time_ns: 1_700_000_000_000_000_000,
            price: 71_500,
            open: 70_900,
            high: 71_800,
            low: 70_700,
            prev_close: 70_800,
            volume: 12_345_678,
        }
    }

    #[test]
    fn test_tick_layout_offsets() {
        let bytes = tick().to_vec();
        assert_eq!(bytes.len(), TickRecord::SIZE);
        assert_eq!(&bytes[0..8], b"005930\0\0");
        assert_eq!(&bytes[16..20], &71_500i32.to_le_bytes());
        assert_eq!(&bytes[36..44], &12_345_678i64.to_le_bytes());
        assert_eq!(TickRecord::decode(&bytes).unwrap(), tick());
    }

    #[test]
    fn test_tick_wrong_length() {
        let bytes = tick().to_vec();
        assert!(matches!(
            TickRecord::decode(&bytes[..40]),
            Err(ProtocolError::Truncated { expected: 44, actual: 40, .. })
        ));
    }

    #[test]
    fn test_exec_record_fields() {
        let record = ExecRecord {
            order_no: OrderNoStr::new("0000123").unwrap(),
            orig_order_no: OrderNoStr::empty(),
            client_id: OrderNoStr::new("ORD-000001").unwrap(),
            fill_no: OrderNoStr::new("F-1").unwrap(),
            code: CodeStr::new("005930").unwrap(),
            time_ns: 42,
            side: Side::Sell,
            event: ExecEvent::Filled,
            price: 71_000,
            qty: 3,
            remaining: 7,
        };
        let bytes = record.to_vec();
        assert_eq!(bytes.len(), 96);
        assert_eq!(bytes[80], 2);
        assert_eq!(bytes[81], ExecEvent::Filled as u8);
        assert_eq!(&bytes[82..84], &[0, 0]);
        let decoded = ExecRecord::decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.orig_order_no.to_option().unwrap(), None);
    }

    #[test]
    fn test_exec_record_bad_event() {
        let mut bytes = ExecRecord {
            order_no: OrderNoStr::new("1").unwrap(),
            orig_order_no: OrderNoStr::empty(),
            client_id: OrderNoStr::empty(),
            fill_no: OrderNoStr::empty(),
            code: CodeStr::new("000660").unwrap(),
            time_ns: 0,
            side: Side::Buy,
            event: ExecEvent::Accepted,
            price: 0,
            qty: 0,
            remaining: 0,
        }
        .to_vec();
        bytes[81] = 9;
        assert!(matches!(
            ExecRecord::decode(&bytes),
            Err(ProtocolError::InvalidField { field: "exec event", .. })
        ));
    }

    #[test]
    fn test_hoga_top_of_book() {
        let mut record = HogaRecord {
            code: CodeStr::new("035720").unwrap(),
            time_ns: 0,
            ask_prices: [50_100, 50_200, 50_300, 50_400, 50_500],
            ask_qtys: [10, 20, 30, 40, 50],
            bid_prices: [50_000, 49_900, 49_800, 49_700, 49_600],
            bid_qtys: [11, 21, 31, 41, 51],
        };
        assert_eq!(record.top_of_book(), Some((50_100, 50_000)));
        let bytes = record.to_vec();
        assert_eq!(HogaRecord::decode(&bytes).unwrap(), record);

        record.bid_prices[0] = 0;
        assert_eq!(record.top_of_book(), None);
    }

    #[test]
    fn test_epoch_nanos() {
        let t = from_epoch_nanos(1_700_000_000_123_456_789);
        assert_eq!(to_epoch_nanos(t), 1_700_000_000_123_456_789);
    }
}
