//! Counted batches of fixed-layout records
//!
//! ```text
//! [count: u32 LE][record 0][record 1]...[record count-1]
//! ```
//!
//! The declared count is checked against the remaining bytes before anything
//! is allocated.

use super::fixed::{FieldReader, FieldWriter, FixedLayout};
use super::tier0::{from_epoch_nanos, to_epoch_nanos};
use crate::error::ProtocolError;
use bridge_core::Candle;

const COUNT_SIZE: usize = 4;

pub fn encode_batch<T: FixedLayout>(records: &[T]) -> Result<Vec<u8>, ProtocolError> {
    let count = u32::try_from(records.len()).map_err(|_| ProtocolError::InvalidField {
        field: "batch count",
        reason: format!("{} records do not fit in u32", records.len()),
    })?;
    let mut buf = vec![0u8; COUNT_SIZE + records.len() * T::SIZE];
    buf[..COUNT_SIZE].copy_from_slice(&count.to_le_bytes());
    for (record, chunk) in records
        .iter()
        .zip(buf[COUNT_SIZE..].chunks_exact_mut(T::SIZE))
    {
        record.write_fields(&mut FieldWriter::new(chunk));
    }
    Ok(buf)
}

pub fn decode_batch<T: FixedLayout>(payload: &[u8]) -> Result<Vec<T>, ProtocolError> {
    if payload.len() < COUNT_SIZE {
        return Err(ProtocolError::Truncated {
            what: "batch count",
            expected: COUNT_SIZE,
            actual: payload.len(),
        });
    }
    let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let body = &payload[COUNT_SIZE..];
    let expected = count.checked_mul(T::SIZE).ok_or(ProtocolError::InvalidField {
        field: "batch count",
        reason: format!("{count} records overflow"),
    })?;
    if body.len() != expected {
        return Err(ProtocolError::Truncated {
            what: T::NAME,
            expected,
            actual: body.len(),
        });
    }

    let mut records = Vec::with_capacity(count);
    for chunk in body.chunks_exact(T::SIZE) {
        records.push(T::read_fields(&mut FieldReader::new(chunk))?);
    }
    Ok(records)
}

/// One bar of a candle response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandleRecord {
    pub time_ns: i64,
    pub open: i32,
    pub high: i32,
    pub low: i32,
    pub close: i32,
    pub volume: i64,
    pub trading_value: i64,
}

impl FixedLayout for CandleRecord {
    const SIZE: usize = 40;
    const NAME: &'static str = "CandleRecord";

    fn write_fields(&self, w: &mut FieldWriter<'_>) {
        w.put_i64(self.time_ns);
        w.put_i32(self.open);
        w.put_i32(self.high);
        w.put_i32(self.low);
        w.put_i32(self.close);
        w.put_i64(self.volume);
        w.put_i64(self.trading_value);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            time_ns: r.i64()?,
            open: r.i32()?,
            high: r.i32()?,
            low: r.i32()?,
            close: r.i32()?,
            volume: r.i64()?,
            trading_value: r.i64()?,
        })
    }
}

impl From<&Candle> for CandleRecord {
    fn from(c: &Candle) -> Self {
        Self {
            time_ns: to_epoch_nanos(c.time),
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            trading_value: c.trading_value,
        }
    }
}

impl From<CandleRecord> for Candle {
    fn from(r: CandleRecord) -> Self {
        Candle {
            time: from_epoch_nanos(r.time_ns),
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
            trading_value: r.trading_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(i: i32) -> CandleRecord {
        CandleRecord {
            time_ns: i as i64 * 60_000_000_000,
            open: 100 + i,
            high: 110 + i,
            low: 90 + i,
            close: 105 + i,
            volume: 1_000,
            trading_value: 105_000,
        }
    }

    #[test]
    fn test_batch_layout() {
        let bars: Vec<_> = (0..3).map(bar).collect();
        let payload = encode_batch(&bars).unwrap();
        assert_eq!(payload.len(), 4 + 3 * 40);
        assert_eq!(&payload[..4], &3u32.to_le_bytes());
        assert_eq!(decode_batch::<CandleRecord>(&payload).unwrap(), bars);
    }

    #[test]
    fn test_empty_batch() {
        let payload = encode_batch::<CandleRecord>(&[]).unwrap();
        assert_eq!(payload, vec![0, 0, 0, 0]);
        assert!(decode_batch::<CandleRecord>(&payload).unwrap().is_empty());
    }

    #[test]
    fn test_count_exceeds_body() {
        let mut payload = encode_batch(&[bar(1)]).unwrap();
        payload[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_batch::<CandleRecord>(&payload),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_missing_count() {
        assert!(matches!(
            decode_batch::<CandleRecord>(&[1, 0]),
            Err(ProtocolError::Truncated { what: "batch count", .. })
        ));
    }

    #[test]
    fn test_candle_conversion() {
        let record = bar(5);
        let candle: Candle = record.into();
        assert_eq!(candle.close, 110);
        assert_eq!(CandleRecord::from(&candle), record);
    }
}
