//! Conversions between typed broker events and wire records
//!
//! Prices travel as whole won (`i32`) in the fixed-layout records; the
//! typed side uses `Decimal`. Quantities are clamped into the record's
//! integer range rather than wrapped.

use bridge_core::{Price, Quantity, Side};
use bridge_gateway::protocol::schema::OrderRejectNotice;
use bridge_gateway::protocol::tier0::{from_epoch_nanos, to_epoch_nanos};
use bridge_gateway::{BalanceRecord, ExecEvent, ExecRecord, FixedStr, ProtocolError, TickRecord};
use bridge_ports::{BalanceEvent, OrderEvent, OrderEventStatus, TickUpdate};
use log::debug;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

fn won(price: Price) -> i32 {
    price.round().to_i32().unwrap_or(i32::MAX)
}

fn qty_i32(qty: Quantity) -> i32 {
    i32::try_from(qty).unwrap_or(i32::MAX)
}

fn qty_from(raw: i64) -> Quantity {
    Quantity::try_from(raw).unwrap_or(0)
}

/// Fixed-width field, or empty when the value does not fit
fn fixed_or_empty<const N: usize>(field: &'static str, value: Option<&str>) -> FixedStr<N> {
    match value.map(FixedStr::<N>::new) {
        Some(Ok(s)) => s,
        Some(Err(e)) => {
            debug!("{} dropped from record: {}", field, e);
            FixedStr::empty()
        }
        None => FixedStr::empty(),
    }
}

/// Record for an acknowledgement, fill or confirmation.
///
/// `side` and `order_price` come from the order the event belongs to; the
/// event itself only carries execution data. Refusals have no record form.
pub fn exec_record(
    event: &OrderEvent,
    client_order_id: Option<&str>,
    side: Side,
    order_price: Price,
) -> Result<ExecRecord, ProtocolError> {
    let (kind, price, qty) = match event.status {
        OrderEventStatus::Accepted => (ExecEvent::Accepted, order_price, 0),
        OrderEventStatus::Filled => (ExecEvent::Filled, event.filled_price, event.filled_qty),
        OrderEventStatus::Confirmed => (ExecEvent::Confirmed, order_price, 0),
        OrderEventStatus::Rejected => {
            return Err(ProtocolError::InvalidField {
                field: "exec event",
                reason: "refusals travel as OrderReject notices".into(),
            });
        }
    };
    Ok(ExecRecord {
        order_no: FixedStr::new(&event.broker_order_id)?,
        orig_order_no: fixed_or_empty("orig_order_no", event.original_order_id.as_deref()),
        client_id: fixed_or_empty("client_id", client_order_id),
        fill_no: fixed_or_empty("fill_no", event.fill_id.as_deref()),
        code: FixedStr::new(&event.code)?,
        time_ns: to_epoch_nanos(event.time),
        side,
        event: kind,
        price: won(price),
        qty: qty_i32(qty),
        remaining: qty_i32(event.remaining_qty),
    })
}

pub fn order_event(record: &ExecRecord) -> Result<OrderEvent, ProtocolError> {
    let broker_order_id = record.order_no.as_str()?.to_string();
    let code = record.code.as_str()?.to_string();
    let remaining = qty_from(record.remaining.into());
    let mut event = match record.event {
        ExecEvent::Accepted => OrderEvent::accepted(broker_order_id, code, remaining),
        ExecEvent::Filled => OrderEvent::fill(
            broker_order_id,
            code,
            record.fill_no.as_str()?,
            Decimal::from(record.price),
            qty_from(record.qty.into()),
            remaining,
        ),
        ExecEvent::Confirmed => OrderEvent::confirmed(
            broker_order_id,
            code,
            record.orig_order_no.to_option()?,
            remaining,
        ),
    };
    if let Some(client_id) = record.client_id.to_option()? {
        event = event.with_client_order_id(client_id);
    }
    if record.event == ExecEvent::Filled && event.fill_id.as_deref() == Some("") {
        event.fill_id = None;
    }
    Ok(event.with_time(from_epoch_nanos(record.time_ns)))
}

pub fn reject_notice(event: &OrderEvent, client_order_id: Option<&str>) -> OrderRejectNotice {
    OrderRejectNotice {
        broker_order_id: event.broker_order_id.clone(),
        client_order_id: client_order_id.map(str::to_string),
        code: event.code.clone(),
        reason: event.reject_reason.clone().unwrap_or_default(),
        time: event.time,
    }
}

pub fn rejected_event(notice: &OrderRejectNotice) -> OrderEvent {
    let event = OrderEvent::rejected(&notice.broker_order_id, &notice.code, &notice.reason)
        .with_time(notice.time);
    match &notice.client_order_id {
        Some(id) => event.with_client_order_id(id),
        None => event,
    }
}

pub fn balance_record(event: &BalanceEvent) -> Result<BalanceRecord, ProtocolError> {
    Ok(BalanceRecord {
        code: FixedStr::new(&event.code)?,
        qty: i64::try_from(event.qty).unwrap_or(i64::MAX),
        avg_price: won(event.avg_price),
        total_buy_amount: event.total_buy_amount.round().to_i64().unwrap_or(i64::MAX),
        available_qty: i64::try_from(event.available_qty).unwrap_or(i64::MAX),
        current_price: won(event.current_price),
        profit_rate: event.profit_rate.to_f64().unwrap_or(0.0),
        time_ns: to_epoch_nanos(event.time),
    })
}

pub fn balance_event(record: &BalanceRecord) -> Result<BalanceEvent, ProtocolError> {
    Ok(BalanceEvent {
        code: record.code.as_str()?.to_string(),
        qty: qty_from(record.qty),
        avg_price: Decimal::from(record.avg_price),
        total_buy_amount: Decimal::from(record.total_buy_amount),
        available_qty: qty_from(record.available_qty),
        current_price: Decimal::from(record.current_price),
        profit_rate: Decimal::from_f64_retain(record.profit_rate)
            .map(|d| d.round_dp(4))
            .unwrap_or_default(),
        time: from_epoch_nanos(record.time_ns),
    })
}

pub fn tick_record(tick: &TickUpdate) -> Result<TickRecord, ProtocolError> {
    Ok(TickRecord {
        code: FixedStr::new(&tick.code)?,
        time_ns: to_epoch_nanos(tick.time),
        price: tick.price,
        open: tick.open,
        high: tick.high,
        low: tick.low,
        prev_close: tick.prev_close,
        volume: tick.volume,
    })
}

pub fn tick_update(record: &TickRecord) -> Result<TickUpdate, ProtocolError> {
    Ok(TickUpdate {
        code: record.code.as_str()?.to_string(),
        time: from_epoch_nanos(record.time_ns),
        price: record.price,
        open: record.open,
        high: record.high,
        low: record.low,
        prev_close: record.prev_close,
        volume: record.volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fill_survives_the_wire() {
        let event = OrderEvent::fill("0000012", "005930", "F0000003", dec!(70100), 3, 7)
            .with_time(from_epoch_nanos(1_700_000_000_123_456_789));
        let record = exec_record(&event, Some("ORD-000001"), Side::Buy, dec!(70000)).unwrap();
        assert_eq!(record.event, ExecEvent::Filled);
        assert_eq!(record.price, 70_100);

        let back = order_event(&record).unwrap();
        assert_eq!(back, event.with_client_order_id("ORD-000001"));
    }

    #[test]
    fn test_confirmation_keeps_original_order() {
        let event = OrderEvent::confirmed("0000013", "005930", Some("0000012".into()), 0);
        let record = exec_record(&event, None, Side::Sell, dec!(70500)).unwrap();
        assert_eq!(record.price, 70_500);
        let back = order_event(&record).unwrap();
        assert_eq!(back.original_order_id.as_deref(), Some("0000012"));
        assert_eq!(back.client_order_id, None);
    }

    #[test]
    fn test_long_client_id_is_dropped_not_fatal() {
        let event = OrderEvent::accepted("0000014", "005930", 5);
        let record = exec_record(
            &event,
            Some("a-client-id-longer-than-sixteen"),
            Side::Buy,
            dec!(70000),
        )
        .unwrap();
        assert!(record.client_id.is_empty());
    }

    #[test]
    fn test_rejection_has_no_record_form() {
        let event = OrderEvent::rejected("0000015", "005930", "장운영시간이 아닙니다");
        assert!(exec_record(&event, None, Side::Buy, dec!(0)).is_err());
        let notice = reject_notice(&event, Some("ORD-000009"));
        let back = rejected_event(&notice);
        assert_eq!(back.reject_reason.as_deref(), Some("장운영시간이 아닙니다"));
        assert_eq!(back.client_order_id.as_deref(), Some("ORD-000009"));
    }

    #[test]
    fn test_balance_conversion() {
        let event = BalanceEvent {
            code: "000660".into(),
            qty: 12,
            avg_price: dec!(180500),
            total_buy_amount: dec!(2166000),
            available_qty: 10,
            current_price: dec!(182000),
            profit_rate: dec!(0.83),
            time: Utc::now(),
        };
        let back = balance_event(&balance_record(&event).unwrap()).unwrap();
        assert_eq!(back.qty, 12);
        assert_eq!(back.available_qty, 10);
        assert_eq!(back.avg_price, dec!(180500));
        assert_eq!(back.profit_rate, dec!(0.83));
    }
}
