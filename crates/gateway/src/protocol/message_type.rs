//! Message catalogue and tier selection
//!
//! The numeric range of a message type decides how its payload is encoded:
//!
//! ```text
//!  0x00..0x1F  Tier 0  fixed-layout records (realtime ticks, quotes, executions)
//!  0x20..0x7F  Tier 1  schema batches and counted record batches
//!  0x80..0xFF  Tier 2  schema control messages (orders, subscriptions, status)
//! ```

use crate::error::ProtocolError;
use std::fmt;

/// First type code of the batch tier
pub const BATCH_TIER_START: u8 = 0x20;
/// First type code of the control tier
pub const CONTROL_TIER_START: u8 = 0x80;

/// Payload encoding tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Fixed-layout little-endian records
    Fixed,
    /// Bulk data (schema batches or counted fixed records)
    Batch,
    /// Schema-encoded control messages
    Control,
}

impl Tier {
    /// Tier of a raw type code. Total over `u8`.
    pub fn of(raw: u8) -> Self {
        if raw < BATCH_TIER_START {
            Tier::Fixed
        } else if raw < CONTROL_TIER_START {
            Tier::Batch
        } else {
            Tier::Control
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Fixed => "fixed-layout",
            Tier::Batch => "batch",
            Tier::Control => "control",
        }
    }
}

/// Every message type the bridge understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    // Tier 0
    RealtimeTick = 0x01,
    RealtimeHoga = 0x02,
    RealtimeExec = 0x03,
    RealtimeBalance = 0x04,
    RealtimeOrderResult = 0x05,

    // Tier 1
    BatchCandleRequest = 0x20,
    BatchCandleResponse = 0x21,
    BatchProgramTrade = 0x22,
    BatchStrength = 0x23,
    BatchSector = 0x24,
    BatchForeign = 0x25,
    BatchInstitution = 0x26,
    BatchFinancial = 0x27,
    BatchNews = 0x28,
    BatchStockList = 0x29,
    BatchCondition = 0x2A,
    BatchBalance = 0x2B,

    // Tier 2
    OrderRequest = 0x80,
    OrderModify = 0x81,
    OrderCancel = 0x82,
    SubscribeRequest = 0x83,
    UnsubscribeRequest = 0x84,
    ConditionSearch = 0x85,
    ServerStatus = 0x90,
    OrderAck = 0x91,
    OrderReject = 0x92,
    ErrorResponse = 0xFD,
    Heartbeat = 0xFE,
    Ack = 0xFF,
}

impl MessageType {
    pub const ALL: [MessageType; 29] = [
        MessageType::RealtimeTick,
        MessageType::RealtimeHoga,
        MessageType::RealtimeExec,
        MessageType::RealtimeBalance,
        MessageType::RealtimeOrderResult,
        MessageType::BatchCandleRequest,
        MessageType::BatchCandleResponse,
        MessageType::BatchProgramTrade,
        MessageType::BatchStrength,
        MessageType::BatchSector,
        MessageType::BatchForeign,
        MessageType::BatchInstitution,
        MessageType::BatchFinancial,
        MessageType::BatchNews,
        MessageType::BatchStockList,
        MessageType::BatchCondition,
        MessageType::BatchBalance,
        MessageType::OrderRequest,
        MessageType::OrderModify,
        MessageType::OrderCancel,
        MessageType::SubscribeRequest,
        MessageType::UnsubscribeRequest,
        MessageType::ConditionSearch,
        MessageType::ServerStatus,
        MessageType::OrderAck,
        MessageType::OrderReject,
        MessageType::ErrorResponse,
        MessageType::Heartbeat,
        MessageType::Ack,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn tier(self) -> Tier {
        Tier::of(self as u8)
    }

    /// Look up a raw type code
    pub fn from_u8(raw: u8) -> Result<Self, ProtocolError> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_u8() == raw)
            .ok_or(ProtocolError::UnknownType(raw))
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        MessageType::from_u8(raw)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(Tier::of(0x00), Tier::Fixed);
        assert_eq!(Tier::of(0x1F), Tier::Fixed);
        assert_eq!(Tier::of(0x20), Tier::Batch);
        assert_eq!(Tier::of(0x7F), Tier::Batch);
        assert_eq!(Tier::of(0x80), Tier::Control);
        assert_eq!(Tier::of(0xFF), Tier::Control);
    }

    #[test]
    fn test_catalogue_lookup() {
        for ty in MessageType::ALL {
            assert_eq!(MessageType::from_u8(ty.as_u8()), Ok(ty));
        }
        assert_eq!(MessageType::RealtimeExec.tier(), Tier::Fixed);
        assert_eq!(MessageType::BatchBalance.tier(), Tier::Batch);
        assert_eq!(MessageType::Ack.tier(), Tier::Control);
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            MessageType::from_u8(0x7E),
            Err(ProtocolError::UnknownType(0x7E))
        );
        assert!(MessageType::try_from(0x00).is_err());
    }
}
