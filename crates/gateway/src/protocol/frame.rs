//! Frame header and frame value
//!
//! Header layout (10 bytes, little-endian):
//!
//! ```text
//! offset  size  field
//!   0      1    message type
//!   1      1    flags (bit 0 = response, bit 1 = error)
//!   2      4    payload length
//!   6      4    sequence (0 = unsolicited push)
//! ```

use super::batch;
use super::fixed::FixedLayout;
use super::message_type::{MessageType, Tier};
use super::schema::{ErrorBody, SchemaMessage};
use crate::error::ProtocolError;

pub const HEADER_SIZE: usize = 10;

pub const FLAG_RESPONSE: u8 = 0b0000_0001;
pub const FLAG_ERROR: u8 = 0b0000_0010;

/// Sequence value carried by unsolicited pushes
pub const PUSH_SEQUENCE: u32 = 0;

/// Raw frame header, as read off the wire before the type is validated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u8,
    pub flags: u8,
    pub payload_len: u32,
    pub sequence: u32,
}

impl FrameHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.msg_type;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[6..10].copy_from_slice(&self.sequence.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            msg_type: buf[0],
            flags: buf[1],
            payload_len: u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            sequence: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
        }
    }

    /// Check the declared length against `max_payload` and resolve the type.
    ///
    /// Runs before any payload buffer is allocated.
    pub fn validate(&self, max_payload: usize) -> Result<MessageType, ProtocolError> {
        let len = self.payload_len as usize;
        if len > max_payload {
            return Err(ProtocolError::Oversized {
                len,
                max: max_payload,
            });
        }
        MessageType::from_u8(self.msg_type)
    }
}

/// A complete frame: validated type, flags, sequence and raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub flags: u8,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Unsolicited frame (sequence 0, no flags)
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            flags: 0,
            sequence: PUSH_SEQUENCE,
            payload,
        }
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Response to `request`, echoing its sequence
    pub fn response(request_sequence: u32, msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            flags: FLAG_RESPONSE,
            sequence: request_sequence,
            payload,
        }
    }

    /// Error response carrying a human-readable reason
    pub fn error_response(request_sequence: u32, message: impl Into<String>) -> Self {
        let body = ErrorBody {
            message: message.into(),
        };
        // ErrorBody has only a String field, serialization cannot fail
        let payload = serde_json::to_vec(&body).unwrap_or_default();
        Self {
            msg_type: MessageType::ErrorResponse,
            flags: FLAG_RESPONSE | FLAG_ERROR,
            sequence: request_sequence,
            payload,
        }
    }

    /// Frame whose payload is a single fixed-layout record
    pub fn fixed<T: FixedLayout>(msg_type: MessageType, record: &T) -> Result<Self, ProtocolError> {
        expect_tier(msg_type, Tier::Fixed)?;
        Ok(Self::new(msg_type, record.to_vec()))
    }

    /// Frame whose payload is a counted batch of fixed-layout records
    pub fn batch<T: FixedLayout>(msg_type: MessageType, records: &[T]) -> Result<Self, ProtocolError> {
        expect_tier(msg_type, Tier::Batch)?;
        Ok(Self::new(msg_type, batch::encode_batch(records)?))
    }

    /// Frame whose payload is a schema-encoded message
    pub fn schema<T: SchemaMessage>(message: &T) -> Result<Self, ProtocolError> {
        Ok(Self::new(T::MESSAGE_TYPE, message.encode()?))
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            msg_type: self.msg_type.as_u8(),
            flags: self.flags,
            payload_len: self.payload.len() as u32,
            sequence: self.sequence,
        }
    }

    pub fn tier(&self) -> Tier {
        self.msg_type.tier()
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & FLAG_ERROR != 0 || self.msg_type == MessageType::ErrorResponse
    }

    /// Unsolicited push: neither a request nor a response
    pub fn is_push(&self) -> bool {
        self.sequence == PUSH_SEQUENCE && !self.is_response()
    }

    /// Request awaiting a response from this side
    pub fn is_request(&self) -> bool {
        self.sequence != PUSH_SEQUENCE && !self.is_response()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn decode_fixed<T: FixedLayout>(&self) -> Result<T, ProtocolError> {
        expect_tier(self.msg_type, Tier::Fixed)?;
        T::decode(&self.payload)
    }

    pub fn decode_batch<T: FixedLayout>(&self) -> Result<Vec<T>, ProtocolError> {
        expect_tier(self.msg_type, Tier::Batch)?;
        batch::decode_batch(&self.payload)
    }

    pub fn decode_schema<T: SchemaMessage>(&self) -> Result<T, ProtocolError> {
        if self.msg_type != T::MESSAGE_TYPE {
            return Err(ProtocolError::TierMismatch {
                msg_type: self.msg_type.as_u8(),
                expected: T::NAME,
            });
        }
        T::decode(&self.payload)
    }

    /// Reason text of an error response. Falls back to the raw payload when
    /// the body does not parse.
    pub fn error_message(&self) -> String {
        match serde_json::from_slice::<ErrorBody>(&self.payload) {
            Ok(body) => body.message,
            Err(_) => String::from_utf8_lossy(&self.payload).into_owned(),
        }
    }
}

fn expect_tier(msg_type: MessageType, tier: Tier) -> Result<(), ProtocolError> {
    if msg_type.tier() == tier {
        Ok(())
    } else {
        Err(ProtocolError::TierMismatch {
            msg_type: msg_type.as_u8(),
            expected: tier.name(),
        })
    }
}
