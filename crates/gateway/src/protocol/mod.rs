//! Wire protocol: framing and the three payload tiers

pub mod batch;
pub mod codec;
pub mod fixed;
pub mod frame;
pub mod message_type;
pub mod schema;
pub mod tier0;

pub use batch::{CandleRecord, decode_batch, encode_batch};
pub use codec::{DEFAULT_MAX_PAYLOAD, FrameCodec};
pub use fixed::{FieldReader, FieldWriter, FixedLayout, FixedStr};
pub use frame::{FLAG_ERROR, FLAG_RESPONSE, Frame, FrameHeader, HEADER_SIZE, PUSH_SEQUENCE};
pub use message_type::{MessageType, Tier};
pub use schema::SchemaMessage;
pub use tier0::{BalanceRecord, CodeStr, ExecEvent, ExecRecord, HogaRecord, OrderNoStr, TickRecord};
