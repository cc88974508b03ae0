mod candle;
mod fill;
mod order_kind;
mod order_status;
mod position;
mod side;

pub use candle::{Candle, CandleInterval};
pub use fill::FillRecord;
pub use order_kind::{OrderKind, RoutingHint};
pub use order_status::{FailureCause, OrderStatus};
pub use position::Position;
pub use side::Side;
