//! UI-side bridge client
//!
//! Typed calls over a reconnecting `PipeClient`, plus typed push streams.

use bridge_core::Candle;
use bridge_gateway::protocol::schema::{
    AckMessage, CandleRequest, HeartbeatMessage, OrderAckMessage, OrderCancelMessage,
    OrderModifyMessage, OrderRejectNotice, OrderRequestMessage, ServerStatusMessage,
    SubscribeMessage, UnsubscribeMessage,
};
use bridge_gateway::{
    BalanceRecord, CandleRecord, ExecRecord, Frame, GatewayError, MessageType, PipeClient,
    PipeConfig, ProtocolError, PushSubscriber, SchemaMessage, TickRecord, TransportError,
};
use chrono::Utc;
use log::warn;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::Instant;

/// Payload types that arrive as pushes
pub trait PushPayload: Sized {
    fn decode_push(frame: &Frame) -> Result<Self, ProtocolError>;
}

impl PushPayload for TickRecord {
    fn decode_push(frame: &Frame) -> Result<Self, ProtocolError> {
        frame.decode_fixed()
    }
}

impl PushPayload for ExecRecord {
    fn decode_push(frame: &Frame) -> Result<Self, ProtocolError> {
        frame.decode_fixed()
    }
}

impl PushPayload for BalanceRecord {
    fn decode_push(frame: &Frame) -> Result<Self, ProtocolError> {
        frame.decode_fixed()
    }
}

impl PushPayload for OrderRejectNotice {
    fn decode_push(frame: &Frame) -> Result<Self, ProtocolError> {
        frame.decode_schema()
    }
}

/// Decoded pushes of one message type. Malformed payloads are logged and
/// skipped.
pub struct PushStream<T> {
    inner: PushSubscriber,
    _payload: PhantomData<fn() -> T>,
}

impl<T: PushPayload> PushStream<T> {
    fn new(inner: PushSubscriber) -> Self {
        Self {
            inner,
            _payload: PhantomData,
        }
    }

    pub async fn next(&mut self) -> Result<T, TransportError> {
        loop {
            let frame = self.inner.next().await?;
            match T::decode_push(&frame) {
                Ok(payload) => return Ok(payload),
                Err(e) => warn!("malformed {} push dropped: {}", frame.msg_type, e),
            }
        }
    }

    /// Pushes lost because this stream fell behind
    pub fn skipped(&self) -> u64 {
        self.inner.skipped()
    }
}

/// Cheaply cloneable client handle
#[derive(Clone)]
pub struct BridgeClient {
    pipe: PipeClient,
}

impl BridgeClient {
    pub fn new(config: PipeConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            pipe: PipeClient::new(config)?,
        })
    }

    pub fn pipe(&self) -> &PipeClient {
        &self.pipe
    }

    /// Connect in the background and keep reconnecting
    pub fn start(&self) {
        self.pipe.start();
    }

    /// Single connection attempt
    pub async fn connect(&self) -> Result<(), GatewayError> {
        self.pipe.connect().await
    }

    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), GatewayError> {
        self.pipe.wait_connected(timeout).await
    }

    pub fn is_connected(&self) -> bool {
        self.pipe.is_connected()
    }

    pub async fn stop(&self) {
        self.pipe.stop().await;
    }

    async fn call<Req, Resp>(&self, message: &Req) -> Result<Resp, GatewayError>
    where
        Req: SchemaMessage,
        Resp: SchemaMessage,
    {
        let response = self.pipe.request(Frame::schema(message)?).await?;
        expect_type(&response, Resp::MESSAGE_TYPE)?;
        Ok(response.decode_schema()?)
    }

    pub async fn submit_order(
        &self,
        order: &OrderRequestMessage,
    ) -> Result<OrderAckMessage, GatewayError> {
        self.call(order).await
    }

    pub async fn modify_order(
        &self,
        modify: &OrderModifyMessage,
    ) -> Result<OrderAckMessage, GatewayError> {
        self.call(modify).await
    }

    pub async fn cancel_order(
        &self,
        cancel: &OrderCancelMessage,
    ) -> Result<OrderAckMessage, GatewayError> {
        self.call(cancel).await
    }

    pub async fn subscribe(&self, codes: &[&str]) -> Result<AckMessage, GatewayError> {
        let message = SubscribeMessage {
            codes: codes.iter().map(|c| c.to_string()).collect(),
        };
        self.call(&message).await
    }

    pub async fn unsubscribe(&self, codes: &[&str]) -> Result<AckMessage, GatewayError> {
        let message = UnsubscribeMessage {
            codes: codes.iter().map(|c| c.to_string()).collect(),
        };
        self.call(&message).await
    }

    pub async fn request_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, GatewayError> {
        let response = self.pipe.request(Frame::schema(request)?).await?;
        expect_type(&response, MessageType::BatchCandleResponse)?;
        let records = response.decode_batch::<CandleRecord>()?;
        Ok(records.into_iter().map(Candle::from).collect())
    }

    /// Round-trip time of one heartbeat
    pub async fn heartbeat(&self) -> Result<Duration, GatewayError> {
        let started = Instant::now();
        let _: HeartbeatMessage = self.call(&HeartbeatMessage { time: Utc::now() }).await?;
        Ok(started.elapsed())
    }

    pub async fn server_status(&self) -> Result<ServerStatusMessage, GatewayError> {
        self.call(&ServerStatusMessage::default()).await
    }

    pub fn ticks(&self) -> PushStream<TickRecord> {
        PushStream::new(self.pipe.subscribe(MessageType::RealtimeTick))
    }

    /// Fills
    pub fn executions(&self) -> PushStream<ExecRecord> {
        PushStream::new(self.pipe.subscribe(MessageType::RealtimeExec))
    }

    /// Acknowledgements and modify/cancel confirmations
    pub fn order_results(&self) -> PushStream<ExecRecord> {
        PushStream::new(self.pipe.subscribe(MessageType::RealtimeOrderResult))
    }

    pub fn balances(&self) -> PushStream<BalanceRecord> {
        PushStream::new(self.pipe.subscribe(MessageType::RealtimeBalance))
    }

    pub fn rejections(&self) -> PushStream<OrderRejectNotice> {
        PushStream::new(self.pipe.subscribe(MessageType::OrderReject))
    }
}

fn expect_type(frame: &Frame, expected: MessageType) -> Result<(), GatewayError> {
    if frame.msg_type == expected {
        Ok(())
    } else {
        Err(GatewayError::UnexpectedResponse(frame.msg_type.as_u8()))
    }
}
