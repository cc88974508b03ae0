//! Broker-side bridge service
//!
//! Owns the pipe server and an order lifecycle manager over the broker
//! adapter. Inbound requests are handled on their own tasks so a slow broker
//! call never holds up the next request. Broker callbacks are applied to the
//! manager first and then pushed to the pipe.
//!
//! Orders are kept under `C<connection>:<caller id>` so ids chosen by
//! different clients cannot collide; pushes for an order go back to the
//! connection that placed it, carrying the caller's own id.

use crate::config::BridgeConfig;
use crate::wire;
use bridge_core::Side;
use bridge_gateway::protocol::schema::{
    AckMessage, CandleRequest, OrderAckMessage, OrderCancelMessage, OrderModifyMessage,
    OrderRequestMessage, ServerStatusMessage, SubscribeMessage, UnsubscribeMessage,
};
use bridge_gateway::protocol::{CandleRecord, encode_batch};
use bridge_gateway::transport::ConnectionId;
use bridge_gateway::{Frame, GatewayError, InboundFrame, MessageType, PipeServer, SchemaMessage};
use bridge_order_manager::{
    Error as OrderError, NewOrder, OrderLifecycleManager, OrderRef, SubmissionThrottler,
};
use bridge_ports::{
    BrokerEvent, BrokerEventReceiver, BrokerExecutor, CandleProvider, MarketDataFeed,
    OrderEvent, OrderEventStatus, TickUpdate,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Key of an order placed by connection `conn` under the caller's id
pub fn local_order_id(conn: ConnectionId, remote_id: &str) -> String {
    format!("C{conn}:{remote_id}")
}

/// Inverse of `local_order_id`
pub fn split_local_order_id(local_id: &str) -> Option<(ConnectionId, &str)> {
    let (conn, remote) = local_id.strip_prefix('C')?.split_once(':')?;
    Some((conn.parse().ok()?, remote))
}

struct ServiceContext {
    pipe: Arc<PipeServer>,
    manager: Arc<OrderLifecycleManager>,
    feed: Arc<dyn MarketDataFeed>,
    candles: Arc<dyn CandleProvider>,
    broker_name: String,
    next_remote_id: AtomicU64,
    frames_handled: AtomicU64,
    subscriptions: Mutex<HashSet<String>>,
}

pub struct BridgeServer {
    ctx: Arc<ServiceContext>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeServer {
    /// Bind the pipe and start dispatching. Must be called from within a
    /// tokio runtime.
    pub fn start(
        config: &BridgeConfig,
        broker: Arc<dyn BrokerExecutor>,
        feed: Arc<dyn MarketDataFeed>,
        candles: Arc<dyn CandleProvider>,
    ) -> Result<Self, GatewayError> {
        let events = broker.event_stream();
        let broker_name = broker.name().to_string();
        let throttler = Arc::new(SubmissionThrottler::new(&config.throttle));
        let manager = Arc::new(OrderLifecycleManager::new(
            broker,
            throttler,
            config.orders.clone(),
        ));
        let (pipe, inbound) = PipeServer::start(config.pipe.clone())?;
        let ticks = feed.tick_stream();

        let ctx = Arc::new(ServiceContext {
            pipe: Arc::new(pipe),
            manager,
            feed,
            candles,
            broker_name,
            next_remote_id: AtomicU64::new(1),
            frames_handled: AtomicU64::new(0),
            subscriptions: Mutex::new(HashSet::new()),
        });

        let tasks = vec![
            tokio::spawn(dispatch_requests(ctx.clone(), inbound)),
            tokio::spawn(forward_broker_events(ctx.clone(), events)),
            tokio::spawn(forward_ticks(ctx.clone(), ticks)),
        ];
        info!(
            "Bridge server on {} serving broker '{}'",
            ctx.pipe.address(),
            ctx.broker_name
        );
        Ok(Self {
            ctx,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn address(&self) -> &str {
        self.ctx.pipe.address()
    }

    pub fn pipe(&self) -> &Arc<PipeServer> {
        &self.ctx.pipe
    }

    pub fn manager(&self) -> &Arc<OrderLifecycleManager> {
        &self.ctx.manager
    }

    pub fn status(&self) -> ServerStatusMessage {
        self.ctx.status()
    }

    pub async fn stop(&self) {
        self.ctx.pipe.stop().await;
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        info!("Bridge server stopped");
    }
}

async fn dispatch_requests(ctx: Arc<ServiceContext>, mut inbound: mpsc::Receiver<InboundFrame>) {
    while let Some(request) = inbound.recv().await {
        ctx.frames_handled.fetch_add(1, Ordering::Relaxed);
        if !request.frame.is_request() {
            debug!(
                "ignoring non-request {} from conn {}",
                request.frame.msg_type,
                request.connection.id()
            );
            continue;
        }
        let ctx = ctx.clone();
        tokio::spawn(async move { ctx.handle(request).await });
    }
    debug!("request dispatcher stopped");
}

async fn forward_broker_events(ctx: Arc<ServiceContext>, mut events: BrokerEventReceiver) {
    while let Some(event) = events.recv().await {
        if let Err(e) = ctx.manager.handle_event(&event) {
            debug!("broker event not applied: {}", e);
        }
        ctx.forward(&event).await;
    }
    info!("{} event stream closed", ctx.broker_name);
}

async fn forward_ticks(ctx: Arc<ServiceContext>, mut ticks: broadcast::Receiver<TickUpdate>) {
    loop {
        match ticks.recv().await {
            Ok(tick) => match wire::tick_record(&tick)
                .and_then(|r| Frame::fixed(MessageType::RealtimeTick, &r))
            {
                Ok(frame) => {
                    ctx.pipe.broadcast(&frame).await;
                }
                Err(e) => warn!("tick for {} not encodable: {}", tick.code, e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("tick forwarder skipped {} ticks", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

impl ServiceContext {
    fn status(&self) -> ServerStatusMessage {
        ServerStatusMessage {
            server_name: self.pipe.address().to_string(),
            broker_connected: true,
            connected_clients: self.pipe.connection_count() as u32,
            active_subscriptions: self.subscriptions.lock().len() as u32,
            frames_handled: self.frames_handled.load(Ordering::Relaxed),
            time: Some(Utc::now()),
        }
    }

    async fn handle(&self, request: InboundFrame) {
        let sequence = request.frame.sequence;
        let conn = request.connection.id();
        let reply = match self.respond(conn, &request.frame).await {
            Ok(reply) => reply,
            Err(reason) => {
                warn!(
                    "{} seq={} from conn {} refused: {}",
                    request.frame.msg_type, sequence, conn, reason
                );
                Frame::error_response(sequence, reason)
            }
        };
        if let Err(e) = request.reply(reply).await {
            debug!("reply seq={} to conn {} not delivered: {}", sequence, conn, e);
        }
    }

    /// Response frame, or the reason text for an error response
    async fn respond(&self, conn: ConnectionId, frame: &Frame) -> Result<Frame, String> {
        let sequence = frame.sequence;
        match frame.msg_type {
            MessageType::OrderRequest => {
                let msg: OrderRequestMessage = decode(frame)?;
                let remote = self.remote_id(msg.client_order_id);
                let local = local_order_id(conn, &remote);
                let order = NewOrder {
                    code: msg.code,
                    side: msg.side,
                    qty: msg.qty,
                    price: msg.price,
                    routing: msg.routing,
                    client_order_id: Some(local.clone()),
                };
                let result = self.manager.submit(order).await;
                self.order_ack(sequence, &local, &remote, result)
            }
            MessageType::OrderModify => {
                let msg: OrderModifyMessage = decode(frame)?;
                let remote = self.remote_id(msg.client_order_id);
                let local = local_order_id(conn, &remote);
                let result = self
                    .manager
                    .modify_with_id(
                        &OrderRef::broker(msg.broker_order_id),
                        msg.qty,
                        msg.price,
                        Some(local.clone()),
                    )
                    .await;
                self.order_ack(sequence, &local, &remote, result)
            }
            MessageType::OrderCancel => {
                let msg: OrderCancelMessage = decode(frame)?;
                let remote = self.remote_id(msg.client_order_id);
                let local = local_order_id(conn, &remote);
                let result = self
                    .manager
                    .cancel_with_id(&OrderRef::broker(msg.broker_order_id), Some(local.clone()))
                    .await;
                self.order_ack(sequence, &local, &remote, result)
            }
            MessageType::SubscribeRequest => {
                let msg: SubscribeMessage = decode(frame)?;
                for code in &msg.codes {
                    self.feed.subscribe(code).await.map_err(|e| e.to_string())?;
                    self.subscriptions.lock().insert(code.clone());
                }
                ack(sequence, format!("subscribed {}", msg.codes.len()))
            }
            MessageType::UnsubscribeRequest => {
                let msg: UnsubscribeMessage = decode(frame)?;
                for code in &msg.codes {
                    self.feed.unsubscribe(code).await.map_err(|e| e.to_string())?;
                    self.subscriptions.lock().remove(code);
                }
                ack(sequence, format!("unsubscribed {}", msg.codes.len()))
            }
            MessageType::BatchCandleRequest => {
                let msg: CandleRequest = decode(frame)?;
                let candles = self
                    .candles
                    .candles(&msg.code, msg.interval, msg.count as usize)
                    .await
                    .map_err(|e| e.to_string())?;
                let records: Vec<CandleRecord> = candles
                    .iter()
                    .filter(|c| msg.from.is_none_or(|from| c.time >= from))
                    .filter(|c| msg.to.is_none_or(|to| c.time <= to))
                    .map(CandleRecord::from)
                    .collect();
                let payload = encode_batch(&records).map_err(|e| e.to_string())?;
                Ok(Frame::response(
                    sequence,
                    MessageType::BatchCandleResponse,
                    payload,
                ))
            }
            MessageType::Heartbeat => Ok(Frame::response(
                sequence,
                MessageType::Heartbeat,
                frame.payload.clone(),
            )),
            MessageType::ServerStatus => respond_with(sequence, &self.status()),
            other => Err(format!("unsupported request {other}")),
        }
    }

    fn remote_id(&self, requested: Option<String>) -> String {
        requested.unwrap_or_else(|| {
            let n = self.next_remote_id.fetch_add(1, Ordering::Relaxed);
            format!("SRV-{:06}", n)
        })
    }

    /// Acknowledge an order call. A broker refusal becomes an error response
    /// carrying the broker's text; a local failure is acknowledged as
    /// `Failed` so the caller can tell the two apart.
    fn order_ack(
        &self,
        sequence: u32,
        local: &str,
        remote: &str,
        result: Result<String, OrderError>,
    ) -> Result<Frame, String> {
        let message = match result {
            Ok(_) => None,
            Err(OrderError::BrokerRejection(reason)) => return Err(reason),
            Err(
                e @ (OrderError::ParentOrderNotFound(_)
                | OrderError::InvalidOrder(_)
                | OrderError::OrderTerminal { .. }
                | OrderError::UnknownOrder(_)),
            ) => return Err(e.to_string()),
            Err(e) => Some(e.to_string()),
        };
        let order = self
            .manager
            .order(local)
            .ok_or_else(|| format!("order {remote} vanished"))?;
        let ack = OrderAckMessage {
            client_order_id: Some(remote.to_string()),
            broker_order_id: order.broker_order_id,
            status: order.status,
            failure: order.failure,
            message,
        };
        respond_with(sequence, &ack)
    }

    /// Push a broker callback to the connection that owns the order, or to
    /// everyone when the order did not come through the bridge
    async fn forward(&self, event: &BrokerEvent) {
        let (frame, owner) = match event {
            BrokerEvent::Order(order_event) => {
                let (owner, side, price) = self.owner_of(order_event);
                let remote = owner.as_ref().map(|(_, remote)| remote.as_str());
                let frame = match order_event.status {
                    OrderEventStatus::Rejected => {
                        Frame::schema(&wire::reject_notice(order_event, remote))
                    }
                    OrderEventStatus::Filled => wire::exec_record(order_event, remote, side, price)
                        .and_then(|r| Frame::fixed(MessageType::RealtimeExec, &r)),
                    _ => wire::exec_record(order_event, remote, side, price)
                        .and_then(|r| Frame::fixed(MessageType::RealtimeOrderResult, &r)),
                };
                (frame, owner.map(|(conn, _)| conn))
            }
            BrokerEvent::Balance(balance) => (
                wire::balance_record(balance)
                    .and_then(|r| Frame::fixed(MessageType::RealtimeBalance, &r)),
                None,
            ),
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                error!("broker event not encodable: {}", e);
                return;
            }
        };
        match owner {
            Some(conn) => {
                if let Err(e) = self.pipe.send(conn, &frame).await {
                    debug!("{} for conn {} dropped: {}", frame.msg_type, conn, e);
                }
            }
            None => {
                self.pipe.broadcast(&frame).await;
            }
        }
    }

    /// Owning connection and caller id, plus the order's side and price
    fn owner_of(&self, event: &OrderEvent) -> (Option<(ConnectionId, String)>, Side, Decimal) {
        let order = event
            .client_order_id
            .as_deref()
            .and_then(|id| self.manager.order(id))
            .or_else(|| self.manager.order_by_broker_id(&event.broker_order_id));
        match order {
            Some(order) => {
                let owner = split_local_order_id(&order.client_order_id)
                    .map(|(conn, remote)| (conn, remote.to_string()));
                (owner, order.side, order.price)
            }
            None => (None, Side::Buy, Decimal::ZERO),
        }
    }
}

fn decode<T: SchemaMessage>(frame: &Frame) -> Result<T, String> {
    frame.decode_schema().map_err(|e| e.to_string())
}

fn respond_with<T: SchemaMessage>(sequence: u32, message: &T) -> Result<Frame, String> {
    let payload = message.encode().map_err(|e| e.to_string())?;
    Ok(Frame::response(sequence, T::MESSAGE_TYPE, payload))
}

fn ack(sequence: u32, message: String) -> Result<Frame, String> {
    respond_with(
        sequence,
        &AckMessage {
            ok: true,
            message: Some(message),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_order_id_round_trip() {
        let local = local_order_id(7, "ORD-000001");
        assert_eq!(local, "C7:ORD-000001");
        assert_eq!(split_local_order_id(&local), Some((7, "ORD-000001")));
        assert_eq!(split_local_order_id("C7:a:b"), Some((7, "a:b")));
    }

    #[test]
    fn test_foreign_ids_have_no_owner() {
        assert_eq!(split_local_order_id("ORD-000001"), None);
        assert_eq!(split_local_order_id("Cx:ORD-000001"), None);
    }
}
