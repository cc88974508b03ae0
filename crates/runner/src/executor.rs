//! Broker executor over the pipe
//!
//! Lets an `OrderLifecycleManager` run in the UI process: submissions become
//! order requests to the broker-side service, and the service's pushes are
//! turned back into typed broker events.

use crate::client::{BridgeClient, PushPayload, PushStream};
use crate::wire;
use async_trait::async_trait;
use bridge_core::{FailureCause, OrderKind, OrderStatus};
use bridge_gateway::protocol::schema::{
    OrderAckMessage, OrderCancelMessage, OrderModifyMessage, OrderRequestMessage,
};
use bridge_gateway::{GatewayError, ProtocolError};
use bridge_ports::{
    BrokerError, BrokerEvent, BrokerEventReceiver, BrokerExecutor, BrokerOrderRequest,
    BrokerResult, SubmitReceipt,
};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type EventSinks = Arc<Mutex<Vec<mpsc::UnboundedSender<BrokerEvent>>>>;

/// Map a pipe failure onto the broker error the order manager understands
pub fn broker_error(e: GatewayError) -> BrokerError {
    match e {
        GatewayError::Rejected(reason) => BrokerError::Rejected(reason),
        GatewayError::RequestTimeout { sequence, timeout } => {
            BrokerError::Timeout(format!("request {sequence} unanswered after {timeout:?}"))
        }
        other => BrokerError::Unavailable(other.to_string()),
    }
}

pub struct PipeExecutor {
    client: BridgeClient,
    sinks: EventSinks,
    pumps: Vec<JoinHandle<()>>,
}

impl PipeExecutor {
    /// Subscribes to order and balance pushes before returning, so nothing
    /// pushed afterwards is missed. Must be called from within a tokio
    /// runtime.
    pub fn new(client: BridgeClient) -> Self {
        let sinks: EventSinks = Arc::new(Mutex::new(Vec::new()));
        let pumps = vec![
            tokio::spawn(pump(client.executions(), sinks.clone(), |r| {
                wire::order_event(&r).map(BrokerEvent::Order)
            })),
            tokio::spawn(pump(client.order_results(), sinks.clone(), |r| {
                wire::order_event(&r).map(BrokerEvent::Order)
            })),
            tokio::spawn(pump(client.rejections(), sinks.clone(), |n| {
                Ok(BrokerEvent::Order(wire::rejected_event(&n)))
            })),
            tokio::spawn(pump(client.balances(), sinks.clone(), |r| {
                wire::balance_event(&r).map(BrokerEvent::Balance)
            })),
        ];
        Self {
            client,
            sinks,
            pumps,
        }
    }

    pub fn client(&self) -> &BridgeClient {
        &self.client
    }
}

impl Drop for PipeExecutor {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

async fn pump<T, F>(mut stream: PushStream<T>, sinks: EventSinks, convert: F)
where
    T: PushPayload,
    F: Fn(T) -> Result<BrokerEvent, ProtocolError>,
{
    loop {
        match stream.next().await {
            Ok(payload) => match convert(payload) {
                Ok(event) => sinks.lock().retain(|tx| tx.send(event.clone()).is_ok()),
                Err(e) => warn!("push not converted to a broker event: {}", e),
            },
            Err(e) => {
                debug!("push pump stopped: {}", e);
                break;
            }
        }
    }
}

/// A local failure on the broker side fails the order here too, with the
/// same cause. Anything else counts as handed off; a refusal that raced the
/// acknowledgement arrives as a pushed notice.
fn receipt(ack: OrderAckMessage) -> BrokerResult<SubmitReceipt> {
    if ack.status != OrderStatus::Failed {
        return Ok(SubmitReceipt {
            broker_order_id: ack.broker_order_id,
        });
    }
    let message = ack
        .message
        .unwrap_or_else(|| "order failed on the broker side".to_string());
    Err(match ack.failure {
        Some(FailureCause::ThrottleTimeout) => BrokerError::Throttled(message),
        Some(FailureCause::RequestTimeout) => BrokerError::Timeout(message),
        Some(FailureCause::Transport) | None => BrokerError::Unavailable(message),
    })
}

#[async_trait]
impl BrokerExecutor for PipeExecutor {
    async fn submit(&self, order: &BrokerOrderRequest) -> BrokerResult<SubmitReceipt> {
        let client_order_id = Some(order.client_order_id.clone());
        let ack = match &order.kind {
            OrderKind::New => {
                self.client
                    .submit_order(&OrderRequestMessage {
                        code: order.code.clone(),
                        side: order.side,
                        qty: order.qty,
                        price: order.price,
                        routing: order.routing,
                        client_order_id,
                        account: None,
                    })
                    .await
            }
            OrderKind::Modify { parent_broker_id } => {
                self.client
                    .modify_order(&OrderModifyMessage {
                        broker_order_id: parent_broker_id.clone(),
                        code: order.code.clone(),
                        side: order.side,
                        qty: order.qty,
                        price: order.price,
                        routing: order.routing,
                        client_order_id,
                    })
                    .await
            }
            OrderKind::Cancel { parent_broker_id } => {
                self.client
                    .cancel_order(&OrderCancelMessage {
                        broker_order_id: parent_broker_id.clone(),
                        code: order.code.clone(),
                        side: order.side,
                        qty: order.qty,
                        client_order_id,
                    })
                    .await
            }
        }
        .map_err(broker_error)?;
        receipt(ack)
    }

    fn event_stream(&self) -> BrokerEventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().push(tx);
        rx
    }

    fn name(&self) -> &str {
        "pipe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_gateway::TransportError;
    use std::time::Duration;

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            broker_error(GatewayError::Rejected("[RC4007] 주문가능금액 부족".into())),
            BrokerError::Rejected("[RC4007] 주문가능금액 부족".into())
        );
        assert!(matches!(
            broker_error(GatewayError::RequestTimeout {
                sequence: 9,
                timeout: Duration::from_secs(10)
            }),
            BrokerError::Timeout(_)
        ));
        assert!(matches!(
            broker_error(TransportError::ConnectionLost.into()),
            BrokerError::Unavailable(_)
        ));
    }

    fn failed_ack(failure: Option<FailureCause>) -> OrderAckMessage {
        OrderAckMessage {
            client_order_id: Some("ORD-000001".into()),
            broker_order_id: None,
            status: OrderStatus::Failed,
            failure,
            message: Some("slot or link trouble".into()),
        }
    }

    #[test]
    fn test_failed_ack_keeps_cause() {
        let reason = || "slot or link trouble".to_string();
        assert_eq!(
            receipt(failed_ack(Some(FailureCause::ThrottleTimeout))),
            Err(BrokerError::Throttled(reason()))
        );
        assert_eq!(
            receipt(failed_ack(Some(FailureCause::RequestTimeout))),
            Err(BrokerError::Timeout(reason()))
        );
        assert_eq!(
            receipt(failed_ack(Some(FailureCause::Transport))),
            Err(BrokerError::Unavailable(reason()))
        );
        assert_eq!(
            receipt(failed_ack(None)),
            Err(BrokerError::Unavailable(reason()))
        );
    }

    #[test]
    fn test_accepted_ack_binds_id() {
        let ack = OrderAckMessage {
            client_order_id: Some("ORD-000001".into()),
            broker_order_id: Some("0000001".into()),
            status: OrderStatus::Accepted,
            failure: None,
            message: None,
        };
        assert_eq!(receipt(ack).unwrap(), SubmitReceipt::bound("0000001"));
    }
}
