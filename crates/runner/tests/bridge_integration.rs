//! Integration test: UI-side client and order manager against a broker-side
//! bridge server backed by the paper broker, over a real pipe endpoint

#![cfg(unix)]

use bridge_core::{CandleInterval, OrderStatus, Side};
use bridge_gateway::GatewayError;
use bridge_gateway::protocol::schema::{CandleRequest, OrderRequestMessage};
use bridge_order_manager::{
    Error, FailureCause, ManagedOrder, NewOrder, OrderLifecycleManager, OrderManagerConfig,
    OrderRef, OrderUpdate, SubmissionThrottler, ThrottleConfig,
};
use bridge_ports::BrokerExecutor;
use bridge_runner::{BridgeClient, BridgeConfig, BridgeServer, PaperBroker, PaperConfig, PipeExecutor};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(3);

fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.pipe.pipe_name = format!("bridge-runner-{}", uuid::Uuid::new_v4().simple());
    config.pipe.reconnect_delay_ms = 50;
    config.pipe.reconnect_max_delay_ms = 200;
    config.pipe.request_timeout_ms = 2_000;
    config.throttle.capacity_per_second = 50;
    config
}

fn paper() -> PaperBroker {
    PaperBroker::new(PaperConfig {
        seed: Some(7),
        tick_interval_ms: 20,
        ack_delay_ms: 2,
        fill_delay_ms: 5,
        ..Default::default()
    })
}

fn start_server(config: &BridgeConfig, paper: &PaperBroker) -> BridgeServer {
    BridgeServer::start(
        config,
        Arc::new(paper.clone()),
        Arc::new(paper.clone()),
        Arc::new(paper.clone()),
    )
    .unwrap()
}

async fn connect(config: &BridgeConfig) -> BridgeClient {
    let client = BridgeClient::new(config.pipe.clone()).unwrap();
    client.connect().await.unwrap();
    client.wait_connected(WAIT).await.unwrap();
    client
}

/// UI-side order manager driving orders through the pipe
fn remote_manager(client: &BridgeClient) -> (Arc<OrderLifecycleManager>, JoinHandle<()>) {
    let executor = Arc::new(PipeExecutor::new(client.clone()));
    let events = executor.event_stream();
    let manager = Arc::new(OrderLifecycleManager::new(
        executor,
        Arc::new(SubmissionThrottler::new(&ThrottleConfig {
            capacity_per_second: 50,
            ..Default::default()
        })),
        OrderManagerConfig {
            client_id_prefix: "UI".into(),
            ..Default::default()
        },
    ));
    let event_loop = manager.spawn_event_loop(events);
    (manager, event_loop)
}

/// First value `matches` picks from the update stream, unless `current`
/// already has it
async fn await_update<T>(
    updates: &mut broadcast::Receiver<OrderUpdate>,
    current: impl Fn() -> Option<T>,
    matches: impl Fn(&OrderUpdate) -> Option<T>,
) -> T {
    if let Some(value) = current() {
        return value;
    }
    let wait = async {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    if let Some(value) = matches(&update) {
                        return value;
                    }
                }
                Err(RecvError::Lagged(_)) => {
                    if let Some(value) = current() {
                        return value;
                    }
                }
                Err(RecvError::Closed) => panic!("update stream closed"),
            }
        }
    };
    tokio::time::timeout(WAIT, wait)
        .await
        .expect("expected update never arrived")
}

async fn order_reaches(
    manager: &OrderLifecycleManager,
    updates: &mut broadcast::Receiver<OrderUpdate>,
    client_order_id: &str,
    status: OrderStatus,
) -> ManagedOrder {
    await_update(
        updates,
        || manager.order(client_order_id).filter(|o| o.status == status),
        |update| match update {
            OrderUpdate::Order(o) if o.client_order_id == client_order_id && o.status == status => {
                Some(o.clone())
            }
            _ => None,
        },
    )
    .await
}

#[tokio::test]
async fn test_service_calls_round_trip() {
    let _ = env_logger::try_init();
    let config = test_config();
    let paper = paper();
    let server = start_server(&config, &paper);
    let client = connect(&config).await;

    let rtt = client.heartbeat().await.unwrap();
    assert!(rtt < WAIT);

    let ack = client.subscribe(&["005930", "000660"]).await.unwrap();
    assert!(ack.ok);
    let mut ticks = client.ticks();
    let tick = tokio::time::timeout(WAIT, ticks.next()).await.unwrap().unwrap();
    assert!(tick.code.as_str().unwrap() == "005930" || tick.code.as_str().unwrap() == "000660");
    assert!(tick.price > 0);

    let candles = client
        .request_candles(&CandleRequest {
            code: "005930".into(),
            interval: CandleInterval::Day,
            count: 5,
            from: None,
            to: None,
        })
        .await
        .unwrap();
    assert_eq!(candles.len(), 5);
    assert!(candles.windows(2).all(|w| w[0].time < w[1].time));
    assert!(candles.iter().all(|c| c.low <= c.open && c.open <= c.high));

    let status = client.server_status().await.unwrap();
    assert_eq!(status.connected_clients, 1);
    assert_eq!(status.active_subscriptions, 2);
    assert!(status.broker_connected);

    client.unsubscribe(&["000660"]).await.unwrap();
    assert_eq!(client.server_status().await.unwrap().active_subscriptions, 1);

    client.stop().await;
    server.stop().await;
    paper.stop();
}

#[tokio::test]
async fn test_market_order_fills_through_pipe() {
    let _ = env_logger::try_init();
    let config = test_config();
    let paper = paper();
    let server = start_server(&config, &paper);
    let client = connect(&config).await;
    let (manager, event_loop) = remote_manager(&client);
    let mut updates = manager.subscribe_updates();

    let id = manager
        .submit(NewOrder::market("005930", Side::Buy, 10))
        .await
        .unwrap();
    let order = manager.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_qty, 10);
    assert_eq!(order.remaining_qty, 0);
    assert_eq!(order.fills.len(), 1);
    assert_eq!(order.avg_fill_price(), Some(dec!(71000)));
    assert!(order.broker_order_id.is_some());

    // Server keeps the same order under the connection-scoped id
    let local = server
        .manager()
        .order_by_broker_id(order.broker_order_id.as_deref().unwrap())
        .unwrap();
    assert!(local.client_order_id.ends_with(&format!(":{id}")));
    assert_eq!(local.status, OrderStatus::Filled);

    // Balance push follows the fill
    let position = await_update(
        &mut updates,
        || manager.position("005930").filter(|p| p.qty == 10),
        |update| match update {
            OrderUpdate::Position(p) if p.code == "005930" && p.qty == 10 => Some(p.clone()),
            _ => None,
        },
    )
    .await;
    assert_eq!(position.avg_price, dec!(71000));
    assert_eq!(paper.holding("005930"), 10);

    event_loop.abort();
    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_sell_without_holdings_is_rejected_verbatim() {
    let _ = env_logger::try_init();
    let config = test_config();
    let paper = paper();
    let server = start_server(&config, &paper);
    let client = connect(&config).await;
    let (manager, event_loop) = remote_manager(&client);
    let mut rejections = client.rejections();

    let id = manager
        .submit(NewOrder::limit("000660", Side::Sell, 3, dec!(180000)))
        .await
        .unwrap();
    let order = manager.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(order.status, OrderStatus::Rejected);
    assert_eq!(
        order.reject_reason.as_deref(),
        Some("[800033] 매도가능수량 부족 (가능 0, 주문 3)")
    );

    let notice = tokio::time::timeout(WAIT, rejections.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.client_order_id.as_deref(), Some(id.as_str()));
    assert_eq!(notice.reason, "[800033] 매도가능수량 부족 (가능 0, 주문 3)");

    event_loop.abort();
    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_invalid_order_is_refused_by_server() {
    let _ = env_logger::try_init();
    let config = test_config();
    let paper = paper();
    let server = start_server(&config, &paper);
    let client = connect(&config).await;

    let err = client
        .submit_order(&OrderRequestMessage {
            code: "005930".into(),
            side: Side::Buy,
            qty: 0,
            price: dec!(71000),
            routing: Default::default(),
            client_order_id: Some("RAW-1".into()),
            account: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Rejected(_)), "{err:?}");

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_modify_then_cancel_through_pipe() {
    let _ = env_logger::try_init();
    let config = test_config();
    let paper = paper();
    let server = start_server(&config, &paper);
    let client = connect(&config).await;
    let (manager, event_loop) = remote_manager(&client);
    let mut updates = manager.subscribe_updates();

    // Far below the market, so it keeps working
    let parent = manager
        .submit(NewOrder::limit("005930", Side::Buy, 10, dec!(60000)))
        .await
        .unwrap();
    order_reaches(&manager, &mut updates, &parent, OrderStatus::Accepted).await;

    let child = manager
        .modify(&OrderRef::client(&parent), 5, dec!(61000))
        .await
        .unwrap();
    order_reaches(&manager, &mut updates, &child, OrderStatus::Accepted).await;
    let parent_order = manager.wait_for_terminal(&parent, WAIT).await.unwrap();
    assert_eq!(parent_order.status, OrderStatus::Cancelled);

    let cancel = manager.cancel(&OrderRef::client(&child)).await.unwrap();
    let cancel_order = manager.wait_for_terminal(&cancel, WAIT).await.unwrap();
    assert_eq!(cancel_order.status, OrderStatus::Cancelled);
    let child_order = manager.wait_for_terminal(&child, WAIT).await.unwrap();
    assert_eq!(child_order.status, OrderStatus::Cancelled);
    assert_eq!(child_order.filled_qty, 0);
    assert_eq!(paper.working_orders(), 0);

    // A terminal parent cannot be cancelled again
    assert!(manager.cancel(&OrderRef::client(&child)).await.is_err());

    event_loop.abort();
    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_order_pushes_reach_only_the_owner() {
    let _ = env_logger::try_init();
    let config = test_config();
    let paper = paper();
    let server = start_server(&config, &paper);
    let owner = connect(&config).await;
    let bystander = connect(&config).await;
    let (manager, event_loop) = remote_manager(&owner);
    let mut foreign_fills = bystander.executions();
    let mut balances = bystander.balances();

    let id = manager
        .submit(NewOrder::market("005930", Side::Buy, 1))
        .await
        .unwrap();
    assert_eq!(
        manager.wait_for_terminal(&id, WAIT).await.unwrap().status,
        OrderStatus::Filled
    );

    // Balances go to everyone, executions only to the owner
    let balance = tokio::time::timeout(WAIT, balances.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(balance.qty, 1);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), foreign_fills.next())
            .await
            .is_err()
    );

    event_loop.abort();
    owner.stop().await;
    bystander.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_broker_side_throttle_timeout_keeps_its_cause() {
    let _ = env_logger::try_init();
    let mut config = test_config();
    config.throttle.capacity_per_second = 1;
    config.throttle.acquire_timeout_ms = 100;
    let paper = paper();
    let server = start_server(&config, &paper);
    let client = connect(&config).await;
    let (manager, event_loop) = remote_manager(&client);

    let first = manager
        .submit(NewOrder::limit("005930", Side::Buy, 1, dec!(60000)))
        .await
        .unwrap();
    let err = manager
        .submit(NewOrder::limit("005930", Side::Buy, 1, dec!(60000)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RemoteThrottleTimeout(_)), "{err:?}");

    let failed = manager.completed_orders();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, OrderStatus::Failed);
    assert_eq!(failed[0].failure, Some(FailureCause::ThrottleTimeout));
    assert!(!manager.order(&first).unwrap().is_terminal());

    // The broker side recorded the same cause
    let remote = server
        .manager()
        .completed_orders()
        .into_iter()
        .find(|o| o.status == OrderStatus::Failed)
        .unwrap();
    assert_eq!(remote.failure, Some(FailureCause::ThrottleTimeout));

    event_loop.abort();
    client.stop().await;
    server.stop().await;
}
