//! Order Manager Integration Test
//!
//! Drives the lifecycle manager against a scripted broker:
//! 1. Orders are throttled and handed to the broker
//! 2. Broker callbacks arrive on the event stream
//! 3. The manager reconciles them and reports terminal states

use async_trait::async_trait;
use bridge_core::{OrderKind, OrderStatus, RoutingHint, Side};
use bridge_order_manager::{
    Error, FailureCause, NewOrder, OrderLifecycleManager, OrderManagerConfig, OrderRef,
    OrderUpdate, SubmissionThrottler, ThrottleConfig,
};
use bridge_ports::{
    BalanceEvent, BrokerEvent, BrokerEventReceiver, BrokerExecutor, BrokerOrderRequest,
    BrokerResult, OrderEvent, SubmitReceipt,
};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Broker that records requests and lets the test emit callbacks
struct ScriptedBroker {
    requests: Mutex<Vec<BrokerOrderRequest>>,
    streams: Mutex<Vec<mpsc::UnboundedSender<BrokerEvent>>>,
    /// Return broker ids synchronously from `submit`
    sync_ids: bool,
    next_id: AtomicU64,
}

impl ScriptedBroker {
    fn new(sync_ids: bool) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            sync_ids,
            next_id: AtomicU64::new(1),
        })
    }

    fn emit(&self, event: BrokerEvent) {
        self.streams.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_order(&self, event: OrderEvent) {
        self.emit(BrokerEvent::Order(event));
    }

    fn requests(&self) -> Vec<BrokerOrderRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl BrokerExecutor for ScriptedBroker {
    async fn submit(&self, order: &BrokerOrderRequest) -> BrokerResult<SubmitReceipt> {
        self.requests.lock().push(order.clone());
        if self.sync_ids {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            Ok(SubmitReceipt::bound(format!("{:07}", n)))
        } else {
            Ok(SubmitReceipt::pending())
        }
    }

    fn event_stream(&self) -> BrokerEventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().push(tx);
        rx
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn start(broker: &Arc<ScriptedBroker>, throttle: ThrottleConfig) -> Arc<OrderLifecycleManager> {
    let _ = env_logger::builder().is_test(true).try_init();
    let manager = Arc::new(OrderLifecycleManager::new(
        broker.clone(),
        Arc::new(SubmissionThrottler::new(&throttle)),
        OrderManagerConfig::default(),
    ));
    manager.spawn_event_loop(broker.event_stream());
    manager
}

fn fast_throttle() -> ThrottleConfig {
    ThrottleConfig {
        capacity_per_second: 100,
        ..Default::default()
    }
}

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_order_fills_through_event_stream() {
    let broker = ScriptedBroker::new(true);
    let manager = start(&broker, fast_throttle());

    let id = manager
        .submit(NewOrder::limit("005930", Side::Buy, 10, dec!(70000)))
        .await
        .unwrap();
    let order = manager.order(&id).unwrap();
    assert_eq!(order.status, OrderStatus::Accepted);
    assert_eq!(order.broker_order_id.as_deref(), Some("0000001"));

    broker.emit_order(OrderEvent::fill("0000001", "005930", "F-1", dec!(70000), 3, 7));
    broker.emit_order(OrderEvent::fill("0000001", "005930", "F-2", dec!(70100), 7, 0));

    let done = manager.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(done.status, OrderStatus::Filled);
    assert_eq!(done.filled_qty, 10);
    assert_eq!(done.remaining_qty, 0);
    assert_eq!(done.fills.len(), 2);
    assert_eq!(done.avg_fill_price(), Some(dec!(70070)));
    assert!(done.latency().is_some());

    let sent = broker.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].client_order_id, id);
    assert_eq!(sent[0].kind, OrderKind::New);
}

#[tokio::test]
async fn test_market_order_partial_fills_average_by_quantity() {
    let broker = ScriptedBroker::new(true);
    let manager = start(&broker, fast_throttle());

    let id = manager
        .submit(NewOrder::market("005930", Side::Buy, 10))
        .await
        .unwrap();
    let sent = broker.requests();
    assert_eq!(sent[0].routing, RoutingHint::Market);
    assert_eq!(sent[0].price, dec!(0));

    broker.emit_order(OrderEvent::fill("0000001", "005930", "F-1", dec!(71000), 3, 7));
    broker.emit_order(OrderEvent::fill("0000001", "005930", "F-2", dec!(71100), 7, 0));

    let done = manager.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(done.status, OrderStatus::Filled);
    assert_eq!(done.filled_qty, 10);
    assert_eq!(done.remaining_qty, 0);
    assert_eq!(done.fills.iter().map(|f| f.qty).collect::<Vec<_>>(), vec![3, 7]);

    // (3 * 71000 + 7 * 71100) / 10, not the plain mean of the two prices
    let weighted = (dec!(71000) * dec!(3) + dec!(71100) * dec!(7)) / dec!(10);
    assert_eq!(weighted, dec!(71070));
    assert_eq!(done.avg_fill_price(), Some(weighted));
    assert_eq!(done.filled_amount, dec!(710700));
}

#[tokio::test]
async fn test_cancel_ends_parent_and_ignores_late_fill() {
    let broker = ScriptedBroker::new(true);
    let manager = start(&broker, fast_throttle());

    let parent = manager
        .submit(NewOrder::limit("005930", Side::Buy, 10, dec!(70000)))
        .await
        .unwrap();
    manager
        .handle_order_event(&OrderEvent::fill("0000001", "005930", "F-1", dec!(70000), 4, 6))
        .unwrap();

    let child = manager.cancel(&OrderRef::broker("0000001")).await.unwrap();
    let child_order = manager.order(&child).unwrap();
    assert_eq!(child_order.qty, 6);
    assert_eq!(
        child_order.kind,
        OrderKind::Cancel {
            parent_broker_id: "0000001".into()
        }
    );

    manager
        .handle_order_event(&OrderEvent::confirmed(
            "0000002",
            "005930",
            Some("0000001".into()),
            0,
        ))
        .unwrap();
    assert_eq!(manager.order(&child).unwrap().status, OrderStatus::Cancelled);
    let parent_order = manager.order(&parent).unwrap();
    assert_eq!(parent_order.status, OrderStatus::Cancelled);
    assert_eq!(parent_order.filled_qty, 4);

    let late = manager
        .handle_order_event(&OrderEvent::fill("0000001", "005930", "F-2", dec!(70000), 6, 0))
        .unwrap_err();
    assert!(matches!(late, Error::OrderTerminal { .. }));
    assert_eq!(manager.order(&parent).unwrap().filled_qty, 4);
}

#[tokio::test]
async fn test_modify_confirmation_replaces_parent() {
    // Broker ids only arrive with callbacks
    let broker = ScriptedBroker::new(false);
    let manager = start(&broker, fast_throttle());

    let parent = manager
        .submit(NewOrder::limit("005930", Side::Buy, 10, dec!(70000)))
        .await
        .unwrap();
    manager
        .handle_order_event(&OrderEvent::accepted("0000001", "005930", 10))
        .unwrap();
    assert_eq!(manager.order(&parent).unwrap().status, OrderStatus::Accepted);

    // An unrelated new order for the same code is also waiting for its id
    let other = manager
        .submit(NewOrder::limit("005930", Side::Buy, 1, dec!(69000)))
        .await
        .unwrap();

    let child = manager
        .modify(&OrderRef::client(&parent), 5, dec!(70500))
        .await
        .unwrap();
    assert_eq!(manager.order(&child).unwrap().price, dec!(70500));

    manager
        .handle_order_event(&OrderEvent::confirmed(
            "0000003",
            "005930",
            Some("0000001".into()),
            5,
        ))
        .unwrap();

    let child_order = manager.order(&child).unwrap();
    assert_eq!(child_order.status, OrderStatus::Accepted);
    assert_eq!(child_order.broker_order_id.as_deref(), Some("0000003"));
    assert_eq!(manager.order(&parent).unwrap().status, OrderStatus::Cancelled);
    assert_eq!(manager.order(&other).unwrap().status, OrderStatus::Submitted);
}

#[tokio::test]
async fn test_modify_and_cancel_need_bound_parent() {
    let broker = ScriptedBroker::new(false);
    let manager = start(&broker, fast_throttle());

    let id = manager
        .submit(NewOrder::limit("005930", Side::Buy, 10, dec!(70000)))
        .await
        .unwrap();

    assert_eq!(
        manager.cancel(&OrderRef::client(&id)).await.unwrap_err(),
        Error::ParentOrderNotFound(id.clone())
    );
    assert_eq!(
        manager
            .modify(&OrderRef::broker("9999999"), 1, dec!(70000))
            .await
            .unwrap_err(),
        Error::ParentOrderNotFound("9999999".into())
    );
    assert_eq!(broker.requests().len(), 1);
}

#[tokio::test]
async fn test_rejection_reason_is_verbatim() {
    let broker = ScriptedBroker::new(true);
    let manager = start(&broker, fast_throttle());

    let id = manager
        .submit(NewOrder::market("005930", Side::Sell, 100))
        .await
        .unwrap();
    let reason = "[00Z218] 모의투자 매도가능수량이 부족합니다";
    broker.emit_order(OrderEvent::rejected("0000001", "005930", reason));

    let done = manager.wait_for_terminal(&id, WAIT).await.unwrap();
    assert_eq!(done.status, OrderStatus::Rejected);
    assert_eq!(done.reject_reason.as_deref(), Some(reason));
    assert_eq!(manager.stats().rejected, 1);
}

#[tokio::test]
async fn test_correlation_id_routes_event_to_named_order() {
    let broker = ScriptedBroker::new(false);
    let manager = start(&broker, fast_throttle());

    let first = manager
        .submit(NewOrder::limit("000660", Side::Buy, 1, dec!(180000)))
        .await
        .unwrap();
    let second = manager
        .submit(NewOrder::limit("000660", Side::Buy, 1, dec!(181000)))
        .await
        .unwrap();

    broker.emit_order(
        OrderEvent::fill("0000042", "000660", "F-1", dec!(181000), 1, 0)
            .with_client_order_id(&second),
    );
    let done = manager.wait_for_terminal(&second, WAIT).await.unwrap();
    assert_eq!(done.broker_order_id.as_deref(), Some("0000042"));
    assert_eq!(manager.order(&first).unwrap().status, OrderStatus::Submitted);
}

#[tokio::test]
async fn test_event_for_unknown_order_is_rejected() {
    let broker = ScriptedBroker::new(true);
    let manager = start(&broker, fast_throttle());

    let err = manager
        .handle_order_event(&OrderEvent::accepted("0000777", "035720", 3))
        .unwrap_err();
    assert!(matches!(err, Error::Reconciliation { .. }));
    assert_eq!(manager.stats().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_timeout_fails_order() {
    let broker = ScriptedBroker::new(true);
    let manager = start(
        &broker,
        ThrottleConfig {
            capacity_per_second: 1,
            acquire_timeout_ms: 200,
            ..Default::default()
        },
    );

    manager
        .submit(NewOrder::market("005930", Side::Buy, 1))
        .await
        .unwrap();
    let err = manager
        .submit(NewOrder::market("005930", Side::Buy, 1))
        .await
        .unwrap_err();
    assert_eq!(err, Error::ThrottleTimeout(Duration::from_millis(200)));

    let failed = manager.completed_orders();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, OrderStatus::Failed);
    assert_eq!(failed[0].failure, Some(FailureCause::ThrottleTimeout));
    assert_eq!(broker.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_terminal_times_out() {
    let broker = ScriptedBroker::new(true);
    let manager = start(&broker, fast_throttle());

    let id = manager
        .submit(NewOrder::limit("005930", Side::Buy, 1, dec!(70000)))
        .await
        .unwrap();
    let err = manager
        .wait_for_terminal(&id, Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WaitTimeout { .. }));
    assert_eq!(
        manager
            .wait_for_terminal("ORD-999999", WAIT)
            .await
            .unwrap_err(),
        Error::UnknownOrder("ORD-999999".into())
    );
}

#[tokio::test]
async fn test_balance_updates_position_book() {
    let broker = ScriptedBroker::new(true);
    let manager = start(&broker, fast_throttle());
    let mut updates = manager.subscribe_updates();

    broker.emit(BrokerEvent::Balance(BalanceEvent {
        code: "005930".into(),
        qty: 10,
        avg_price: dec!(70070),
        total_buy_amount: dec!(700700),
        available_qty: 10,
        current_price: dec!(71000),
        profit_rate: dec!(1.33),
        time: Utc::now(),
    }));

    let update = tokio::time::timeout(WAIT, updates.recv())
        .await
        .unwrap()
        .unwrap();
    let OrderUpdate::Position(position) = update else {
        panic!("expected a position update, got {update:?}");
    };
    assert_eq!(position.qty, 10);
    assert_eq!(manager.position("005930").unwrap().market_value(), dec!(710000));
    assert_eq!(manager.positions().len(), 1);
}

#[tokio::test]
async fn test_updates_follow_status_order() {
    let broker = ScriptedBroker::new(true);
    let manager = start(&broker, fast_throttle());
    let mut updates = manager.subscribe_updates();

    let id = manager
        .submit(NewOrder::limit("005930", Side::Buy, 2, dec!(70000)))
        .await
        .unwrap();
    manager
        .handle_order_event(&OrderEvent::fill("0000001", "005930", "F-1", dec!(70000), 2, 0))
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(OrderUpdate::Order(order)) = updates.try_recv() {
        assert_eq!(order.client_order_id, id);
        seen.push(order.status);
    }
    assert_eq!(
        seen,
        vec![
            OrderStatus::Queued,
            OrderStatus::Submitted,
            OrderStatus::Accepted,
            OrderStatus::Filled
        ]
    );
}
