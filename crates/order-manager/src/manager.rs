//! Order Lifecycle Manager
//!
//! Owns the order table and drives every order through its state machine:
//! local creation, throttled hand-off to the broker, then reconciliation of
//! asynchronous broker events.
//!
//! Shared state is split so unrelated work never serializes on one lock:
//! the order table (both indices) sits under one `RwLock`, positions live in
//! a `DashMap`-backed book, and the throttler has its own window lock.

use crate::error::{Error, Result};
use crate::order::{ManagedOrder, NewOrder, OrderRef, OrderStats, OrderUpdate};
use crate::position::PositionBook;
use crate::throttle::SubmissionThrottler;
use bridge_core::{FailureCause, FillRecord, OrderKind, OrderStatus, Position, Quantity};
use bridge_ports::{
    BalanceEvent, BrokerError, BrokerEvent, BrokerEventReceiver, BrokerExecutor,
    BrokerOrderRequest, OrderEvent, OrderEventStatus,
};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Order manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderManagerConfig {
    /// Prefix of generated client ids (`ORD` gives `ORD-000001`)
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Capacity of the update broadcast channel
    #[serde(default = "default_update_capacity")]
    pub update_capacity: usize,
}

fn default_client_id_prefix() -> String {
    "ORD".to_string()
}

fn default_update_capacity() -> usize {
    1_024
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            client_id_prefix: default_client_id_prefix(),
            update_capacity: default_update_capacity(),
        }
    }
}

struct OrderEntry {
    order: ManagedOrder,
    /// Creation sequence, orders reconciliation candidates oldest first
    seq: u64,
    status_tx: watch::Sender<OrderStatus>,
}

#[derive(Default)]
struct OrderTable {
    by_client: HashMap<String, OrderEntry>,
    by_broker: HashMap<String, String>,
}

impl OrderTable {
    fn resolve(&self, order_ref: &OrderRef) -> Option<&OrderEntry> {
        match order_ref {
            OrderRef::Client(id) => self.by_client.get(id),
            OrderRef::Broker(id) => self
                .by_broker
                .get(id)
                .and_then(|client_id| self.by_client.get(client_id)),
        }
    }

    fn bind(&mut self, client_order_id: &str, broker_order_id: &str) {
        let Some(entry) = self.by_client.get_mut(client_order_id) else {
            return;
        };
        match &entry.order.broker_order_id {
            Some(existing) if existing == broker_order_id => {}
            Some(existing) => warn!(
                "order {} already bound to {}, ignoring {}",
                client_order_id, existing, broker_order_id
            ),
            None => {
                debug!("binding {} -> {}", broker_order_id, client_order_id);
                entry.order.broker_order_id = Some(broker_order_id.to_string());
                self.by_broker
                    .insert(broker_order_id.to_string(), client_order_id.to_string());
            }
        }
    }

    /// Find the local order an event belongs to, binding its broker id on
    /// first sight.
    fn reconcile(&mut self, event: &OrderEvent) -> Result<String> {
        if let Some(client_id) = self.by_broker.get(&event.broker_order_id) {
            return Ok(client_id.clone());
        }

        if let Some(client_id) = &event.client_order_id {
            if self.by_client.contains_key(client_id) {
                let client_id = client_id.clone();
                self.bind(&client_id, &event.broker_order_id);
                return Ok(client_id);
            }
        }

        // No correlation id: oldest unbound Submitted order for the instrument.
        // A confirmation names its parent, which narrows the candidates to the
        // modify/cancel requests acting on that parent.
        let mut candidates: Vec<(&String, u64)> = self
            .by_client
            .iter()
            .filter(|(_, e)| {
                e.order.status == OrderStatus::Submitted
                    && e.order.broker_order_id.is_none()
                    && e.order.code == event.code
            })
            .filter(|(_, e)| match &event.original_order_id {
                Some(parent) if event.status == OrderEventStatus::Confirmed => {
                    e.order.kind.parent_broker_id() == Some(parent.as_str())
                }
                _ => true,
            })
            .map(|(id, e)| (id, e.seq))
            .collect();
        candidates.sort_by_key(|(_, seq)| *seq);

        let Some((client_id, _)) = candidates.first() else {
            return Err(Error::Reconciliation {
                broker_order_id: event.broker_order_id.clone(),
                code: event.code.clone(),
                reason: "no submitted order awaiting a broker id".into(),
            });
        };
        if candidates.len() > 1 {
            warn!(
                "{} submitted orders for {} await a broker id; binding {} to oldest {}",
                candidates.len(),
                event.code,
                event.broker_order_id,
                client_id
            );
        }
        let client_id = (*client_id).clone();
        self.bind(&client_id, &event.broker_order_id);
        Ok(client_id)
    }
}

pub struct OrderLifecycleManager {
    config: OrderManagerConfig,
    broker: Arc<dyn BrokerExecutor>,
    throttler: Arc<SubmissionThrottler>,
    orders: RwLock<OrderTable>,
    positions: PositionBook,
    updates: broadcast::Sender<OrderUpdate>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

impl OrderLifecycleManager {
    pub fn new(
        broker: Arc<dyn BrokerExecutor>,
        throttler: Arc<SubmissionThrottler>,
        config: OrderManagerConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(config.update_capacity.max(1));
        Self {
            config,
            broker,
            throttler,
            orders: RwLock::new(OrderTable::default()),
            positions: PositionBook::new(),
            updates,
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn throttler(&self) -> &Arc<SubmissionThrottler> {
        &self.throttler
    }

    /// Consume broker events on a background task until the stream ends
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: BrokerEventReceiver) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = manager.handle_event(&event) {
                    debug!("broker event not applied: {}", e);
                }
            }
            info!("{} event stream closed", manager.broker.name());
        })
    }

    fn next_client_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:06}", self.config.client_id_prefix, n)
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Submit a new order. Returns its client id once the broker has taken
    /// the hand-off; fills and confirmations arrive later as events.
    pub async fn submit(&self, order: NewOrder) -> Result<String> {
        validate(&order)?;
        let client_id = self.create(OrderKind::New, &order)?;
        self.dispatch(&client_id).await?;
        Ok(client_id)
    }

    /// Replace quantity and price of a working order
    pub async fn modify(&self, parent: &OrderRef, qty: Quantity, price: Decimal) -> Result<String> {
        self.modify_with_id(parent, qty, price, None).await
    }

    /// `modify` with a caller-chosen id for the request
    pub async fn modify_with_id(
        &self,
        parent: &OrderRef,
        qty: Quantity,
        price: Decimal,
        client_order_id: Option<String>,
    ) -> Result<String> {
        let (parent_broker_id, template) = self.parent_for(parent)?;
        let order = NewOrder {
            qty,
            price,
            client_order_id,
            ..template
        };
        validate(&order)?;
        let client_id = self.create(OrderKind::Modify { parent_broker_id }, &order)?;
        self.dispatch(&client_id).await?;
        Ok(client_id)
    }

    /// Cancel the remaining quantity of a working order
    pub async fn cancel(&self, parent: &OrderRef) -> Result<String> {
        self.cancel_with_id(parent, None).await
    }

    pub async fn cancel_with_id(
        &self,
        parent: &OrderRef,
        client_order_id: Option<String>,
    ) -> Result<String> {
        let (parent_broker_id, template) = self.parent_for(parent)?;
        let order = NewOrder {
            price: Decimal::ZERO,
            client_order_id,
            ..template
        };
        let client_id = self.create(OrderKind::Cancel { parent_broker_id }, &order)?;
        self.dispatch(&client_id).await?;
        Ok(client_id)
    }

    /// Broker id and order template of a live parent
    fn parent_for(&self, parent: &OrderRef) -> Result<(String, NewOrder)> {
        let table = self.orders.read();
        let Some(entry) = table.resolve(parent) else {
            return Err(match parent {
                OrderRef::Broker(id) => Error::ParentOrderNotFound(id.clone()),
                OrderRef::Client(id) => Error::UnknownOrder(id.clone()),
            });
        };
        let order = &entry.order;
        if order.is_terminal() {
            return Err(Error::OrderTerminal {
                client_order_id: order.client_order_id.clone(),
                status: order.status,
            });
        }
        let Some(broker_id) = order.broker_order_id.clone() else {
            return Err(Error::ParentOrderNotFound(order.client_order_id.clone()));
        };
        Ok((
            broker_id,
            NewOrder {
                code: order.code.clone(),
                side: order.side,
                qty: order.remaining_qty,
                price: order.price,
                routing: order.routing,
                client_order_id: None,
            },
        ))
    }

    /// Insert a `Queued` record
    fn create(&self, kind: OrderKind, order: &NewOrder) -> Result<String> {
        let client_id = match &order.client_order_id {
            Some(id) => id.clone(),
            None => self.next_client_id(),
        };
        let managed = ManagedOrder::new(client_id.clone(), kind, order);
        let (status_tx, _) = watch::channel(OrderStatus::Queued);
        {
            let mut table = self.orders.write();
            if table.by_client.contains_key(&client_id) {
                return Err(Error::InvalidOrder(format!(
                    "client order id {client_id} already in use"
                )));
            }
            table.by_client.insert(
                client_id.clone(),
                OrderEntry {
                    order: managed.clone(),
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    status_tx,
                },
            );
        }
        info!(
            "order {} queued: {:?} {} {:?} {} @ {}",
            client_id, managed.kind, managed.code, managed.side, managed.qty, managed.price
        );
        self.publish(managed);
        Ok(client_id)
    }

    /// Throttle, hand to the broker and record the outcome
    async fn dispatch(&self, client_id: &str) -> Result<()> {
        if let Err(e) = self.throttler.acquire().await {
            warn!("order {} not sent: {}", client_id, e);
            self.update(client_id, |o| o.fail(FailureCause::ThrottleTimeout));
            return Err(e);
        }

        let Some(request) = self.update(client_id, |o| o.transition(OrderStatus::Submitted))
        else {
            return Err(Error::UnknownOrder(client_id.to_string()));
        };
        let request = BrokerOrderRequest {
            client_order_id: request.client_order_id,
            code: request.code,
            side: request.side,
            kind: request.kind,
            qty: request.qty,
            price: request.price,
            routing: request.routing,
        };

        match self.broker.submit(&request).await {
            Ok(receipt) => {
                if let Some(broker_id) = receipt.broker_order_id {
                    self.orders.write().bind(client_id, &broker_id);
                    self.update(client_id, |o| {
                        if o.status == OrderStatus::Submitted {
                            o.transition(OrderStatus::Accepted);
                        }
                    });
                }
                Ok(())
            }
            Err(e) => {
                warn!("order {} refused by {}: {}", client_id, self.broker.name(), e);
                match &e {
                    BrokerError::Rejected(reason) => {
                        let reason = reason.clone();
                        self.update(client_id, |o| o.reject(reason));
                    }
                    BrokerError::Throttled(_) => {
                        self.update(client_id, |o| o.fail(FailureCause::ThrottleTimeout));
                    }
                    BrokerError::Unavailable(_) => {
                        self.update(client_id, |o| o.fail(FailureCause::Transport));
                    }
                    BrokerError::Timeout(_) => {
                        self.update(client_id, |o| o.fail(FailureCause::RequestTimeout));
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Mutate one order unless it is terminal, then notify watchers.
    /// Returns the updated snapshot.
    fn update<F>(&self, client_id: &str, f: F) -> Option<ManagedOrder>
    where
        F: FnOnce(&mut ManagedOrder),
    {
        let snapshot = {
            let mut table = self.orders.write();
            let entry = table.by_client.get_mut(client_id)?;
            if entry.order.is_terminal() {
                return Some(entry.order.clone());
            }
            f(&mut entry.order);
            entry.status_tx.send_replace(entry.order.status);
            entry.order.clone()
        };
        self.publish(snapshot.clone());
        Some(snapshot)
    }

    fn publish(&self, order: ManagedOrder) {
        // No subscribers is fine
        let _ = self.updates.send(OrderUpdate::Order(order));
    }

    // ------------------------------------------------------------------
    // Broker events
    // ------------------------------------------------------------------

    pub fn handle_event(&self, event: &BrokerEvent) -> Result<()> {
        match event {
            BrokerEvent::Order(order_event) => self.handle_order_event(order_event),
            BrokerEvent::Balance(balance) => {
                self.handle_balance(balance);
                Ok(())
            }
        }
    }

    pub fn handle_balance(&self, event: &BalanceEvent) -> Position {
        let position = self.positions.apply_balance(event);
        debug!(
            "position {} qty={} avg={}",
            position.code, position.qty, position.avg_price
        );
        let _ = self.updates.send(OrderUpdate::Position(position.clone()));
        position
    }

    pub fn handle_order_event(&self, event: &OrderEvent) -> Result<()> {
        let mut changed = Vec::new();
        let result = {
            let mut table = self.orders.write();
            match table.reconcile(event) {
                Ok(client_id) => apply_event(&mut *table, &client_id, event, &mut changed),
                Err(e) => Err(e),
            }
        };

        for order in changed {
            self.publish(order);
        }
        match &result {
            Err(e @ Error::Reconciliation { .. }) => error!("{}", e),
            Err(e) => debug!("{}", e),
            Ok(()) => {}
        }
        result
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn order(&self, client_order_id: &str) -> Option<ManagedOrder> {
        self.orders
            .read()
            .by_client
            .get(client_order_id)
            .map(|e| e.order.clone())
    }

    pub fn order_by_broker_id(&self, broker_order_id: &str) -> Option<ManagedOrder> {
        self.orders
            .read()
            .resolve(&OrderRef::Broker(broker_order_id.to_string()))
            .map(|e| e.order.clone())
    }

    /// Orders not yet terminal, oldest first
    pub fn active_orders(&self) -> Vec<ManagedOrder> {
        self.collect(|o| !o.is_terminal())
    }

    /// Terminal orders, oldest first
    pub fn completed_orders(&self) -> Vec<ManagedOrder> {
        self.collect(ManagedOrder::is_terminal)
    }

    fn collect(&self, keep: impl Fn(&ManagedOrder) -> bool) -> Vec<ManagedOrder> {
        let table = self.orders.read();
        let mut entries: Vec<_> = table
            .by_client
            .values()
            .filter(|e| keep(&e.order))
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.order.clone()).collect()
    }

    pub fn position(&self, code: &str) -> Option<Position> {
        self.positions.get(code)
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.all()
    }

    pub fn stats(&self) -> OrderStats {
        let table = self.orders.read();
        let mut stats = OrderStats {
            total: table.by_client.len() as u64,
            ..Default::default()
        };
        for entry in table.by_client.values() {
            match entry.order.status {
                OrderStatus::Filled => stats.filled += 1,
                OrderStatus::Cancelled => stats.cancelled += 1,
                OrderStatus::Rejected => stats.rejected += 1,
                OrderStatus::Failed => stats.failed += 1,
                _ => stats.active += 1,
            }
        }
        stats
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<OrderUpdate> {
        self.updates.subscribe()
    }

    /// Resolve once the order reaches a terminal state
    pub async fn wait_for_terminal(
        &self,
        client_order_id: &str,
        timeout: Duration,
    ) -> Result<ManagedOrder> {
        let mut rx = self
            .orders
            .read()
            .by_client
            .get(client_order_id)
            .map(|e| e.status_tx.subscribe())
            .ok_or_else(|| Error::UnknownOrder(client_order_id.to_string()))?;

        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_terminal()))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => self
                .order(client_order_id)
                .ok_or_else(|| Error::UnknownOrder(client_order_id.to_string())),
            Ok(Err(_)) => Err(Error::UnknownOrder(client_order_id.to_string())),
            Err(_) => Err(Error::WaitTimeout {
                client_order_id: client_order_id.to_string(),
                timeout,
            }),
        }
    }
}

fn validate(order: &NewOrder) -> Result<()> {
    if order.code.trim().is_empty() {
        return Err(Error::InvalidOrder("instrument code is empty".into()));
    }
    if order.qty == 0 {
        return Err(Error::InvalidOrder("quantity must be positive".into()));
    }
    if order.price.is_sign_negative() {
        return Err(Error::InvalidOrder(format!("negative price {}", order.price)));
    }
    Ok(())
}

/// Apply a reconciled event to its order (and its parent, for
/// confirmations). Changed snapshots are pushed onto `changed`.
fn apply_event(
    table: &mut OrderTable,
    client_id: &str,
    event: &OrderEvent,
    changed: &mut Vec<ManagedOrder>,
) -> Result<()> {
    let Some(entry) = table.by_client.get_mut(client_id) else {
        return Err(Error::UnknownOrder(client_id.to_string()));
    };
    let order = &mut entry.order;
    if order.is_terminal() {
        return Err(Error::OrderTerminal {
            client_order_id: client_id.to_string(),
            status: order.status,
        });
    }

    let mut parent_to_cancel = None;
    match event.status {
        OrderEventStatus::Accepted => {
            if matches!(order.status, OrderStatus::Queued | OrderStatus::Submitted) {
                order.transition(OrderStatus::Accepted);
            }
            if event.remaining_qty > 0 && order.fills.is_empty() {
                order.remaining_qty = event.remaining_qty;
            }
        }
        OrderEventStatus::Filled => {
            let fill_id = event
                .fill_id
                .clone()
                .unwrap_or_else(|| format!("{}-{}", event.broker_order_id, order.fills.len() + 1));
            if order.has_fill(&fill_id) {
                debug!("duplicate fill {} on {}", fill_id, client_id);
                return Ok(());
            }
            let fill = FillRecord::new(fill_id, event.filled_price, event.filled_qty, event.time);
            order.apply_fill(fill, event.remaining_qty);
            info!(
                "order {} filled {} @ {} (total {}, remaining {})",
                client_id, event.filled_qty, event.filled_price, order.filled_qty, order.remaining_qty
            );
        }
        OrderEventStatus::Confirmed => match order.kind.clone() {
            OrderKind::Cancel { parent_broker_id } => {
                order.transition(OrderStatus::Cancelled);
                parent_to_cancel = Some(parent_broker_id);
            }
            OrderKind::Modify { parent_broker_id } => {
                order.transition(OrderStatus::Accepted);
                parent_to_cancel = Some(parent_broker_id);
            }
            OrderKind::New => order.transition(OrderStatus::Cancelled),
        },
        OrderEventStatus::Rejected => {
            order.reject(event.reject_reason.clone().unwrap_or_default());
        }
    }
    entry.status_tx.send_replace(order.status);
    changed.push(order.clone());

    if let Some(parent_broker_id) = parent_to_cancel {
        let parent_client = table.by_broker.get(&parent_broker_id).cloned();
        match parent_client.and_then(|id| table.by_client.get_mut(&id)) {
            Some(parent) if !parent.order.is_terminal() && parent.order.remaining_qty > 0 => {
                parent.order.transition(OrderStatus::Cancelled);
                parent.status_tx.send_replace(parent.order.status);
                changed.push(parent.order.clone());
            }
            Some(parent) => debug!(
                "parent {} already {:?}, confirmation leaves it unchanged",
                parent.order.client_order_id, parent.order.status
            ),
            None => warn!("confirmation names unknown parent {}", parent_broker_id),
        }
    }
    Ok(())
}
