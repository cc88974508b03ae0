//! Paper broker
//!
//! In-process stand-in for the proprietary broker adapter. Acknowledges
//! orders asynchronously, fills them against a random-walk price, keeps
//! holdings and reports balances, and serves ticks and synthetic candles.
//!
//! Fill rule: market orders fill at the last price; limit orders fill at the
//! last price once it crosses their limit, otherwise they stay working until
//! a later tick crosses or a cancel removes them.

use async_trait::async_trait;
use bridge_core::{Candle, CandleInterval, OrderKind, Price, Quantity, Side};
use bridge_ports::{
    BalanceEvent, BrokerError, BrokerEvent, BrokerEventReceiver, BrokerExecutor,
    BrokerOrderRequest, BrokerResult, CandleProvider, MarketDataFeed, OrderEvent, SubmitReceipt,
    TickReceiver, TickUpdate,
};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const MAX_CANDLES: usize = 10_000;

/// Paper broker configuration
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Starting price per instrument code
    pub initial_prices: HashMap<String, i32>,
    /// Starting price for codes not listed above
    pub default_price: i32,
    /// Relative step of the random walk (0.002 = 0.2% per tick)
    pub volatility: f64,
    pub tick_interval_ms: u64,
    /// Delay before an order is acknowledged
    pub ack_delay_ms: u64,
    /// Delay between acknowledgement and the first fill attempt
    pub fill_delay_ms: u64,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        let mut initial_prices = HashMap::new();
        initial_prices.insert("005930".to_string(), 71_000);
        initial_prices.insert("000660".to_string(), 180_000);

        Self {
            initial_prices,
            default_price: 10_000,
            volatility: 0.002,
            tick_interval_ms: 500,
            ack_delay_ms: 5,
            fill_delay_ms: 20,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
struct WorkingOrder {
    broker_order_id: String,
    client_order_id: String,
    code: String,
    side: Side,
    qty: Quantity,
    /// Zero means market
    price: Price,
}

impl WorkingOrder {
    fn is_marketable(&self, last: i32) -> bool {
        let last = Decimal::from(last);
        self.price.is_zero()
            || match self.side {
                Side::Buy => self.price >= last,
                Side::Sell => self.price <= last,
            }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Holding {
    qty: Quantity,
    total_buy: Decimal,
}

impl Holding {
    fn avg_price(&self) -> Decimal {
        if self.qty == 0 {
            Decimal::ZERO
        } else {
            (self.total_buy / Decimal::from(self.qty)).round_dp(2)
        }
    }
}

struct PaperInner {
    config: PaperConfig,
    next_order_no: AtomicU64,
    next_fill_no: AtomicU64,
    prices: Mutex<HashMap<String, i32>>,
    rng: Mutex<StdRng>,
    working: Mutex<HashMap<String, WorkingOrder>>,
    holdings: DashMap<String, Holding>,
    subscriptions: Mutex<HashSet<String>>,
    streams: Mutex<Vec<mpsc::UnboundedSender<BrokerEvent>>>,
    ticks: broadcast::Sender<TickUpdate>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable paper broker handle
#[derive(Clone)]
pub struct PaperBroker {
    inner: Arc<PaperInner>,
}

impl PaperBroker {
    pub fn new(config: PaperConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (ticks, _) = broadcast::channel(1_000);
        Self {
            inner: Arc::new(PaperInner {
                prices: Mutex::new(config.initial_prices.clone()),
                config,
                next_order_no: AtomicU64::new(1),
                next_fill_no: AtomicU64::new(1),
                rng: Mutex::new(rng),
                working: Mutex::new(HashMap::new()),
                holdings: DashMap::new(),
                subscriptions: Mutex::new(HashSet::new()),
                streams: Mutex::new(Vec::new()),
                ticks,
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn last_price(&self, code: &str) -> i32 {
        self.inner.last_price(code)
    }

    /// Pin the price of `code` and fill whatever now crosses
    pub fn set_price(&self, code: &str, price: i32) {
        self.inner.prices.lock().insert(code.to_string(), price.max(1));
        self.inner.match_working(code);
    }

    /// Seed a holding, e.g. so sells have something to sell
    pub fn deposit(&self, code: &str, qty: Quantity, avg_price: Price) {
        self.inner.holdings.insert(
            code.to_string(),
            Holding {
                qty,
                total_buy: avg_price * Decimal::from(qty),
            },
        );
    }

    pub fn holding(&self, code: &str) -> Quantity {
        self.inner.holdings.get(code).map_or(0, |h| h.qty)
    }

    pub fn working_orders(&self) -> usize {
        self.inner.working.lock().len()
    }

    /// Advance the walk one step for `code`, publish the tick and fill
    /// crossing orders
    pub fn tick(&self, code: &str) -> TickUpdate {
        self.inner.tick(code)
    }

    /// Stop the background ticker
    pub fn stop(&self) {
        if let Some(task) = self.inner.ticker.lock().take() {
            task.abort();
        }
    }

    fn ensure_ticker(&self) {
        let mut ticker = self.inner.ticker.lock();
        if ticker.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let interval = Duration::from_millis(self.inner.config.tick_interval_ms.max(1));
        *ticker = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                let codes: Vec<String> = inner.subscriptions.lock().iter().cloned().collect();
                for code in codes {
                    inner.tick(&code);
                }
            }
        }));
    }
}

impl PaperInner {
    fn last_price(&self, code: &str) -> i32 {
        *self
            .prices
            .lock()
            .entry(code.to_string())
            .or_insert(self.config.default_price)
    }

    fn walk(&self, price: i32) -> i32 {
        let step: f64 = self.rng.lock().gen_range(-1.0..1.0);
        let next = (price as f64 * (1.0 + self.config.volatility * step)).round();
        (next as i32).max(1)
    }

    fn tick(&self, code: &str) -> TickUpdate {
        let last = self.last_price(code);
        let price = self.walk(last);
        self.prices.lock().insert(code.to_string(), price);

        let tick = TickUpdate {
            code: code.to_string(),
            time: Utc::now(),
            price,
            open: last,
            high: price.max(last),
            low: price.min(last),
            prev_close: last,
            volume: self.rng.lock().gen_range(1..1_000),
        };
        // No subscribers is ok
        let _ = self.ticks.send(tick.clone());
        self.match_working(code);
        tick
    }

    fn emit(&self, event: BrokerEvent) {
        self.streams.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_later(self: &Arc<Self>, delay: Duration, event: OrderEvent) {
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.emit(BrokerEvent::Order(event));
        });
    }

    /// Acknowledge (or confirm) after the ack delay, then try to fill
    fn work(self: &Arc<Self>, order: WorkingOrder, ack: OrderEvent) {
        let inner = self.clone();
        let ack_delay = Duration::from_millis(self.config.ack_delay_ms);
        let fill_delay = Duration::from_millis(self.config.fill_delay_ms);
        let code = order.code.clone();
        self.working
            .lock()
            .insert(order.broker_order_id.clone(), order);
        tokio::spawn(async move {
            tokio::time::sleep(ack_delay).await;
            inner.emit(BrokerEvent::Order(ack));
            tokio::time::sleep(fill_delay).await;
            inner.match_working(&code);
        });
    }

    /// Fill every working order on `code` the last price crosses
    fn match_working(&self, code: &str) {
        let last = self.last_price(code);
        let crossing: Vec<WorkingOrder> = {
            let mut working = self.working.lock();
            let ids: Vec<String> = working
                .values()
                .filter(|o| o.code == code && o.is_marketable(last))
                .map(|o| o.broker_order_id.clone())
                .collect();
            ids.iter().filter_map(|id| working.remove(id)).collect()
        };
        for order in crossing {
            self.fill(order, last);
        }
    }

    fn fill(&self, order: WorkingOrder, price: i32) {
        let fill_no = format!("F{:07}", self.next_fill_no.fetch_add(1, Ordering::Relaxed));
        let price = Decimal::from(price);
        let holding = {
            let mut holding = self.holdings.entry(order.code.clone()).or_default();
            match order.side {
                Side::Buy => {
                    holding.qty += order.qty;
                    holding.total_buy += price * Decimal::from(order.qty);
                }
                Side::Sell => {
                    let avg = holding.avg_price();
                    let qty = order.qty.min(holding.qty);
                    holding.qty -= qty;
                    holding.total_buy -= avg * Decimal::from(qty);
                    if holding.qty == 0 {
                        holding.total_buy = Decimal::ZERO;
                    }
                }
            }
            *holding
        };
        info!(
            "paper fill {} {:?} {} {} @ {}",
            order.broker_order_id, order.side, order.code, order.qty, price
        );

        self.emit(BrokerEvent::Order(
            OrderEvent::fill(
                order.broker_order_id.clone(),
                order.code.clone(),
                fill_no,
                price,
                order.qty,
                0,
            )
            .with_client_order_id(order.client_order_id.clone()),
        ));

        let avg = holding.avg_price();
        let profit_rate = if avg.is_zero() {
            Decimal::ZERO
        } else {
            ((price - avg) / avg * Decimal::ONE_HUNDRED).round_dp(2)
        };
        self.emit(BrokerEvent::Balance(BalanceEvent {
            code: order.code,
            qty: holding.qty,
            avg_price: avg,
            total_buy_amount: holding.total_buy,
            available_qty: holding.qty,
            current_price: price,
            profit_rate,
            time: Utc::now(),
        }));
    }

    fn reject_later(self: &Arc<Self>, order: &BrokerOrderRequest, broker_id: &str, reason: String) {
        debug!("paper reject {}: {}", broker_id, reason);
        let event = OrderEvent::rejected(broker_id, order.code.clone(), reason)
            .with_client_order_id(order.client_order_id.clone());
        self.emit_later(Duration::from_millis(self.config.ack_delay_ms), event);
    }
}

#[async_trait]
impl BrokerExecutor for PaperBroker {
    async fn submit(&self, order: &BrokerOrderRequest) -> BrokerResult<SubmitReceipt> {
        if order.qty == 0 && !matches!(order.kind, OrderKind::Cancel { .. }) {
            return Err(BrokerError::Rejected("주문수량이 없습니다".into()));
        }
        let inner = &self.inner;
        let broker_id = format!("{:07}", inner.next_order_no.fetch_add(1, Ordering::Relaxed));

        match &order.kind {
            OrderKind::New => {
                if order.side == Side::Sell {
                    let held = self.holding(&order.code);
                    if held < order.qty {
                        inner.reject_later(
                            order,
                            &broker_id,
                            format!("[800033] 매도가능수량 부족 (가능 {held}, 주문 {})", order.qty),
                        );
                        return Ok(SubmitReceipt::bound(broker_id));
                    }
                }
                let working = WorkingOrder {
                    broker_order_id: broker_id.clone(),
                    client_order_id: order.client_order_id.clone(),
                    code: order.code.clone(),
                    side: order.side,
                    qty: order.qty,
                    price: order.price,
                };
                let ack = OrderEvent::accepted(broker_id.clone(), order.code.clone(), order.qty)
                    .with_client_order_id(order.client_order_id.clone());
                inner.work(working, ack);
            }
            OrderKind::Modify { parent_broker_id } | OrderKind::Cancel { parent_broker_id } => {
                let Some(parent) = inner.working.lock().remove(parent_broker_id) else {
                    inner.reject_later(
                        order,
                        &broker_id,
                        format!("[800100] 원주문번호 {parent_broker_id} 정정/취소 가능수량 없음"),
                    );
                    return Ok(SubmitReceipt::bound(broker_id));
                };
                let is_cancel = matches!(order.kind, OrderKind::Cancel { .. });
                let remaining = if is_cancel { 0 } else { order.qty };
                let confirm = OrderEvent::confirmed(
                    broker_id.clone(),
                    order.code.clone(),
                    Some(parent_broker_id.clone()),
                    remaining,
                )
                .with_client_order_id(order.client_order_id.clone());
                if is_cancel {
                    inner.emit_later(Duration::from_millis(inner.config.ack_delay_ms), confirm);
                } else {
                    let replacement = WorkingOrder {
                        broker_order_id: broker_id.clone(),
                        client_order_id: order.client_order_id.clone(),
                        price: order.price,
                        qty: order.qty,
                        ..parent
                    };
                    inner.work(replacement, confirm);
                }
            }
        }
        Ok(SubmitReceipt::bound(broker_id))
    }

    fn event_stream(&self) -> BrokerEventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.streams.lock().push(tx);
        rx
    }

    fn name(&self) -> &str {
        "paper"
    }
}

#[async_trait]
impl MarketDataFeed for PaperBroker {
    async fn subscribe(&self, code: &str) -> BrokerResult<()> {
        if code.is_empty() {
            return Err(BrokerError::Rejected("empty instrument code".into()));
        }
        if self.inner.subscriptions.lock().insert(code.to_string()) {
            info!("paper feed subscribed {}", code);
        }
        self.ensure_ticker();
        Ok(())
    }

    async fn unsubscribe(&self, code: &str) -> BrokerResult<()> {
        if self.inner.subscriptions.lock().remove(code) {
            info!("paper feed unsubscribed {}", code);
        }
        Ok(())
    }

    fn tick_stream(&self) -> TickReceiver {
        self.inner.ticks.subscribe()
    }
}

#[async_trait]
impl CandleProvider for PaperBroker {
    async fn candles(
        &self,
        code: &str,
        interval: CandleInterval,
        count: usize,
    ) -> BrokerResult<Vec<Candle>> {
        let step = match interval {
            CandleInterval::Tick => ChronoDuration::seconds(1),
            CandleInterval::Minute => ChronoDuration::minutes(1),
            CandleInterval::Day => ChronoDuration::days(1),
            CandleInterval::Week => ChronoDuration::weeks(1),
            CandleInterval::Month => ChronoDuration::days(30),
        };
        let count = count.min(MAX_CANDLES);
        let now = Utc::now();
        let inner = &self.inner;

        // Walk backwards from the current price, then emit oldest first
        let mut close = inner.last_price(code);
        let mut candles = Vec::with_capacity(count);
        for i in 0..count {
            let open = inner.walk(close);
            let high = open.max(close) + inner.rng.lock().gen_range(0..=close / 200 + 1);
            let low = (open.min(close) - inner.rng.lock().gen_range(0..=close / 200 + 1)).max(1);
            let volume: i64 = inner.rng.lock().gen_range(1_000..100_000);
            candles.push(Candle {
                time: now - step * (i as i32),
                open,
                high,
                low,
                close,
                volume,
                trading_value: volume * close as i64,
            });
            close = open;
        }
        candles.reverse();
        Ok(candles)
    }
}
