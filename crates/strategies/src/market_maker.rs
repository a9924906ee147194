use crate::report::{write_json_summary, CsvLog};
use crate::risk::RiskTracker;
use anyhow::Result;
use exchange::{Exchange, Strategy};
use order_book::{now_micros, Order, OrderId, OrderType, Price, Side, Trade};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

const QUOTE_INTERVAL: Duration = Duration::from_millis(500);
/// A resting quote older than this is withdrawn and re-priced.
const MAX_QUOTE_AGE_US: u64 = 500_000;
/// A quote whose target price moved further than this is re-priced.
const MAX_PRICE_DRIFT: f64 = 0.02;
const MIN_HALF_SPREAD: f64 = 0.01;
const QUOTE_QUANTITY: u32 = 1;
const INVENTORY_LIMIT: i64 = 10;
const MARKET_WINDOW: usize = 100;

const METRICS_LOG_PATH: &str = "logs/market_maker_metrics.csv";
const TRADE_LOG_PATH: &str = "logs/market_maker_trades.csv";
const METRICS_HEADER: &str = "timestamp,inventory,pnl,spread,bid_id,ask_id";
const TRADE_HEADER: &str = "trade_id,instrument,price,quantity,pnl,inventory,timestamp,risk_breached";

/// Symmetric quotes around mid, floored at the minimum half-spread.
fn quote_prices(best_bid: f64, best_ask: f64) -> (f64, f64, f64) {
    let mid = (best_bid + best_ask) / 2.0;
    let half_spread = ((best_ask - best_bid) / 2.0).max(MIN_HALF_SPREAD);
    (mid - half_spread, mid + half_spread, half_spread)
}

/// A quote slot needs replacing when its order is gone, expired, or its
/// target price drifted beyond tolerance.
fn quote_is_stale(resting: Option<&Order>, target_price: f64, now: u64) -> bool {
    match resting {
        Some(order) => {
            let expired = now > order.timestamp + MAX_QUOTE_AGE_US;
            let drifted = (order.price.to_f64() - target_price).abs() > MAX_PRICE_DRIFT;
            expired || drifted
        }
        None => true,
    }
}

#[derive(Debug)]
struct MakerState {
    inventory: i64,
    risk: RiskTracker,
    /// Orders this strategy owns that may still be resting.
    active_orders: HashMap<OrderId, Order>,
    /// Cumulative filled quantity per owned order.
    filled_quantity: HashMap<OrderId, u32>,
    current_bid: Option<OrderId>,
    current_ask: Option<OrderId>,
    total_quotes: u64,
}

impl MakerState {
    fn new(max_loss: f64) -> Self {
        Self {
            inventory: 0,
            risk: RiskTracker::new(max_loss),
            active_orders: HashMap::new(),
            filled_quantity: HashMap::new(),
            current_bid: None,
            current_ask: None,
            total_quotes: 0,
        }
    }

    fn breaches_inventory(&self, limit: i64) -> bool {
        self.inventory.abs() > limit
    }

    /// Applies one fill on an owned order and returns the PnL delta.
    fn apply_fill(&mut self, order_id: OrderId, side: Side, trade: &Trade) -> f64 {
        let qty = trade.quantity;
        let price = trade.price.to_f64();
        let pnl = match side {
            Side::Buy => {
                self.inventory += i64::from(qty);
                -price * f64::from(qty)
            }
            Side::Sell => {
                self.inventory -= i64::from(qty);
                price * f64::from(qty)
            }
        };
        self.risk.record_fill(pnl, qty);

        let filled = self.filled_quantity.entry(order_id).or_insert(0);
        *filled += qty;
        let done = self
            .active_orders
            .get(&order_id)
            .map_or(true, |o| *filled >= o.quantity);
        if done {
            self.active_orders.remove(&order_id);
            self.filled_quantity.remove(&order_id);
            if self.current_bid == Some(order_id) {
                self.current_bid = None;
            }
            if self.current_ask == Some(order_id) {
                self.current_ask = None;
            }
        }
        pnl
    }
}

struct MakerShared {
    instrument: String,
    exchange: Arc<Exchange>,
    inventory_limit: i64,
    running: AtomicBool,
    state: Mutex<MakerState>,
    /// Recent external market events for the instrument, newest last.
    recent_market: Mutex<VecDeque<Order>>,
    metrics_log: Mutex<Option<CsvLog>>,
    trade_log: Mutex<Option<CsvLog>>,
}

impl MakerShared {
    /// One pass of the quoting loop.
    fn quote_tick(&self) {
        {
            let mut state = self.state.lock();
            if state.risk.breaches_max_loss() || state.breaches_inventory(self.inventory_limit) {
                warn!(
                    instrument = %self.instrument,
                    inventory = state.inventory,
                    realized_pnl = state.risk.realized_pnl(),
                    "risk limits exceeded, quoting stopped"
                );
                state.risk.force_violation();
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        }

        let book = match self.exchange.book(&self.instrument) {
            Some(book) => book,
            None => return,
        };
        let (best_bid, best_ask) = match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) => (bid.price.to_f64(), ask.price.to_f64()),
            _ => return,
        };
        let (bid_price, ask_price, half_spread) = quote_prices(best_bid, best_ask);
        let now = now_micros();

        // Withdraw stale or drifted quotes; decide under the lock, cancel
        // through the exchange with no lock held.
        let mut cancels: Vec<OrderId> = Vec::new();
        {
            let mut state = self.state.lock();
            if let Some(id) = state.current_bid {
                if quote_is_stale(state.active_orders.get(&id), bid_price, now) {
                    state.active_orders.remove(&id);
                    state.filled_quantity.remove(&id);
                    state.current_bid = None;
                    cancels.push(id);
                }
            }
            if let Some(id) = state.current_ask {
                if quote_is_stale(state.active_orders.get(&id), ask_price, now) {
                    state.active_orders.remove(&id);
                    state.filled_quantity.remove(&id);
                    state.current_ask = None;
                    cancels.push(id);
                }
            }
        }
        for id in cancels {
            self.exchange.cancel_order(&self.instrument, id);
        }

        if self.state.lock().current_bid.is_none() {
            self.place_quote(Side::Buy, bid_price, now);
        }
        if self.state.lock().current_ask.is_none() {
            self.place_quote(Side::Sell, ask_price, now);
        }

        let (inventory, pnl, bid_id, ask_id) = {
            let state = self.state.lock();
            (
                state.inventory,
                state.risk.realized_pnl(),
                state.current_bid.map_or(0, OrderId::to_raw),
                state.current_ask.map_or(0, OrderId::to_raw),
            )
        };
        if let Some(log) = self.metrics_log.lock().as_mut() {
            log.row(format_args!(
                "{},{},{},{},{},{}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                inventory,
                pnl,
                half_spread,
                bid_id,
                ask_id
            ));
        }
    }

    /// Records the quote as owned, then submits it. The record goes in
    /// first so an immediate synchronous fill is recognized as ours.
    fn place_quote(&self, side: Side, price: f64, now: u64) {
        let order = Order::new(
            self.instrument.clone(),
            OrderType::Limit,
            side,
            Price::new(price),
            QUOTE_QUANTITY,
            now,
        );
        {
            let mut state = self.state.lock();
            state.active_orders.insert(order.id, order.clone());
            state.filled_quantity.insert(order.id, 0);
            match side {
                Side::Buy => state.current_bid = Some(order.id),
                Side::Sell => state.current_ask = Some(order.id),
            }
            state.total_quotes += 1;
        }
        self.exchange.submit_order(&order);
    }

    fn handle_trade(&self, trade: &Trade) {
        if trade.instrument != self.instrument {
            return;
        }

        let mut state = self.state.lock();
        let mut pnl_delta = 0.0;
        let mut touched = false;
        if state.active_orders.contains_key(&trade.buy_order_id) {
            pnl_delta += state.apply_fill(trade.buy_order_id, Side::Buy, trade);
            touched = true;
        }
        if state.active_orders.contains_key(&trade.sell_order_id) {
            pnl_delta += state.apply_fill(trade.sell_order_id, Side::Sell, trade);
            touched = true;
        }
        if !touched {
            return;
        }

        if state.risk.breaches_max_loss() || state.breaches_inventory(self.inventory_limit) {
            state.risk.force_violation();
            self.running.store(false, Ordering::SeqCst);
            warn!(
                instrument = %self.instrument,
                "risk violation detected post-trade, quoting stopped"
            );
        }
        info!(
            inventory = state.inventory,
            realized_pnl = state.risk.realized_pnl(),
            "fill applied"
        );

        let row = (
            trade.trade_id,
            trade.price.to_f64(),
            trade.quantity,
            pnl_delta,
            state.inventory,
            trade.timestamp,
            state.risk.violated(),
        );
        drop(state);
        if let Some(log) = self.trade_log.lock().as_mut() {
            log.row(format_args!(
                "{},{},{},{},{},{},{},{}",
                row.0, self.instrument, row.1, row.2, row.3, row.4, row.5, row.6
            ));
        }
    }
}

/// Two-sided quoting around mid with inventory and loss gates. Keeps at
/// most one resting bid and one resting ask for its instrument.
pub struct MarketMaker {
    shared: Arc<MakerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MarketMaker {
    pub fn new(instrument: impl Into<String>, exchange: Arc<Exchange>, max_loss: f64) -> Self {
        Self {
            shared: Arc::new(MakerShared {
                instrument: instrument.into(),
                exchange,
                inventory_limit: INVENTORY_LIMIT,
                running: AtomicBool::new(false),
                state: Mutex::new(MakerState::new(max_loss)),
                recent_market: Mutex::new(VecDeque::with_capacity(MARKET_WINDOW)),
                metrics_log: Mutex::new(None),
                trade_log: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn inventory(&self) -> i64 {
        self.shared.state.lock().inventory
    }

    pub fn realized_pnl(&self) -> f64 {
        self.shared.state.lock().risk.realized_pnl()
    }

    pub fn total_quotes(&self) -> u64 {
        self.shared.state.lock().total_quotes
    }

    pub fn is_quoting(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn inject_active_order(&self, order: Order) {
        let mut state = self.shared.state.lock();
        state.filled_quantity.insert(order.id, 0);
        state.active_orders.insert(order.id, order);
    }
}

impl Strategy for MarketMaker {
    fn name(&self) -> &str {
        "MarketMaker"
    }

    fn start(&self) {
        *self.shared.metrics_log.lock() = CsvLog::open_or_warn(METRICS_LOG_PATH, METRICS_HEADER);
        *self.shared.trade_log.lock() = CsvLog::open_or_warn(TRADE_LOG_PATH, TRADE_HEADER);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        *self.worker.lock() = Some(thread::spawn(move || {
            while shared.running.load(Ordering::SeqCst) {
                shared.quote_tick();
                thread::sleep(QUOTE_INTERVAL);
            }
        }));
        info!(instrument = %self.shared.instrument, "market maker started");
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        *self.shared.metrics_log.lock() = None;
        *self.shared.trade_log.lock() = None;

        let state = self.shared.state.lock();
        let trades = state.risk.total_trades();
        let ratio = if trades > 0 {
            state.total_quotes as f64 / trades as f64
        } else {
            0.0
        };
        info!(
            quotes = state.total_quotes,
            trades,
            quote_to_trade_ratio = ratio,
            "market maker stopped"
        );
    }

    fn on_market_data(&self, order: &Order) {
        if order.instrument != self.shared.instrument {
            return;
        }
        let mut recent = self.shared.recent_market.lock();
        recent.push_back(order.clone());
        if recent.len() > MARKET_WINDOW {
            recent.pop_front();
        }
    }

    fn on_trade(&self, trade: &Trade) {
        self.shared.handle_trade(trade);
    }

    fn print_summary(&self) {
        let state = self.shared.state.lock();
        let trades = state.risk.total_trades();
        let ratio = if trades > 0 {
            state.total_quotes as f64 / trades as f64
        } else {
            0.0
        };
        info!("summary: Market Maker Strategy");
        info!("summary: realized pnl {}", state.risk.realized_pnl());
        info!(
            "summary: inventory [{}] {}",
            self.shared.instrument, state.inventory
        );
        info!("summary: total quotes {}", state.total_quotes);
        info!("summary: total trades {}", trades);
        info!(
            "summary: average trade size {}",
            state.risk.average_trade_size()
        );
        info!("summary: quote-to-trade ratio {}", ratio);
        info!("summary: max drawdown {}", state.risk.max_drawdown());
        info!(
            "summary: risk breached {}",
            if state.risk.violated() { "yes" } else { "no" }
        );
    }

    fn export_summary(&self, path: &Path) -> Result<()> {
        let state = self.shared.state.lock();
        let trades = state.risk.total_trades();
        let ratio = if trades > 0 {
            state.total_quotes as f64 / trades as f64
        } else {
            0.0
        };
        let mut summary = json!({
            "strategy": "marketmaker",
            "pnl": state.risk.realized_pnl(),
            "total_quotes": state.total_quotes,
            "total_trades": trades,
            "average_trade_size": state.risk.average_trade_size(),
            "quote_to_trade_ratio": ratio,
            "max_drawdown": state.risk.max_drawdown(),
            "risk_breached": state.risk.violated(),
        });
        summary[format!("inventory_{}", self.shared.instrument)] = json!(state.inventory);
        write_json_summary(path, &summary)
    }

    fn total_trades(&self) -> u64 {
        self.shared.state.lock().risk.total_trades()
    }

    fn average_trade_size(&self) -> f64 {
        self.shared.state.lock().risk.average_trade_size()
    }

    fn max_drawdown(&self) -> f64 {
        self.shared.state.lock().risk.max_drawdown()
    }

    fn risk_violated(&self) -> bool {
        self.shared.state.lock().risk.violated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maker(max_loss: f64) -> MarketMaker {
        MarketMaker::new("ETH-USD", Arc::new(Exchange::new()), max_loss)
    }

    fn owned_limit(id: u64, side: Side, price: f64, quantity: u32) -> Order {
        Order::with_id(
            OrderId::from_raw(id),
            "ETH-USD",
            OrderType::Limit,
            side,
            Price::new(price),
            quantity,
            now_micros(),
        )
    }

    fn fill(buy_id: u64, sell_id: u64, price: f64, quantity: u32) -> Trade {
        Trade {
            trade_id: 1,
            buy_order_id: OrderId::from_raw(buy_id),
            sell_order_id: OrderId::from_raw(sell_id),
            instrument: "ETH-USD".to_string(),
            price: Price::new(price),
            quantity,
            timestamp: now_micros(),
            side: Side::Buy,
        }
    }

    #[test]
    fn test_quote_prices_symmetric_around_mid() {
        let (bid, ask, half) = quote_prices(99.0, 101.0);
        assert_eq!(half, 1.0);
        assert_eq!(bid, 99.0);
        assert_eq!(ask, 101.0);
    }

    #[test]
    fn test_quote_prices_floored_half_spread() {
        let (bid, ask, half) = quote_prices(100.0, 100.001);
        assert_eq!(half, MIN_HALF_SPREAD);
        assert!(ask - bid >= 2.0 * MIN_HALF_SPREAD - 1e-12);
    }

    #[test]
    fn test_quote_staleness() {
        let now = now_micros();
        let fresh = owned_limit(1, Side::Buy, 100.0, 1);
        assert!(!quote_is_stale(Some(&fresh), 100.0, now));
        // Drifted past tolerance.
        assert!(quote_is_stale(Some(&fresh), 100.05, now));
        // Expired.
        assert!(quote_is_stale(
            Some(&fresh),
            100.0,
            now + MAX_QUOTE_AGE_US + 1
        ));
        // Missing slot always re-quotes.
        assert!(quote_is_stale(None, 100.0, now));
    }

    #[test]
    fn test_two_buy_fills_breach_max_loss() {
        let mm = maker(-50.0);
        mm.inject_active_order(owned_limit(1, Side::Buy, 100.0, 1));
        mm.inject_active_order(owned_limit(2, Side::Buy, 100.0, 1));

        mm.on_trade(&fill(1, 900, 100.0, 1));
        mm.on_trade(&fill(2, 901, 100.0, 1));

        assert_eq!(mm.realized_pnl(), -200.0);
        assert_eq!(mm.inventory(), 2);
        assert!(mm.risk_violated());
        // Quoting loop quiesces: the running flag is already down.
        assert!(!mm.is_quoting());
    }

    #[test]
    fn test_inventory_limit_breach() {
        let mm = maker(-1_000_000.0);
        mm.inject_active_order(owned_limit(1, Side::Buy, 1.0, 6));
        mm.inject_active_order(owned_limit(2, Side::Buy, 1.0, 6));

        mm.on_trade(&fill(1, 900, 1.0, 6));
        assert!(!mm.risk_violated());
        mm.on_trade(&fill(2, 901, 1.0, 6));

        assert_eq!(mm.inventory(), 12);
        assert!(mm.risk_violated());
    }

    #[test]
    fn test_sell_fill_accounting() {
        let mm = maker(-500.0);
        mm.inject_active_order(owned_limit(5, Side::Sell, 101.0, 2));

        mm.on_trade(&fill(902, 5, 101.0, 2));
        assert_eq!(mm.inventory(), -2);
        assert_eq!(mm.realized_pnl(), 202.0);
        assert!(!mm.risk_violated());
    }

    #[test]
    fn test_unowned_trades_ignored() {
        let mm = maker(-500.0);
        mm.on_trade(&fill(700, 701, 100.0, 3));
        assert_eq!(mm.realized_pnl(), 0.0);
        assert_eq!(mm.total_trades(), 0);
    }

    #[test]
    fn test_partial_fill_keeps_order_active() {
        let mm = maker(-10_000.0);
        mm.inject_active_order(owned_limit(1, Side::Buy, 100.0, 5));

        mm.on_trade(&fill(1, 900, 100.0, 2));
        assert_eq!(mm.inventory(), 2);
        assert!(mm.shared.state.lock().active_orders.contains_key(&OrderId::from_raw(1)));

        mm.on_trade(&fill(1, 901, 100.0, 3));
        assert_eq!(mm.inventory(), 5);
        assert!(!mm.shared.state.lock().active_orders.contains_key(&OrderId::from_raw(1)));
    }

    #[test]
    fn test_market_data_window_capped() {
        let mm = maker(-500.0);
        for i in 0..(MARKET_WINDOW + 20) {
            let tick = Order::new(
                "ETH-USD",
                OrderType::Limit,
                Side::Buy,
                Price::new(100.0 + i as f64),
                1,
                i as u64,
            );
            mm.on_market_data(&tick);
        }
        assert_eq!(mm.shared.recent_market.lock().len(), MARKET_WINDOW);
    }
}
