use crate::report::{write_json_summary, CsvLog};
use crate::risk::RiskTracker;
use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use exchange::{Exchange, Strategy};
use order_book::{now_micros, Order, OrderType, Price, Side, Trade};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
const TRADE_LOG_PATH: &str = "logs/arbitrage_trades.csv";

/// Best quotes per instrument as observed from the market data stream.
#[derive(Debug, Default)]
struct QuoteBoard {
    best_bid: HashMap<String, f64>,
    best_ask: HashMap<String, f64>,
}

#[derive(Debug)]
struct ArbState {
    positions: HashMap<String, i64>,
    risk: RiskTracker,
}

struct ArbShared {
    instrument_a: String,
    instrument_b: String,
    exchange: Arc<Exchange>,
    threshold: f64,
    order_size: u32,
    running: AtomicBool,
    quotes: Mutex<QuoteBoard>,
    state: Mutex<ArbState>,
    /// Opportunity hits queue here; the background loop submits them.
    intent_tx: Sender<Order>,
    intent_rx: Receiver<Order>,
    trade_log: Mutex<Option<CsvLog>>,
}

impl ArbShared {
    fn observe(&self, order: &Order) {
        let price = order.price.to_f64();
        let mut quotes = self.quotes.lock();
        match order.side {
            Side::Buy => {
                let bid = quotes
                    .best_bid
                    .entry(order.instrument.clone())
                    .or_insert(price);
                *bid = bid.max(price);
            }
            Side::Sell => {
                let ask = quotes
                    .best_ask
                    .entry(order.instrument.clone())
                    .or_insert(price);
                *ask = ask.min(price);
            }
        }
        self.check_opportunity(&quotes);
    }

    /// Queues a buy/sell pair when one leg's bid clears the other leg's
    /// ask by more than the threshold. Once the risk gate trips, no new
    /// opportunities are taken.
    fn check_opportunity(&self, quotes: &QuoteBoard) {
        if self.state.lock().risk.violated() {
            return;
        }

        let a = &self.instrument_a;
        let b = &self.instrument_b;
        if let (Some(&ask_a), Some(&bid_b)) = (quotes.best_ask.get(a), quotes.best_bid.get(b)) {
            if bid_b - ask_a > self.threshold {
                info!(buy = %a, buy_at = ask_a, sell = %b, sell_at = bid_b, "arbitrage opportunity");
                self.queue_pair(a, ask_a, b, bid_b);
            }
        }
        if let (Some(&ask_b), Some(&bid_a)) = (quotes.best_ask.get(b), quotes.best_bid.get(a)) {
            if bid_a - ask_b > self.threshold {
                info!(buy = %b, buy_at = ask_b, sell = %a, sell_at = bid_a, "arbitrage opportunity");
                self.queue_pair(b, ask_b, a, bid_a);
            }
        }
    }

    fn queue_pair(&self, buy_instrument: &str, buy_at: f64, sell_instrument: &str, sell_at: f64) {
        let now = now_micros();
        let buy = Order::new(
            buy_instrument.to_string(),
            OrderType::Limit,
            Side::Buy,
            Price::new(buy_at),
            self.order_size,
            now,
        );
        let sell = Order::new(
            sell_instrument.to_string(),
            OrderType::Limit,
            Side::Sell,
            Price::new(sell_at),
            self.order_size,
            now,
        );
        let _ = self.intent_tx.send(buy);
        let _ = self.intent_tx.send(sell);
    }

    fn handle_trade(&self, trade: &Trade) {
        if trade.instrument != self.instrument_a && trade.instrument != self.instrument_b {
            return;
        }

        let mut state = self.state.lock();
        let signed_qty = match trade.side {
            Side::Buy => i64::from(trade.quantity),
            Side::Sell => -i64::from(trade.quantity),
        };
        *state.positions.entry(trade.instrument.clone()).or_insert(0) += signed_qty;
        let pnl = signed_qty as f64 * trade.price.to_f64();
        state.risk.record_fill(pnl, trade.quantity);

        if state.risk.violated() {
            self.running.store(false, Ordering::SeqCst);
        }

        let position_a = state.positions.get(&self.instrument_a).copied().unwrap_or(0);
        let position_b = state.positions.get(&self.instrument_b).copied().unwrap_or(0);
        info!(
            trade_id = trade.trade_id,
            instrument = %trade.instrument,
            price = %trade.price,
            quantity = trade.quantity,
            pnl,
            position_a,
            position_b,
            total_pnl = state.risk.realized_pnl(),
            "arbitrage fill"
        );

        let row = (
            trade.trade_id,
            trade.price.to_f64(),
            trade.quantity,
            pnl,
            position_a,
            position_b,
            state.risk.realized_pnl(),
            state.risk.violated(),
            trade.timestamp,
        );
        drop(state);
        if let Some(log) = self.trade_log.lock().as_mut() {
            log.row(format_args!(
                "{},{},{},{},{},{},{},{},{},{}",
                row.0, trade.instrument, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8
            ));
        }
    }
}

/// Cross-instrument spread capture between two symbols. Market data
/// updates a quote board; opportunity hits are queued and submitted from
/// the strategy's own loop.
pub struct ArbitrageTrader {
    shared: Arc<ArbShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ArbitrageTrader {
    pub fn new(
        instrument_a: impl Into<String>,
        instrument_b: impl Into<String>,
        exchange: Arc<Exchange>,
        threshold: f64,
        order_size: u32,
        max_loss: f64,
    ) -> Self {
        let (intent_tx, intent_rx) = unbounded();
        Self {
            shared: Arc::new(ArbShared {
                instrument_a: instrument_a.into(),
                instrument_b: instrument_b.into(),
                exchange,
                threshold,
                order_size,
                running: AtomicBool::new(false),
                quotes: Mutex::new(QuoteBoard::default()),
                state: Mutex::new(ArbState {
                    positions: HashMap::new(),
                    risk: RiskTracker::new(max_loss),
                }),
                intent_tx,
                intent_rx,
                trade_log: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn position(&self, instrument: &str) -> i64 {
        self.shared
            .state
            .lock()
            .positions
            .get(instrument)
            .copied()
            .unwrap_or(0)
    }

    pub fn realized_pnl(&self) -> f64 {
        self.shared.state.lock().risk.realized_pnl()
    }
}

impl Strategy for ArbitrageTrader {
    fn name(&self) -> &str {
        "ArbitrageTrader"
    }

    fn start(&self) {
        let header = format!(
            "trade_id,instrument,price,quantity,pnl,position_{},position_{},total_pnl,risk_breached,timestamp",
            self.shared.instrument_a, self.shared.instrument_b
        );
        *self.shared.trade_log.lock() = CsvLog::open_or_warn(TRADE_LOG_PATH, &header);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        *self.worker.lock() = Some(thread::spawn(move || {
            while shared.running.load(Ordering::SeqCst) {
                match shared.intent_rx.recv_timeout(DRAIN_TIMEOUT) {
                    Ok(order) => {
                        shared.exchange.submit_order(&order);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }));
        info!(
            a = %self.shared.instrument_a,
            b = %self.shared.instrument_b,
            "arbitrage trader started"
        );
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        *self.shared.trade_log.lock() = None;
        info!("arbitrage trader stopped");
    }

    fn on_market_data(&self, order: &Order) {
        self.shared.observe(order);
    }

    fn on_trade(&self, trade: &Trade) {
        self.shared.handle_trade(trade);
    }

    fn print_summary(&self) {
        let state = self.shared.state.lock();
        info!("summary: Arbitrage Strategy");
        info!("summary: realized pnl {}", state.risk.realized_pnl());
        info!(
            "summary: position [{}] {}",
            self.shared.instrument_a,
            state.positions.get(&self.shared.instrument_a).copied().unwrap_or(0)
        );
        info!(
            "summary: position [{}] {}",
            self.shared.instrument_b,
            state.positions.get(&self.shared.instrument_b).copied().unwrap_or(0)
        );
        info!("summary: total trades {}", state.risk.total_trades());
        info!(
            "summary: average trade size {}",
            state.risk.average_trade_size()
        );
        info!("summary: max drawdown {}", state.risk.max_drawdown());
        info!(
            "summary: risk breached {}",
            if state.risk.violated() { "yes" } else { "no" }
        );
    }

    fn export_summary(&self, path: &Path) -> Result<()> {
        let state = self.shared.state.lock();
        let mut summary = json!({
            "strategy": "arbitrage",
            "pnl": state.risk.realized_pnl(),
            "total_trades": state.risk.total_trades(),
            "average_trade_size": state.risk.average_trade_size(),
            "max_drawdown": state.risk.max_drawdown(),
            "risk_breached": state.risk.violated(),
        });
        summary[format!("position_{}", self.shared.instrument_a)] =
            json!(state.positions.get(&self.shared.instrument_a).copied().unwrap_or(0));
        summary[format!("position_{}", self.shared.instrument_b)] =
            json!(state.positions.get(&self.shared.instrument_b).copied().unwrap_or(0));
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
    use order_book::OrderId;

    fn trader(threshold: f64) -> ArbitrageTrader {
        ArbitrageTrader::new(
            "ETH-USD",
            "BTC-USD",
            Arc::new(Exchange::new()),
            threshold,
            10,
            -500.0,
        )
    }

    fn tick(instrument: &str, side: Side, price: f64) -> Order {
        Order::new(
            instrument,
            OrderType::Limit,
            side,
            Price::new(price),
            1,
            0,
        )
    }

    fn drain(trader: &ArbitrageTrader) -> Vec<Order> {
        let mut orders = Vec::new();
        while let Ok(order) = trader.shared.intent_rx.try_recv() {
            orders.push(order);
        }
        orders
    }

    #[test]
    fn test_opportunity_emits_buy_and_sell_pair() {
        let trader = trader(0.05);
        trader.on_market_data(&tick("ETH-USD", Side::Sell, 100.0));
        trader.on_market_data(&tick("BTC-USD", Side::Buy, 100.10));

        let orders = drain(&trader);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].instrument, "ETH-USD");
        assert_eq!(orders[0].side, Side::Buy);
        assert_eq!(orders[0].price, Price::new(100.0));
        assert_eq!(orders[0].quantity, 10);
        assert_eq!(orders[1].instrument, "BTC-USD");
        assert_eq!(orders[1].side, Side::Sell);
        assert_eq!(orders[1].price, Price::new(100.10));
        assert_eq!(orders[1].quantity, 10);
        assert_eq!(orders[0].timestamp, orders[1].timestamp);
    }

    #[test]
    fn test_spread_at_threshold_does_not_trigger() {
        let trader = trader(0.05);
        trader.on_market_data(&tick("ETH-USD", Side::Sell, 100.0));
        trader.on_market_data(&tick("BTC-USD", Side::Buy, 100.05));
        assert!(drain(&trader).is_empty());
    }

    #[test]
    fn test_reverse_direction_triggers() {
        let trader = trader(0.05);
        trader.on_market_data(&tick("BTC-USD", Side::Sell, 200.0));
        trader.on_market_data(&tick("ETH-USD", Side::Buy, 200.2));

        let orders = drain(&trader);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].instrument, "BTC-USD");
        assert_eq!(orders[0].side, Side::Buy);
        assert_eq!(orders[1].instrument, "ETH-USD");
        assert_eq!(orders[1].side, Side::Sell);
    }

    #[test]
    fn test_quotes_keep_best_values() {
        let trader = trader(10_000.0);
        trader.on_market_data(&tick("ETH-USD", Side::Buy, 100.0));
        trader.on_market_data(&tick("ETH-USD", Side::Buy, 99.0));
        trader.on_market_data(&tick("ETH-USD", Side::Sell, 105.0));
        trader.on_market_data(&tick("ETH-USD", Side::Sell, 106.0));

        let quotes = trader.shared.quotes.lock();
        assert_eq!(quotes.best_bid["ETH-USD"], 100.0);
        assert_eq!(quotes.best_ask["ETH-USD"], 105.0);
    }

    #[test]
    fn test_fill_accounting_by_aggressor_side() {
        let trader = trader(0.05);
        let buy_fill = Trade {
            trade_id: 1,
            buy_order_id: OrderId::from_raw(1),
            sell_order_id: OrderId::from_raw(2),
            instrument: "ETH-USD".to_string(),
            price: Price::new(100.0),
            quantity: 10,
            timestamp: 0,
            side: Side::Buy,
        };
        trader.on_trade(&buy_fill);
        assert_eq!(trader.position("ETH-USD"), 10);
        assert_eq!(trader.realized_pnl(), 1000.0);

        let sell_fill = Trade {
            trade_id: 2,
            instrument: "BTC-USD".to_string(),
            side: Side::Sell,
            quantity: 4,
            price: Price::new(50.0),
            ..buy_fill
        };
        trader.on_trade(&sell_fill);
        assert_eq!(trader.position("BTC-USD"), -4);
        assert_eq!(trader.realized_pnl(), 800.0);
    }

    #[test]
    fn test_risk_breach_stops_new_opportunities() {
        let trader = trader(0.05);
        let losing = Trade {
            trade_id: 1,
            buy_order_id: OrderId::from_raw(1),
            sell_order_id: OrderId::from_raw(2),
            instrument: "ETH-USD".to_string(),
            price: Price::new(100.0),
            quantity: 10,
            timestamp: 0,
            side: Side::Sell,
        };
        trader.on_trade(&losing);
        assert!(trader.risk_violated());

        // A textbook opportunity no longer queues orders.
        trader.on_market_data(&tick("ETH-USD", Side::Sell, 100.0));
        trader.on_market_data(&tick("BTC-USD", Side::Buy, 100.10));
        assert!(drain(&trader).is_empty());
    }

    #[test]
    fn test_unrelated_instruments_ignored() {
        let trader = trader(0.05);
        let foreign = Trade {
            trade_id: 1,
            buy_order_id: OrderId::from_raw(1),
            sell_order_id: OrderId::from_raw(2),
            instrument: "SOL-USD".to_string(),
            price: Price::new(10.0),
            quantity: 1,
            timestamp: 0,
            side: Side::Buy,
        };
        trader.on_trade(&foreign);
        assert_eq!(trader.total_trades(), 0);
    }
}
