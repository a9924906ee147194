use crate::report::{write_json_summary, CsvLog};
use crate::risk::RiskTracker;
use anyhow::Result;
use exchange::{Exchange, Strategy};
use order_book::{now_micros, Order, OrderType, Price, Side, Trade};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::info;

const EVAL_INTERVAL: Duration = Duration::from_millis(200);
const PRICE_WINDOW: usize = 5;
const MIN_SAMPLES: usize = 3;
const COOLDOWN_US: u64 = 1_000_000;
const ORDER_QUANTITY: u32 = 1;

const TRADE_LOG_PATH: &str = "logs/momentum_trades.csv";
const TRADE_HEADER: &str = "trade_id,instrument,price,quantity,pnl,position,timestamp,risk_breached";

/// BUY when the newest sample sits above the mean of the earlier ones,
/// SELL otherwise. None until enough samples arrived.
fn momentum_signal(prices: &VecDeque<f64>) -> Option<(Side, f64)> {
    if prices.len() < MIN_SAMPLES {
        return None;
    }
    let current = *prices.back()?;
    let prior = prices.len() - 1;
    let average = prices.iter().take(prior).sum::<f64>() / prior as f64;
    let side = if current > average {
        Side::Buy
    } else {
        Side::Sell
    };
    Some((side, current))
}

#[derive(Debug)]
struct MomentumState {
    position: i64,
    cooldown_end: u64,
    risk: RiskTracker,
}

struct MomentumShared {
    instrument: String,
    exchange: Arc<Exchange>,
    running: AtomicBool,
    /// Last observed prices for the instrument, newest last.
    prices: Mutex<VecDeque<f64>>,
    state: Mutex<MomentumState>,
    trade_log: Mutex<Option<CsvLog>>,
}

impl MomentumShared {
    fn evaluate(&self) {
        let signal = {
            let prices = self.prices.lock();
            momentum_signal(&prices)
        };
        let (side, current) = match signal {
            Some(signal) => signal,
            None => return,
        };

        let now = now_micros();
        if now < self.state.lock().cooldown_end {
            return;
        }

        let order = Order::new(
            self.instrument.clone(),
            OrderType::Market,
            side,
            Price::new(current),
            ORDER_QUANTITY,
            now,
        );
        info!(
            instrument = %self.instrument,
            side = %side,
            price = current,
            "momentum signal"
        );
        self.exchange.submit_order(&order);
        self.state.lock().cooldown_end = now + COOLDOWN_US;
    }

    fn handle_trade(&self, trade: &Trade) {
        if trade.instrument != self.instrument {
            return;
        }

        let mut state = self.state.lock();
        // Fill direction inferred from relative order ids: the lower id is
        // treated as the earlier buy.
        let signed_qty = if trade.buy_order_id < trade.sell_order_id {
            i64::from(trade.quantity)
        } else {
            -i64::from(trade.quantity)
        };
        state.position += signed_qty;
        let pnl = -(signed_qty as f64) * trade.price.to_f64();
        state.risk.record_fill(pnl, trade.quantity);

        if state.risk.violated() {
            self.running.store(false, Ordering::SeqCst);
        }

        let row = (
            trade.trade_id,
            trade.price.to_f64(),
            trade.quantity,
            pnl,
            state.position,
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

/// Price-window momentum with a one-second cooldown between orders.
pub struct MomentumTrader {
    shared: Arc<MomentumShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MomentumTrader {
    pub fn new(instrument: impl Into<String>, exchange: Arc<Exchange>, max_loss: f64) -> Self {
        Self {
            shared: Arc::new(MomentumShared {
                instrument: instrument.into(),
                exchange,
                running: AtomicBool::new(false),
                prices: Mutex::new(VecDeque::with_capacity(PRICE_WINDOW)),
                state: Mutex::new(MomentumState {
                    position: 0,
                    cooldown_end: 0,
                    risk: RiskTracker::new(max_loss),
                }),
                trade_log: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn position(&self) -> i64 {
        self.shared.state.lock().position
    }

    pub fn realized_pnl(&self) -> f64 {
        self.shared.state.lock().risk.realized_pnl()
    }

    pub fn latest_price(&self) -> Option<f64> {
        self.shared.prices.lock().back().copied()
    }
}

impl Strategy for MomentumTrader {
    fn name(&self) -> &str {
        "MomentumTrader"
    }

    fn start(&self) {
        *self.shared.trade_log.lock() = CsvLog::open_or_warn(TRADE_LOG_PATH, TRADE_HEADER);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        *self.worker.lock() = Some(thread::spawn(move || {
            while shared.running.load(Ordering::SeqCst) {
                shared.evaluate();
                thread::sleep(EVAL_INTERVAL);
            }
        }));
        info!(instrument = %self.shared.instrument, "momentum trader started");
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        *self.shared.trade_log.lock() = None;
        info!(instrument = %self.shared.instrument, "momentum trader stopped");
    }

    fn on_market_data(&self, order: &Order) {
        if order.instrument != self.shared.instrument {
            return;
        }
        let mut prices = self.shared.prices.lock();
        prices.push_back(order.price.to_f64());
        if prices.len() > PRICE_WINDOW {
            prices.pop_front();
        }
    }

    fn on_trade(&self, trade: &Trade) {
        self.shared.handle_trade(trade);
    }

    fn print_summary(&self) {
        let state = self.shared.state.lock();
        info!("summary: Momentum Strategy");
        info!("summary: realized pnl {}", state.risk.realized_pnl());
        info!(
            "summary: position [{}] {}",
            self.shared.instrument, state.position
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
            "strategy": "momentum",
            "pnl": state.risk.realized_pnl(),
            "total_trades": state.risk.total_trades(),
            "average_trade_size": state.risk.average_trade_size(),
            "max_drawdown": state.risk.max_drawdown(),
            "risk_breached": state.risk.violated(),
        });
        summary[format!("position_{}", self.shared.instrument)] = json!(state.position);
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
