use crate::strategy::Strategy;
use order_book::{Order, OrderBook, OrderId, Trade};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Multiplexes orders across per-instrument books and fans trade reports
/// out to registered strategies.
///
/// Books are created lazily on first sight of an instrument and live until
/// shutdown. Trades are collected with no dispatcher lock held, then
/// broadcast to every strategy in trade-id order; strategies react from
/// their own loops rather than submitting inside the callback.
pub struct Exchange {
    books: RwLock<HashMap<String, Arc<OrderBook>>>,
    strategies: RwLock<Vec<Arc<dyn Strategy>>>,
}

impl Exchange {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            strategies: RwLock::new(Vec::new()),
        }
    }

    pub fn register_strategy(&self, strategy: Arc<dyn Strategy>) {
        info!(strategy = strategy.name(), "strategy registered");
        self.strategies.write().push(strategy);
    }

    /// Routes the order to its instrument's book and broadcasts every
    /// resulting trade to all registered strategies, in order.
    pub fn submit_order(&self, order: &Order) -> Vec<Trade> {
        if order.quantity == 0 {
            warn!(order_id = %order.id, instrument = %order.instrument, "dropping zero-quantity submission");
            return Vec::new();
        }

        let book = self.ensure_book(&order.instrument);
        let trades = book.add_order(order);

        if !trades.is_empty() {
            let strategies = self.strategies.read().clone();
            for trade in &trades {
                info!(
                    trade_id = trade.trade_id,
                    instrument = %trade.instrument,
                    price = %trade.price,
                    quantity = trade.quantity,
                    side = %trade.side,
                    "trade executed"
                );
                for strategy in &strategies {
                    strategy.on_trade(trade);
                }
            }
        }

        trades
    }

    /// Cancels a resting order on the given instrument's book. Returns
    /// false for unknown instruments or ids.
    pub fn cancel_order(&self, instrument: &str, order_id: OrderId) -> bool {
        match self.book(instrument) {
            Some(book) => book.cancel_order(order_id),
            None => {
                debug!(instrument, order_id = %order_id, "cancel for unknown instrument");
                false
            }
        }
    }

    /// Delivers an external market event to every strategy for
    /// informational use.
    pub fn broadcast_market_data(&self, order: &Order) {
        let strategies = self.strategies.read().clone();
        for strategy in &strategies {
            strategy.on_market_data(order);
        }
    }

    pub fn book(&self, instrument: &str) -> Option<Arc<OrderBook>> {
        self.books.read().get(instrument).cloned()
    }

    pub fn ensure_book(&self, instrument: &str) -> Arc<OrderBook> {
        if let Some(book) = self.books.read().get(instrument) {
            return Arc::clone(book);
        }
        let mut books = self.books.write();
        Arc::clone(
            books
                .entry(instrument.to_string())
                .or_insert_with(|| Arc::new(OrderBook::new(instrument))),
        )
    }

    pub fn instruments(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }

    pub fn start(&self) {
        let strategies = self.strategies.read().clone();
        for strategy in &strategies {
            strategy.start();
        }
        info!("exchange started");
    }

    pub fn stop(&self) {
        let strategies = self.strategies.read().clone();
        for strategy in &strategies {
            strategy.stop();
        }
        info!("exchange stopped");
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use order_book::{OrderType, Price, Side};
    use parking_lot::Mutex;
    use std::path::Path;

    struct RecordingStrategy {
        trades: Mutex<Vec<Trade>>,
        market_data: Mutex<Vec<Order>>,
        started: Mutex<bool>,
        stopped: Mutex<bool>,
    }

    impl RecordingStrategy {
        fn new() -> Self {
            Self {
                trades: Mutex::new(Vec::new()),
                market_data: Mutex::new(Vec::new()),
                started: Mutex::new(false),
                stopped: Mutex::new(false),
            }
        }
    }

    impl Strategy for RecordingStrategy {
        fn name(&self) -> &str {
            "recording"
        }

        fn start(&self) {
            *self.started.lock() = true;
        }

        fn stop(&self) {
            *self.stopped.lock() = true;
        }

        fn on_market_data(&self, order: &Order) {
            self.market_data.lock().push(order.clone());
        }

        fn on_trade(&self, trade: &Trade) {
            self.trades.lock().push(trade.clone());
        }

        fn print_summary(&self) {}

        fn export_summary(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn limit(side: Side, price: f64, quantity: u32) -> Order {
        Order::new(
            "ETH-USD",
            OrderType::Limit,
            side,
            Price::new(price),
            quantity,
            0,
        )
    }

    #[test]
    fn test_books_created_lazily() {
        let exchange = Exchange::new();
        assert!(exchange.book("ETH-USD").is_none());

        exchange.submit_order(&limit(Side::Buy, 100.0, 1));
        assert!(exchange.book("ETH-USD").is_some());
        assert_eq!(exchange.instruments(), vec!["ETH-USD".to_string()]);
    }

    #[test]
    fn test_trades_broadcast_in_order() {
        let exchange = Exchange::new();
        let strategy = Arc::new(RecordingStrategy::new());
        exchange.register_strategy(strategy.clone());

        exchange.submit_order(&limit(Side::Sell, 100.0, 1));
        exchange.submit_order(&limit(Side::Sell, 101.0, 1));
        let trades = exchange.submit_order(&Order::new(
            "ETH-USD",
            OrderType::Market,
            Side::Buy,
            Price::ZERO,
            2,
            0,
        ));

        assert_eq!(trades.len(), 2);
        let seen = strategy.trades.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].trade_id < seen[1].trade_id);
        assert_eq!(seen[0].price, Price::new(100.0));
        assert_eq!(seen[1].price, Price::new(101.0));
    }

    #[test]
    fn test_explicit_cancel_path() {
        let exchange = Exchange::new();
        let order = limit(Side::Buy, 100.0, 5);
        exchange.submit_order(&order);

        assert!(exchange.cancel_order("ETH-USD", order.id));
        assert!(!exchange.cancel_order("ETH-USD", order.id));
        assert!(!exchange.cancel_order("BTC-USD", order.id));
    }

    #[test]
    fn test_zero_quantity_submission_dropped() {
        let exchange = Exchange::new();
        let trades = exchange.submit_order(&limit(Side::Buy, 100.0, 0));
        assert!(trades.is_empty());
        assert!(exchange.book("ETH-USD").is_none());
    }

    #[test]
    fn test_lifecycle_propagates_to_strategies() {
        let exchange = Exchange::new();
        let strategy = Arc::new(RecordingStrategy::new());
        exchange.register_strategy(strategy.clone());

        exchange.start();
        assert!(*strategy.started.lock());
        exchange.stop();
        assert!(*strategy.stopped.lock());
    }

    #[test]
    fn test_market_data_broadcast() {
        let exchange = Exchange::new();
        let strategy = Arc::new(RecordingStrategy::new());
        exchange.register_strategy(strategy.clone());

        let tick = limit(Side::Buy, 1850.1, 2);
        exchange.broadcast_market_data(&tick);
        assert_eq!(strategy.market_data.lock().len(), 1);
    }

    #[test]
    fn test_orders_route_to_their_instrument() {
        let exchange = Exchange::new();
        exchange.submit_order(&limit(Side::Buy, 100.0, 1));
        exchange.submit_order(&Order::new(
            "BTC-USD",
            OrderType::Limit,
            Side::Sell,
            Price::new(30_000.0),
            1,
            0,
        ));

        let eth = exchange.book("ETH-USD").unwrap();
        let btc = exchange.book("BTC-USD").unwrap();
        assert!(eth.best_bid().is_some());
        assert!(eth.best_ask().is_none());
        assert!(btc.best_ask().is_some());
        assert!(btc.best_bid().is_none());
    }
}
