use crate::price_level::PriceLevel;
use crate::types::{Order, OrderId, OrderType, Price, Side, Trade};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

pub type TradeCallback = Arc<dyn Fn(&Trade) + Send + Sync>;

/// Central limit order book for a single instrument.
///
/// Price-time priority: levels are matched best price first, FIFO within a
/// level. All book state sits behind one mutex; two concurrent submissions
/// to the same book are serialized and the second observes all effects of
/// the first.
pub struct OrderBook {
    instrument: String,
    inner: Mutex<BookInner>,
    trade_callback: RwLock<Option<TradeCallback>>,
}

#[derive(Debug)]
struct BookInner {
    /// Buy side, iterated descending (best bid = last key).
    bids: BTreeMap<Price, PriceLevel>,
    /// Sell side, iterated ascending (best ask = first key).
    asks: BTreeMap<Price, PriceLevel>,
    /// All currently resting orders; quantity mirrors the queue entry's
    /// remaining quantity.
    orders: HashMap<OrderId, Order>,
    next_trade_id: u64,
}

impl OrderBook {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            inner: Mutex::new(BookInner {
                bids: BTreeMap::new(),
                asks: BTreeMap::new(),
                orders: HashMap::new(),
                next_trade_id: 1,
            }),
            trade_callback: RwLock::new(None),
        }
    }

    #[inline]
    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Adds an order and attempts to match it, returning the trades
    /// generated (possibly none). The registered trade callback receives
    /// the same trades in generation order before this returns.
    ///
    /// The caller keeps ownership of `order`; residual quantity of a limit
    /// order rests as a copy at the back of its price level. Market-order
    /// residue is dropped. Zero-quantity submissions are a no-op.
    pub fn add_order(&self, order: &Order) -> Vec<Trade> {
        if order.quantity == 0 {
            debug!(order_id = %order.id, "ignoring zero-quantity order");
            return Vec::new();
        }

        let mut inner = self.inner.lock();
        let trades = inner.execute(order, &self.instrument);

        if !trades.is_empty() {
            let callback = self.trade_callback.read();
            if let Some(cb) = callback.as_ref() {
                for trade in &trades {
                    cb(trade);
                }
            }
        }

        trades
    }

    /// Removes a resting order. Returns false (leaving the book untouched)
    /// when the id is unknown.
    pub fn cancel_order(&self, order_id: OrderId) -> bool {
        let cancelled = self.inner.lock().cancel(order_id);
        if cancelled {
            debug!(instrument = %self.instrument, order_id = %order_id, "order cancelled");
        } else {
            debug!(instrument = %self.instrument, order_id = %order_id, "cancel miss, order not found");
        }
        cancelled
    }

    /// Front order of the best (highest) bid level.
    pub fn best_bid(&self) -> Option<Order> {
        let inner = self.inner.lock();
        inner.bids.values().next_back().and_then(|l| l.front().cloned())
    }

    /// Front order of the best (lowest) ask level.
    pub fn best_ask(&self) -> Option<Order> {
        let inner = self.inner.lock();
        inner.asks.values().next().and_then(|l| l.front().cloned())
    }

    /// Snapshot of all currently resting orders by id.
    pub fn orders(&self) -> HashMap<OrderId, Order> {
        self.inner.lock().orders.clone()
    }

    pub fn resting_order(&self, order_id: OrderId) -> Option<Order> {
        self.inner.lock().orders.get(&order_id).cloned()
    }

    /// Installs the trade callback. It runs with the book locked; it must
    /// not call back into the book.
    pub fn set_trade_callback(&self, callback: TradeCallback) {
        *self.trade_callback.write() = Some(callback);
    }

    /// Logs a per-level snapshot of both sides.
    pub fn log_depth(&self) {
        let inner = self.inner.lock();
        debug!(instrument = %self.instrument, "order book depth");
        for level in inner.asks.values().rev() {
            debug!("  ask {}", level);
        }
        for level in inner.bids.values().rev() {
            debug!("  bid {}", level);
        }
    }
}

impl BookInner {
    fn execute(&mut self, incoming: &Order, instrument: &str) -> Vec<Trade> {
        let mut remaining = incoming.quantity;
        let mut trades = Vec::new();

        if self.is_aggressive(incoming) {
            self.match_incoming(incoming, &mut remaining, &mut trades);
        }

        if incoming.order_type == OrderType::Limit && remaining > 0 {
            let mut resting = incoming.clone();
            resting.quantity = remaining;
            debug!(
                instrument,
                order_id = %resting.id,
                side = %resting.side,
                price = %resting.price,
                quantity = resting.quantity,
                "order resting"
            );
            self.rest(resting);
        }

        trades
    }

    /// An order is aggressive when it is a market order or a limit order
    /// crossing the opposite best.
    fn is_aggressive(&self, order: &Order) -> bool {
        match order.order_type {
            OrderType::Market => true,
            OrderType::Limit => match order.side {
                Side::Buy => self
                    .asks
                    .keys()
                    .next()
                    .map_or(false, |best| order.price >= *best),
                Side::Sell => self
                    .bids
                    .keys()
                    .next_back()
                    .map_or(false, |best| order.price <= *best),
            },
        }
    }

    /// Walks the opposite side best level first, FIFO within each level,
    /// executing at the resting order's price. The incoming order is never
    /// mutated; its unfilled quantity is threaded through `remaining`.
    fn match_incoming(&mut self, incoming: &Order, remaining: &mut u32, trades: &mut Vec<Trade>) {
        while *remaining > 0 {
            let level_price = match incoming.side {
                Side::Buy => self.asks.keys().next().copied(),
                Side::Sell => self.bids.keys().next_back().copied(),
            };
            let level_price = match level_price {
                Some(price) => price,
                None => break,
            };

            if incoming.order_type == OrderType::Limit {
                let crosses = match incoming.side {
                    Side::Buy => incoming.price >= level_price,
                    Side::Sell => incoming.price <= level_price,
                };
                if !crosses {
                    break;
                }
            }

            let opposite = match incoming.side {
                Side::Buy => &mut self.asks,
                Side::Sell => &mut self.bids,
            };
            let level = match opposite.get_mut(&level_price) {
                Some(level) => level,
                None => break,
            };

            while *remaining > 0 {
                let (resting_id, resting_left, traded) = match level.front_mut() {
                    Some(front) => {
                        let traded = (*remaining).min(front.quantity);
                        front.quantity -= traded;
                        (front.id, front.quantity, traded)
                    }
                    None => break,
                };

                let (buy_order_id, sell_order_id) = match incoming.side {
                    Side::Buy => (incoming.id, resting_id),
                    Side::Sell => (resting_id, incoming.id),
                };

                let trade = Trade {
                    trade_id: self.next_trade_id,
                    buy_order_id,
                    sell_order_id,
                    instrument: incoming.instrument.clone(),
                    price: level_price,
                    quantity: traded,
                    timestamp: incoming.timestamp,
                    side: incoming.side,
                };
                self.next_trade_id += 1;
                debug!(
                    trade_id = trade.trade_id,
                    buy_order_id = %trade.buy_order_id,
                    sell_order_id = %trade.sell_order_id,
                    price = %trade.price,
                    quantity = trade.quantity,
                    "trade executed"
                );
                trades.push(trade);
                *remaining -= traded;

                if resting_left == 0 {
                    level.pop_front();
                    self.orders.remove(&resting_id);
                } else if let Some(entry) = self.orders.get_mut(&resting_id) {
                    entry.quantity = resting_left;
                }
            }

            if level.is_empty() {
                opposite.remove(&level_price);
            }
        }
    }

    fn rest(&mut self, order: Order) {
        let levels = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        levels
            .entry(order.price)
            .or_insert_with(|| PriceLevel::new(order.price))
            .push_back(order.clone());
        self.orders.insert(order.id, order);
    }

    fn cancel(&mut self, order_id: OrderId) -> bool {
        let order = match self.orders.remove(&order_id) {
            Some(order) => order,
            None => return false,
        };
        let levels = match order.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if let Some(level) = levels.get_mut(&order.price) {
            level.remove(order_id);
            if level.is_empty() {
                levels.remove(&order.price);
            }
        }
        true
    }
}
