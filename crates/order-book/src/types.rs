use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static ORDER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique order identifier.
///
/// `next()` draws from a single global counter; `from_raw` does not touch
/// the counter and is the constructor for ids that already exist elsewhere
/// (cancel requests, fixtures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct OrderId(u64);

impl OrderId {
    #[inline]
    pub fn next() -> Self {
        Self(ORDER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    #[inline]
    pub fn is_buy(self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderType {
    Market = 0,
    Limit = 1,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Price per unit. Wraps `OrderedFloat` so prices can key ordered maps;
/// equality between producers is bit-exact by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Price(OrderedFloat<f64>);

impl Price {
    pub const ZERO: Self = Self(OrderedFloat(0.0));

    #[inline]
    pub fn new(value: f64) -> Self {
        Self(OrderedFloat(value))
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0.into_inner()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.to_f64())
    }
}

/// An intent to buy or sell. Owned by the caller until submitted; a resting
/// copy is owned by the book until filled or cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument: String,
    pub order_type: OrderType,
    pub side: Side,
    pub price: Price,
    /// Remaining units once resting; total units on submission.
    pub quantity: u32,
    /// Microseconds since epoch. Informational only; matching priority is
    /// queue insertion order, never timestamp.
    pub timestamp: u64,
}

impl Order {
    #[inline]
    pub fn new(
        instrument: impl Into<String>,
        order_type: OrderType,
        side: Side,
        price: Price,
        quantity: u32,
        timestamp: u64,
    ) -> Self {
        Self {
            id: OrderId::next(),
            instrument: instrument.into(),
            order_type,
            side,
            price,
            quantity,
            timestamp,
        }
    }

    /// Builds an order carrying an id allocated elsewhere.
    #[inline]
    pub fn with_id(
        id: OrderId,
        instrument: impl Into<String>,
        order_type: OrderType,
        side: Side,
        price: Price,
        quantity: u32,
        timestamp: u64,
    ) -> Self {
        Self {
            id,
            instrument: instrument.into(),
            order_type,
            side,
            price,
            quantity,
            timestamp,
        }
    }
}

/// A report of an execution between two orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Monotone per book, starting at 1.
    pub trade_id: u64,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub instrument: String,
    pub price: Price,
    pub quantity: u32,
    /// Copied from the aggressing order.
    pub timestamp: u64,
    /// The aggressor's side.
    pub side: Side,
}

impl Trade {
    #[inline]
    pub fn notional(&self) -> f64 {
        self.price.to_f64() * f64::from(self.quantity)
    }
}
