use crate::types::{Order, OrderId, Price};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// A single price level: resting orders in strict FIFO order.
///
/// Newcomers go to the back; matching consumes from the front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    orders: VecDeque<Order>,
}

impl PriceLevel {
    #[inline]
    pub fn new(price: Price) -> Self {
        Self {
            price,
            orders: VecDeque::with_capacity(16),
        }
    }

    #[inline]
    pub fn push_back(&mut self, order: Order) {
        self.orders.push_back(order);
    }

    #[inline]
    pub fn front(&self) -> Option<&Order> {
        self.orders.front()
    }

    #[inline]
    pub fn front_mut(&mut self) -> Option<&mut Order> {
        self.orders.front_mut()
    }

    #[inline]
    pub fn pop_front(&mut self) -> Option<Order> {
        self.orders.pop_front()
    }

    /// Removes an order from the middle of the queue (cancellation path).
    #[inline]
    pub fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let pos = self.orders.iter().position(|o| o.id == order_id)?;
        self.orders.remove(pos)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[inline]
    pub fn total_quantity(&self) -> u64 {
        self.orders.iter().map(|o| u64::from(o.quantity)).sum()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }
}

impl fmt::Display for PriceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.total_quantity(), self.price, self.len())
    }
}
