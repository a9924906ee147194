//! # exchange-sim: simulated single-venue trading exchange
//!
//! A price-time priority matching engine coupled to a concurrent
//! strategy-hosting runtime:
//! - Per-instrument central limit order books
//! - An exchange dispatcher fanning trade reports out to strategies
//! - Market maker, momentum, and arbitrage sample strategies
//! - CSV market data replay

pub mod config;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
