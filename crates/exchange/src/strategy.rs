use anyhow::Result;
use order_book::{Order, Trade};
use std::path::Path;

/// Contract every hosted strategy implements.
///
/// `start` spawns the strategy's background task and opens its log sinks;
/// `stop` signals the task, joins it, and closes sinks. Callers invoke each
/// exactly once. `on_market_data` and `on_trade` are invoked by the host
/// from its own threads: they must only record state, never call back into
/// the exchange. Order submission happens from the strategy's own loop.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self);

    fn stop(&self);

    /// An external market event was observed.
    fn on_market_data(&self, order: &Order);

    /// A trade was reported by some book; strategies filter by instrument.
    fn on_trade(&self, trade: &Trade);

    fn print_summary(&self);

    fn export_summary(&self, path: &Path) -> Result<()>;

    fn total_trades(&self) -> u64 {
        0
    }

    fn average_trade_size(&self) -> f64 {
        0.0
    }

    fn max_drawdown(&self) -> f64 {
        0.0
    }

    fn risk_violated(&self) -> bool {
        false
    }
}
