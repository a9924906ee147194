use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, Level};

use exchange::{Exchange, Strategy};
use exchange_sim::config::{FileConfig, Settings, DEFAULT_CONFIG_PATH};
use market_data::MarketDataFeed;
use order_book::Order;
use strategies::{ArbitrageTrader, MarketMaker, MomentumTrader};

const PRIMARY_INSTRUMENT: &str = "ETH-USD";
const SECONDARY_INSTRUMENT: &str = "BTC-USD";
const SUMMARY_PATH: &str = "logs/summary.json";

fn build_strategy(settings: &Settings, exchange: &Arc<Exchange>) -> Option<Arc<dyn Strategy>> {
    match settings.strategy.as_str() {
        "marketmaker" => Some(Arc::new(MarketMaker::new(
            PRIMARY_INSTRUMENT,
            Arc::clone(exchange),
            settings.risk,
        ))),
        "momentum" => Some(Arc::new(MomentumTrader::new(
            PRIMARY_INSTRUMENT,
            Arc::clone(exchange),
            settings.risk,
        ))),
        "arbitrage" => Some(Arc::new(ArbitrageTrader::new(
            PRIMARY_INSTRUMENT,
            SECONDARY_INSTRUMENT,
            Arc::clone(exchange),
            settings.spread,
            settings.size,
            settings.risk,
        ))),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let settings = Settings::resolve(FileConfig::load(DEFAULT_CONFIG_PATH), &args);
    info!(
        strategy = %settings.strategy,
        file = %settings.file,
        spread = settings.spread,
        size = settings.size,
        max_loss = settings.risk,
        "starting exchange simulation"
    );

    std::fs::create_dir_all("logs")?;

    let exchange = Arc::new(Exchange::new());
    let strategy = match build_strategy(&settings, &exchange) {
        Some(strategy) => strategy,
        None => {
            error!(strategy = %settings.strategy, "unknown strategy");
            std::process::exit(1);
        }
    };

    exchange.register_strategy(Arc::clone(&strategy));
    exchange.start();

    // Each tick is both an order for the matching engine and an
    // informational market event for the strategies.
    let mut feed = MarketDataFeed::new(settings.file.clone());
    let sink = Arc::clone(&exchange);
    feed.start(Arc::new(move |order: Order| {
        sink.submit_order(&order);
        sink.broadcast_market_data(&order);
    }));

    info!("running, press Ctrl+C to stop");
    signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    feed.stop();
    exchange.stop();

    strategy.print_summary();
    strategy.export_summary(Path::new(SUMMARY_PATH))?;

    info!("shutdown complete");
    Ok(())
}
