//! Spectre demo: a simulated random-walk price feed driving one paper
//! trading session end to end.

use rand::Rng;
use spectre::{
    OrderSide, PositionSide, PriceTick, SimConfig, SqliteStore, TradingSession,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spectre=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SimConfig::from_env();
    let db_path = std::env::var("SPECTRE_DB").unwrap_or_else(|_| "spectre.db".to_string());
    let store = Arc::new(SqliteStore::new(&db_path)?);

    let session = Arc::new(TradingSession::restore("demo", config, store)?);
    session.set_active_market("BTC/USD");
    info!("session loaded: {:?}", session.summary());

    // Log state-change events the way a UI or persistence collaborator would
    // consume them.
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                debug!("event: {}", json);
            }
        }
    });

    let mut rng = rand::thread_rng();
    let mut price = 50_000.0;

    // Seed a price so the scripted commands below have a market to trade.
    session.handle_tick(PriceTick::new("BTC/USD", price)?)?;

    if let Err(e) = session.execute_market_buy("BTC/USD", 0.25) {
        warn!("market buy rejected: {}", e);
    }
    if let Err(e) = session.place_limit_order("BTC/USD", OrderSide::Buy, 0.1, price * 0.98) {
        warn!("limit order rejected: {}", e);
    }
    if let Err(e) = session.open_position("BTC/USD", PositionSide::Long, 2_000.0, 10) {
        warn!("open position rejected: {}", e);
    }

    for _ in 0..600 {
        price *= 1.0 + rng.gen_range(-0.004..0.004);
        match PriceTick::new("BTC/USD", price) {
            Ok(tick) => {
                if let Err(e) = session.handle_tick(tick) {
                    warn!("tick rejected: {}", e);
                }
            }
            Err(e) => warn!("bad tick: {}", e),
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    for (id, result) in session.close_all_positions() {
        match result {
            Ok(transaction) => info!("closed position {}: {}", id, transaction.kind()),
            Err(e) => warn!("close of {} rejected: {}", id, e),
        }
    }

    let summary = session.summary();
    info!(
        "session complete: equity {:.2} {} across {} transactions",
        summary.equity, summary.quote_currency, summary.transactions
    );
    Ok(())
}
