//! meanrev-trader: mean-reversion trader for a single Coinbase pair.
//!
//! Usage:
//!   meanrev-trader <ROLLING_WINDOW> <BUY_THRESHOLD> <SELL_THRESHOLD> <STOP_LOSS> <BUY_SIZE> [COIN]
//!
//! Example (100-hour window, buy 3% under, sell 3% over, stop 10% under, quarter of cash):
//!   meanrev-trader 6000 0.97 1.03 0.90 0.25 BTC --paper

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use meanrev_trader::api::{ApiCredentials, CoinbaseClient};
use meanrev_trader::control::FileControlSource;
use meanrev_trader::db::SqlitePriceStore;
use meanrev_trader::execution::{PaperExchange, ResilientExchange, Trader};
use meanrev_trader::persistence::{PriceHistoryStore, RedisPriceStore};
use meanrev_trader::{ExchangeClient, StrategyParameters, TradingPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Redis,
    Sqlite,
}

/// CLI arguments for meanrev-trader.
#[derive(Parser, Debug)]
#[command(name = "meanrev-trader")]
#[command(about = "Mean-reversion trader for a single Coinbase pair")]
#[command(version)]
struct Args {
    /// Moving-average window in minutes
    rolling_window: u64,

    /// Buy when ask <= average * BUY_THRESHOLD (e.g. 0.97)
    buy_threshold: f64,

    /// Take profit at entry * SELL_THRESHOLD (e.g. 1.03)
    sell_threshold: f64,

    /// Stop out at entry * STOP_LOSS (e.g. 0.90)
    stop_loss: f64,

    /// Fraction of free quote balance per buy, in (0, 1]
    buy_size: f64,

    /// Coin to trade
    #[arg(default_value = "BTC")]
    coin: String,

    /// Quote currency
    #[arg(long, default_value = "USD")]
    quote: String,

    /// Control file polled every cycle
    #[arg(long, default_value = "coinbase_parameters.toml")]
    control_file: PathBuf,

    /// Where the collector writes price history
    #[arg(long, value_enum, default_value_t = StoreKind::Sqlite)]
    store: StoreKind,

    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    #[arg(long, default_value = "sqlite://pricedata.db")]
    database_url: String,

    /// Directory holding cb_file1.bin..cb_file3.bin (default: COINBASE_* env vars)
    #[arg(long)]
    credentials_dir: Option<PathBuf>,

    /// Simulate fills against live public prices instead of trading
    #[arg(long)]
    paper: bool,

    /// Starting quote balance for --paper
    #[arg(long, default_value_t = 1000.0)]
    paper_cash: f64,

    /// Use the Coinbase sandbox API
    #[arg(long)]
    sandbox: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();

    let params = StrategyParameters {
        rolling_window_minutes: args.rolling_window,
        buy_threshold: args.buy_threshold,
        sell_threshold: args.sell_threshold,
        stop_loss: args.stop_loss,
        buy_size_fraction: args.buy_size,
        coin: args.coin.clone(),
    };
    params.validate().context("Refusing to start")?;

    tracing::info!("🚀 meanrev-trader starting");
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Pair: {}/{}", params.coin.to_uppercase(), args.quote.to_uppercase());
    tracing::info!("  Rolling window: {} minutes", params.rolling_window_minutes);
    tracing::info!("  Buy threshold: {}", params.buy_threshold);
    tracing::info!("  Sell threshold: {}", params.sell_threshold);
    tracing::info!("  Stop loss: {}", params.stop_loss);
    tracing::info!("  Buy size: {}", params.buy_size_fraction);
    tracing::info!("  Mode: {}", if args.paper { "paper" } else { "live" });

    // ========================================================================
    // Wiring
    // ========================================================================

    let store = connect_store(&args).await?;
    let exchange = build_exchange(&args)?;
    let control = FileControlSource::new(&args.control_file);

    let mut trader = Trader::new(
        &args.quote,
        params,
        ResilientExchange::new(exchange),
        store,
        control,
    )?;

    // ========================================================================
    // Run until stopped
    // ========================================================================

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = trader.run() => false,
    };

    if interrupted {
        tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        trader.log_shutdown();
    }

    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("meanrev_trader=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_store(args: &Args) -> Result<Arc<dyn PriceHistoryStore>> {
    let store: Arc<dyn PriceHistoryStore> = match args.store {
        StoreKind::Redis => Arc::new(
            RedisPriceStore::connect(&args.redis_url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", args.redis_url))?,
        ),
        StoreKind::Sqlite => Arc::new(
            SqlitePriceStore::connect(&args.database_url)
                .await
                .with_context(|| format!("Failed to open {}", args.database_url))?,
        ),
    };

    Ok(store)
}

fn build_exchange(args: &Args) -> Result<Arc<dyn ExchangeClient>> {
    let coinbase = |credentials: Option<ApiCredentials>| {
        if args.sandbox {
            CoinbaseClient::sandbox(credentials)
        } else {
            CoinbaseClient::new(credentials)
        }
    };

    if args.paper {
        let feed = coinbase(None).context("Failed to build Coinbase price feed")?;
        let pair = TradingPair::new(&args.coin, &args.quote);
        let paper = PaperExchange::new(pair, args.paper_cash).with_price_feed(Arc::new(feed));
        tracing::info!("📝 Paper trading with {:.2} {}", args.paper_cash, args.quote);
        return Ok(Arc::new(paper));
    }

    let credentials = match &args.credentials_dir {
        Some(dir) => ApiCredentials::from_files(dir),
        None => ApiCredentials::from_env(),
    }
    .context("Failed to load API credentials")?;

    tracing::info!("🔑 Loaded API credentials");

    let client = coinbase(Some(credentials)).context("Failed to build Coinbase client")?;
    Ok(Arc::new(client))
}
