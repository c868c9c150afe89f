use clap::{Parser, Subcommand};
use paperbroker::api::{create_router, AppState};
use paperbroker::config::{AppConfig, LoggingConfig};
use paperbroker::error::Result;
use paperbroker::marketdata::{CachingQuoteSource, HttpQuoteSource, QuoteSource, StaticQuoteSource};
use paperbroker::services::{OrderMonitor, OrderMonitorConfig, TradingService};
use paperbroker::PostgresStore;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "paperbroker", about = "Simulated securities trading backend")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and the conditional order monitor
    Serve {
        /// Seed prices for the in-memory quote source, e.g. AAPL=150.00.
        /// Only used when no quote_url is configured.
        #[arg(long = "seed")]
        seeds: Vec<String>,
    },
    /// Run database migrations and exit
    Migrate,
    /// Open a portfolio for an account with the configured starting balance
    OpenAccount {
        #[arg(long)]
        account_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    if let Err(errors) = config.validate() {
        eprintln!("Invalid configuration:");
        for error in &errors {
            eprintln!("  - {error}");
        }
        std::process::exit(1);
    }

    init_logging(&config.logging);

    match cli.command {
        Commands::Migrate => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;
        }
        Commands::OpenAccount { account_id } => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            let quotes: Arc<dyn QuoteSource> = Arc::new(StaticQuoteSource::new());
            let trading = TradingService::new(store, quotes, config.trading.clone());
            let portfolio = trading.open_account(account_id).await?;
            println!(
                "Opened portfolio {} for account {} with balance {}",
                portfolio.id, portfolio.account_id, portfolio.cash_balance
            );
        }
        Commands::Serve { seeds } => {
            run_server(config, seeds).await?;
        }
    }

    Ok(())
}

async fn run_server(config: AppConfig, seeds: Vec<String>) -> Result<()> {
    let store = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;

    let quotes = build_quote_source(&config, seeds)?;
    let trading = TradingService::new(store, quotes.clone(), config.trading.clone());

    let monitor = Arc::new(OrderMonitor::new(
        trading.clone(),
        quotes,
        OrderMonitorConfig {
            check_interval_secs: config.monitor.check_interval_secs,
            expiry_interval_secs: config.monitor.expiry_interval_secs,
        },
    ));
    let monitor_handle = monitor.clone().start();

    let state = AppState::new(trading);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.api.bind).await?;
    info!("API listening on {}", config.api.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor.stop();
    monitor_handle.abort();
    info!("Shutdown complete");
    Ok(())
}

/// HTTP source behind the last-known-price cache when configured;
/// otherwise the in-memory source, optionally seeded from the CLI.
fn build_quote_source(config: &AppConfig, seeds: Vec<String>) -> Result<Arc<dyn QuoteSource>> {
    match &config.market_data.quote_url {
        Some(url) => {
            if !seeds.is_empty() {
                warn!("--seed is ignored when market_data.quote_url is configured");
            }
            let http = HttpQuoteSource::new(url.clone(), config.market_data.quote_timeout_ms)?;
            Ok(Arc::new(CachingQuoteSource::new(
                Arc::new(http),
                config.market_data.cache_staleness_secs,
            )))
        }
        None => {
            let source = StaticQuoteSource::new();
            for seed in &seeds {
                let (symbol, price) = parse_seed(seed)?;
                source.set_price(&symbol, price);
            }
            info!("Using in-memory quote source ({} seeded symbols)", seeds.len());
            Ok(Arc::new(source))
        }
    }
}

fn parse_seed(raw: &str) -> Result<(String, Decimal)> {
    let (symbol, price) = raw.split_once('=').ok_or_else(|| {
        paperbroker::BrokerError::Validation(format!("invalid seed '{raw}'; expected SYMBOL=PRICE"))
    })?;
    let price = Decimal::from_str(price.trim()).map_err(|_| {
        paperbroker::BrokerError::Validation(format!("invalid seed price in '{raw}'"))
    })?;
    Ok((symbol.trim().to_ascii_uppercase(), price))
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
