use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub trading: TradingConfig,
    pub market_data: MarketDataConfig,
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Cash balance granted to a new portfolio
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    /// Proportional fee per fill (e.g. 0.0005 = 0.05%)
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Floor applied to the proportional fee
    #[serde(default = "default_min_fee")]
    pub min_fee: Decimal,
    /// Deterministic price adjustment against the trader (e.g. 0.001 = 0.1%)
    #[serde(default = "default_slippage_rate")]
    pub slippage_rate: Decimal,
}

fn default_starting_balance() -> Decimal {
    Decimal::new(10_000_00, 2) // 10000.00
}

fn default_fee_rate() -> Decimal {
    Decimal::new(5, 4) // 0.0005
}

fn default_min_fee() -> Decimal {
    Decimal::new(50, 2) // 0.50
}

fn default_slippage_rate() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            fee_rate: default_fee_rate(),
            min_fee: default_min_fee(),
            slippage_rate: default_slippage_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    /// Quote endpoint base URL; when unset the static in-memory source is used
    #[serde(default)]
    pub quote_url: Option<String>,
    /// Quote request timeout in milliseconds
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
    /// How long a cached price remains acceptable as a fallback, in seconds
    #[serde(default = "default_cache_staleness_secs")]
    pub cache_staleness_secs: u64,
}

fn default_quote_timeout_ms() -> u64 {
    2000
}

fn default_cache_staleness_secs() -> u64 {
    300
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            quote_url: None,
            quote_timeout_ms: default_quote_timeout_ms(),
            cache_staleness_secs: default_cache_staleness_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Interval between trigger-evaluation ticks (seconds)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Interval between expired-order sweeps (seconds)
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,
}

fn default_check_interval() -> u64 {
    1
}

fn default_expiry_interval() -> u64 {
    300
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            expiry_interval_secs: default_expiry_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Listen address for the HTTP API
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .set_default("monitor.check_interval_secs", 1)?
            .set_default("monitor.expiry_interval_secs", 300)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BROKER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (BROKER_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("BROKER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trading.starting_balance <= Decimal::ZERO {
            errors.push("starting_balance must be positive".to_string());
        }

        if self.trading.fee_rate < Decimal::ZERO || self.trading.fee_rate >= Decimal::ONE {
            errors.push("fee_rate must be in [0, 1)".to_string());
        }

        if self.trading.min_fee < Decimal::ZERO {
            errors.push("min_fee must be non-negative".to_string());
        }

        if self.trading.slippage_rate < Decimal::ZERO || self.trading.slippage_rate >= Decimal::ONE
        {
            errors.push("slippage_rate must be in [0, 1)".to_string());
        }

        if self.monitor.check_interval_secs == 0 {
            errors.push("check_interval_secs must be at least 1".to_string());
        }

        if self.monitor.expiry_interval_secs < self.monitor.check_interval_secs {
            errors.push(
                "expiry_interval_secs must be at least check_interval_secs".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config_with(trading: TradingConfig, monitor: MonitorConfig) -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/paperbroker".to_string(),
                max_connections: 5,
            },
            trading,
            market_data: MarketDataConfig::default(),
            monitor,
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn default_fee_schedule() {
        let trading = TradingConfig::default();
        assert_eq!(trading.fee_rate, dec!(0.0005));
        assert_eq!(trading.min_fee, dec!(0.50));
        assert_eq!(trading.slippage_rate, dec!(0.001));
        assert_eq!(trading.starting_balance, dec!(10000.00));
    }

    #[test]
    fn validate_accepts_defaults() {
        let config = config_with(TradingConfig::default(), MonitorConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_rates() {
        let config = config_with(
            TradingConfig {
                fee_rate: dec!(1.5),
                slippage_rate: dec!(-0.1),
                ..TradingConfig::default()
            },
            MonitorConfig::default(),
        );
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("fee_rate")));
        assert!(errors.iter().any(|e| e.contains("slippage_rate")));
    }

    #[test]
    fn validate_rejects_expiry_faster_than_tick() {
        let config = config_with(
            TradingConfig::default(),
            MonitorConfig {
                check_interval_secs: 10,
                expiry_interval_secs: 5,
            },
        );
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("expiry_interval_secs")));
    }
}
