pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod marketdata;
pub mod services;

pub use adapters::{NewOrder, NewTransaction, OrderFilter, PostgresStore};
pub use config::AppConfig;
pub use domain::{
    Holding, Order, OrderRequest, OrderSide, OrderStatus, OrderType, Portfolio, TimeInForce,
    Transaction, TransactionType,
};
pub use error::{BrokerError, Result};
pub use marketdata::{CachingQuoteSource, HttpQuoteSource, QuoteSource, StaticQuoteSource};
pub use services::{MonitorStats, OrderMonitor, OrderMonitorConfig, TradingService};
