use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the trading backend
#[derive(Error, Debug)]
pub enum BrokerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Request validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Resource reservation errors
    #[error("Insufficient funds: available ${available}, required ${required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("Insufficient shares: available {available}, required {required}")]
    InsufficientShares {
        available: Decimal,
        required: Decimal,
    },

    // Market data errors
    #[error("No price available for symbol: {symbol}")]
    NoPriceAvailable { symbol: String },

    // Order lifecycle errors
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: i64 },

    #[error("Order not active: status {status}")]
    OrderNotActive { status: String },

    #[error("Portfolio not found for account: {account_id}")]
    PortfolioNotFound { account_id: i64 },

    #[error("Account already has a portfolio: {account_id}")]
    PortfolioExists { account_id: i64 },

    // Ledger invariant violations (programming-error class, never user-facing)
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    /// Rejection reason string persisted on orders that fail execution.
    pub fn rejection_reason(&self) -> String {
        match self {
            Self::NoPriceAvailable { .. } => "NO_PRICE_AVAILABLE".to_string(),
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS".to_string(),
            Self::InsufficientShares { .. } => "INSUFFICIENT_SHARES".to_string(),
            other => other.to_string(),
        }
    }
}
