use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Holding, Portfolio};

/// POST /api/accounts request body
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub account_id: i64,
}

/// Portfolio snapshot with derived availability
#[derive(Debug, Serialize)]
pub struct PortfolioResponse {
    pub account_id: i64,
    pub cash_balance: Decimal,
    pub reserved_cash: Decimal,
    pub available_cash: Decimal,
    pub initial_balance: Decimal,
    pub holdings: Vec<HoldingResponse>,
}

#[derive(Debug, Serialize)]
pub struct HoldingResponse {
    pub symbol: String,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub available_quantity: Decimal,
    pub average_buy_price: Decimal,
}

impl PortfolioResponse {
    pub fn from_snapshot(portfolio: Portfolio, holdings: Vec<Holding>) -> Self {
        Self {
            account_id: portfolio.account_id,
            available_cash: portfolio.available_cash(),
            cash_balance: portfolio.cash_balance,
            reserved_cash: portfolio.reserved_cash,
            initial_balance: portfolio.initial_balance,
            holdings: holdings
                .into_iter()
                .map(|h| HoldingResponse {
                    available_quantity: h.available_quantity(),
                    symbol: h.symbol,
                    quantity: h.quantity,
                    reserved_quantity: h.reserved_quantity,
                    average_buy_price: h.average_buy_price,
                })
                .collect(),
        }
    }
}

/// Query string for order scoping and filtering
#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub account_id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Query string identifying the requesting account
#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub account_id: i64,
}

/// Query string for transaction history
#[derive(Debug, Deserialize)]
pub struct TransactionListQuery {
    pub account_id: i64,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Uniform error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// GET /health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database_connected: bool,
    pub uptime_secs: i64,
}
