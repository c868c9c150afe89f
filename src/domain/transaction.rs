use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Transaction direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(TransactionType::Buy),
            "SELL" => Ok(TransactionType::Sell),
            _ => Err("invalid transaction type; expected BUY|SELL"),
        }
    }
}

/// An append-only record of one fill. Captures the portfolio cash and share
/// balances immediately before and after, independent of the order's mutable
/// summary fields. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub order_id: Option<i64>,
    pub symbol: String,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    /// Execution price per share, slippage included
    pub price: Decimal,
    /// quantity * price
    pub total_amount: Decimal,
    pub fee: Decimal,
    /// total_amount plus fee for buys, minus fee for sells
    pub net_amount: Decimal,
    pub cash_before: Decimal,
    pub cash_after: Decimal,
    pub shares_before: Decimal,
    pub shares_after: Decimal,
    pub execution_venue: String,
    pub executed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn cash_change(&self) -> Decimal {
        self.cash_after - self.cash_before
    }

    pub fn shares_change(&self) -> Decimal {
        self.shares_after - self.shares_before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn change_helpers() {
        let tx = Transaction {
            id: 1,
            account_id: 1,
            order_id: Some(7),
            symbol: "AAPL".to_string(),
            transaction_type: TransactionType::Buy,
            quantity: dec!(10),
            price: dec!(100.10),
            total_amount: dec!(1001.00),
            fee: dec!(0.50),
            net_amount: dec!(1001.50),
            cash_before: dec!(10000),
            cash_after: dec!(8998.50),
            shares_before: dec!(0),
            shares_after: dec!(10),
            execution_venue: "SIMULATED".to_string(),
            executed_at: Utc::now(),
            created_at: Utc::now(),
        };
        assert_eq!(tx.cash_change(), dec!(-1001.50));
        assert_eq!(tx.shares_change(), dec!(10));
    }
}
