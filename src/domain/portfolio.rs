use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One cash account per user. `reserved_cash` is the portion of
/// `cash_balance` earmarked for open buy orders; the invariant
/// `reserved_cash <= cash_balance` holds at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: i64,
    pub account_id: i64,
    pub cash_balance: Decimal,
    pub reserved_cash: Decimal,
    pub initial_balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    /// Cash not earmarked for open buy orders.
    pub fn available_cash(&self) -> Decimal {
        self.cash_balance - self.reserved_cash
    }
}

/// One row per (portfolio, symbol). `reserved_quantity` is earmarked for
/// open sell orders; `average_buy_price` is the weighted-average cost basis,
/// recomputed on every buy fill. Rows are deleted when quantity hits zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub id: i64,
    pub portfolio_id: i64,
    pub symbol: String,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub average_buy_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Holding {
    /// Shares not earmarked for open sell orders.
    pub fn available_quantity(&self) -> Decimal {
        self.quantity - self.reserved_quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn available_cash_subtracts_reservation() {
        let portfolio = Portfolio {
            id: 1,
            account_id: 1,
            cash_balance: dec!(10000),
            reserved_cash: dec!(2500.50),
            initial_balance: dec!(10000),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(portfolio.available_cash(), dec!(7499.50));
    }

    #[test]
    fn available_quantity_subtracts_reservation() {
        let holding = Holding {
            id: 1,
            portfolio_id: 1,
            symbol: "AAPL".to_string(),
            quantity: dec!(10),
            reserved_quantity: dec!(4),
            average_buy_price: dec!(100),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(holding.available_quantity(), dec!(6));
    }
}
