use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Maximum fractional digits accepted on order quantities
/// (fractional-share / crypto granularity).
pub const MAX_QUANTITY_SCALE: u32 = 8;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => Err("invalid order side; expected BUY|SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TakeProfit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Stop => "STOP",
            OrderType::StopLimit => "STOP_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
        }
    }

    /// Types that require a limit price on submission
    pub fn requires_price(&self) -> bool {
        matches!(
            self,
            OrderType::Limit | OrderType::StopLimit | OrderType::TakeProfit
        )
    }

    /// Types that require a stop trigger price on submission
    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit)
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            "STOP" => Ok(OrderType::Stop),
            "STOP_LIMIT" => Ok(OrderType::StopLimit),
            "TAKE_PROFIT" => Ok(OrderType::TakeProfit),
            _ => Err("invalid order type; expected MARKET|LIMIT|STOP|STOP_LIMIT|TAKE_PROFIT"),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order accepted, resting or awaiting execution
    Pending,
    /// Order partially filled
    PartiallyFilled,
    /// Order fully filled
    Filled,
    /// Order cancelled by the account holder
    Canceled,
    /// Order rejected (validation, resources, or execution fault)
    Rejected,
    /// Order expired past its time-in-force deadline
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXPIRED" => Ok(OrderStatus::Expired),
            _ => Err("invalid order status"),
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeInForce {
    /// Good Till Cancelled
    #[default]
    GTC,
    /// Immediate Or Cancel
    IOC,
    /// Fill Or Kill
    FOK,
    /// Day order, expires at the next session close
    DAY,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::GTC => "GTC",
            TimeInForce::IOC => "IOC",
            TimeInForce::FOK => "FOK",
            TimeInForce::DAY => "DAY",
        }
    }

    /// IOC/FOK orders either execute at submission or are cancelled on the spot.
    pub fn is_immediate(&self) -> bool {
        matches!(self, TimeInForce::IOC | TimeInForce::FOK)
    }
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimeInForce {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GTC" => Ok(TimeInForce::GTC),
            "IOC" => Ok(TimeInForce::IOC),
            "FOK" => Ok(TimeInForce::FOK),
            "DAY" => Ok(TimeInForce::DAY),
            _ => Err("invalid time in force; expected GTC|IOC|FOK|DAY"),
        }
    }
}

/// Order request (what the account holder wants to do)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    /// Limit price (LIMIT / STOP_LIMIT / TAKE_PROFIT)
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Stop trigger price (STOP / STOP_LIMIT)
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl OrderRequest {
    /// Field-level validation. Returns all problems at once so the caller
    /// can surface them in a single response.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let symbol = self.symbol.trim();
        if symbol.is_empty() {
            errors.push("symbol must not be empty".to_string());
        } else if symbol.len() > 10 {
            errors.push("symbol must be at most 10 characters".to_string());
        }

        if self.quantity <= Decimal::ZERO {
            errors.push("quantity must be positive".to_string());
        } else if self.quantity.normalize().scale() > MAX_QUANTITY_SCALE {
            errors.push(format!(
                "quantity must have at most {MAX_QUANTITY_SCALE} fractional digits"
            ));
        }

        match self.price {
            Some(p) if p <= Decimal::ZERO => errors.push("price must be positive".to_string()),
            None if self.order_type.requires_price() => errors.push(format!(
                "price is required for {} orders",
                self.order_type
            )),
            _ => {}
        }

        match self.stop_price {
            Some(p) if p <= Decimal::ZERO => {
                errors.push("stop_price must be positive".to_string());
            }
            None if self.order_type.requires_stop_price() => errors.push(format!(
                "stop_price is required for {} orders",
                self.order_type
            )),
            _ => {}
        }

        if let Some(key) = &self.idempotency_key {
            if key.is_empty() || key.len() > 100 {
                errors.push("idempotency_key must be 1-100 characters".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Symbol normalized for storage and lookups.
    pub fn normalized_symbol(&self) -> String {
        self.symbol.trim().to_ascii_uppercase()
    }
}

/// The unit of trading intent, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub account_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub average_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    /// Cash reserved for BUY orders (zero for sells)
    pub reserved_amount: Decimal,
    pub estimated_cost: Option<Decimal>,
    pub total_fees: Decimal,
    pub idempotency_key: Option<String>,
    /// Counterpart in an OCO pair
    pub related_order_id: Option<i64>,
    /// Originating order for split orders
    pub parent_order_id: Option<i64>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Unfilled quantity
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Whether the given price sample satisfies this order's trigger
    /// condition. Market orders always trigger; conditional types compare
    /// against the limit and/or stop price.
    pub fn is_triggered(&self, current_price: Decimal) -> bool {
        match self.order_type {
            OrderType::Market => true,
            OrderType::Limit => match (self.side, self.price) {
                (OrderSide::Buy, Some(limit)) => current_price <= limit,
                (OrderSide::Sell, Some(limit)) => current_price >= limit,
                _ => false,
            },
            OrderType::Stop => match (self.side, self.stop_price) {
                // Stop-loss exit
                (OrderSide::Sell, Some(stop)) => current_price <= stop,
                // Breakout entry
                (OrderSide::Buy, Some(stop)) => current_price >= stop,
                _ => false,
            },
            OrderType::StopLimit => {
                let stop_triggered = match (self.side, self.stop_price) {
                    (OrderSide::Sell, Some(stop)) => current_price <= stop,
                    (OrderSide::Buy, Some(stop)) => current_price >= stop,
                    _ => false,
                };
                if !stop_triggered {
                    return false;
                }
                // Re-check the limit condition on the same price sample
                match (self.side, self.price) {
                    (OrderSide::Buy, Some(limit)) => current_price <= limit,
                    (OrderSide::Sell, Some(limit)) => current_price >= limit,
                    _ => false,
                }
            }
            OrderType::TakeProfit => match (self.side, self.price) {
                (OrderSide::Sell, Some(limit)) => current_price >= limit,
                (OrderSide::Buy, Some(limit)) => current_price <= limit,
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn resting_order(
        side: OrderSide,
        order_type: OrderType,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> Order {
        Order {
            id: 1,
            account_id: 1,
            symbol: "AAPL".to_string(),
            side,
            order_type,
            quantity: dec!(10),
            filled_quantity: Decimal::ZERO,
            price,
            stop_price,
            average_fill_price: None,
            status: OrderStatus::Pending,
            time_in_force: TimeInForce::GTC,
            reserved_amount: Decimal::ZERO,
            estimated_cost: None,
            total_fees: Decimal::ZERO,
            idempotency_key: None,
            related_order_id: None,
            parent_order_id: None,
            rejection_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            executed_at: None,
            canceled_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn limit_buy_triggers_at_or_below_limit() {
        let order = resting_order(OrderSide::Buy, OrderType::Limit, Some(dec!(100)), None);
        assert!(order.is_triggered(dec!(99.50)));
        assert!(order.is_triggered(dec!(100)));
        assert!(!order.is_triggered(dec!(100.01)));
    }

    #[test]
    fn limit_sell_triggers_at_or_above_limit() {
        let order = resting_order(OrderSide::Sell, OrderType::Limit, Some(dec!(150)), None);
        assert!(!order.is_triggered(dec!(149.99)));
        assert!(order.is_triggered(dec!(150)));
        assert!(order.is_triggered(dec!(151)));
    }

    #[test]
    fn stop_sell_is_a_stop_loss() {
        let order = resting_order(OrderSide::Sell, OrderType::Stop, None, Some(dec!(90)));
        assert!(order.is_triggered(dec!(89)));
        assert!(order.is_triggered(dec!(90)));
        assert!(!order.is_triggered(dec!(91)));
    }

    #[test]
    fn stop_buy_is_a_breakout_entry() {
        let order = resting_order(OrderSide::Buy, OrderType::Stop, None, Some(dec!(110)));
        assert!(!order.is_triggered(dec!(109)));
        assert!(order.is_triggered(dec!(110)));
        assert!(order.is_triggered(dec!(111)));
    }

    #[test]
    fn stop_limit_needs_both_conditions_on_one_sample() {
        // Sell: stop at 90, limit at 88 -- price must be <= 90 and >= 88
        let order = resting_order(
            OrderSide::Sell,
            OrderType::StopLimit,
            Some(dec!(88)),
            Some(dec!(90)),
        );
        assert!(!order.is_triggered(dec!(91)));
        assert!(order.is_triggered(dec!(89)));
        assert!(!order.is_triggered(dec!(87)));
    }

    #[test]
    fn take_profit_mirrors_stop() {
        let sell = resting_order(OrderSide::Sell, OrderType::TakeProfit, Some(dec!(120)), None);
        assert!(sell.is_triggered(dec!(121)));
        assert!(!sell.is_triggered(dec!(119)));

        let buy = resting_order(OrderSide::Buy, OrderType::TakeProfit, Some(dec!(80)), None);
        assert!(buy.is_triggered(dec!(79)));
        assert!(!buy.is_triggered(dec!(81)));
    }

    #[test]
    fn market_orders_always_trigger() {
        let order = resting_order(OrderSide::Buy, OrderType::Market, None, None);
        assert!(order.is_triggered(dec!(0.0001)));
        assert!(order.is_triggered(dec!(99999)));
    }

    #[test]
    fn validate_rejects_missing_prices() {
        let mut request = OrderRequest {
            account_id: 1,
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(10),
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            idempotency_key: None,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("price is required")));

        request.order_type = OrderType::Stop;
        let errors = request.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("stop_price is required")));
    }

    #[test]
    fn validate_rejects_excess_quantity_precision() {
        let request = OrderRequest {
            account_id: 1,
            symbol: "BTC".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: dec!(0.123456789),
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            idempotency_key: None,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("fractional digits")));
    }

    #[test]
    fn validate_accepts_eight_fractional_digits() {
        let request = OrderRequest {
            account_id: 1,
            symbol: "BTC".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: dec!(0.12345678),
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            idempotency_key: None,
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_quantity() {
        let request = OrderRequest {
            account_id: 1,
            symbol: "AAPL".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            quantity: Decimal::ZERO,
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            idempotency_key: None,
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("quantity must be positive")));
    }

    #[test]
    fn status_classification() {
        assert!(OrderStatus::Pending.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
    }

    #[test]
    fn enum_round_trips() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        for order_type in [
            OrderType::Market,
            OrderType::Limit,
            OrderType::Stop,
            OrderType::StopLimit,
            OrderType::TakeProfit,
        ] {
            assert_eq!(order_type.as_str().parse::<OrderType>().unwrap(), order_type);
        }
    }
}
