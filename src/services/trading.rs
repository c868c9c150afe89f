use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{Acquire, PgConnection};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::adapters::{NewOrder, NewTransaction, OrderFilter, PostgresStore};
use crate::config::TradingConfig;
use crate::domain::{
    Holding, Order, OrderRequest, OrderSide, OrderStatus, OrderType, Portfolio, TimeInForce,
    Transaction, TransactionType,
};
use crate::error::{BrokerError, Result};
use crate::marketdata::QuoteSource;

/// Money is settled to cents; prices and quantities carry share precision.
const MONEY_SCALE: u32 = 2;
const PRICE_SCALE: u32 = 8;

/// UTC hour treated as session close for DAY orders.
const SESSION_CLOSE_HOUR: u32 = 16;

/// Trading fee: proportional with a floor.
fn calculate_fee(trade_value: Decimal, fee_rate: Decimal, min_fee: Decimal) -> Decimal {
    (trade_value * fee_rate).round_dp(MONEY_SCALE).max(min_fee)
}

/// Deterministic slippage, always against the trader.
fn apply_slippage(price: Decimal, side: OrderSide, rate: Decimal) -> Decimal {
    let adjusted = match side {
        OrderSide::Buy => price * (Decimal::ONE + rate),
        OrderSide::Sell => price * (Decimal::ONE - rate),
    };
    adjusted.round_dp(PRICE_SCALE)
}

/// Weighted-average cost basis after a buy fill.
fn blended_cost_basis(
    old_quantity: Decimal,
    old_average: Decimal,
    fill_quantity: Decimal,
    fill_price: Decimal,
) -> Decimal {
    let total_cost = old_quantity * old_average + fill_quantity * fill_price;
    (total_cost / (old_quantity + fill_quantity)).round_dp(PRICE_SCALE)
}

fn is_idempotency_conflict(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db)
            if db.is_unique_violation() && db.constraint() == Some("orders_idempotency_key_key")
    )
}

/// Expiry for DAY orders: the next session close after `now`.
fn day_order_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    let close_today = now
        .date_naive()
        .and_hms_opt(SESSION_CLOSE_HOUR, 0, 0)
        .expect("valid close time")
        .and_utc();
    if now < close_today {
        close_today
    } else {
        close_today + Duration::days(1)
    }
}

/// Order lifecycle controller, resource reservation service and execution
/// engine. All ledger mutations go through here, inside one database
/// transaction per operation, with row locks taken portfolio-before-holding.
#[derive(Clone)]
pub struct TradingService {
    store: PostgresStore,
    quotes: Arc<dyn QuoteSource>,
    config: TradingConfig,
}

impl TradingService {
    pub fn new(store: PostgresStore, quotes: Arc<dyn QuoteSource>, config: TradingConfig) -> Self {
        Self {
            store,
            quotes,
            config,
        }
    }

    pub fn store(&self) -> &PostgresStore {
        &self.store
    }

    // ==================== Accounts ====================

    /// Open a portfolio for an account with the configured starting balance
    #[instrument(skip(self))]
    pub async fn open_account(&self, account_id: i64) -> Result<Portfolio> {
        let portfolio = self
            .store
            .create_portfolio(account_id, self.config.starting_balance)
            .await?;
        info!(
            account_id,
            balance = %portfolio.cash_balance,
            "opened portfolio"
        );
        Ok(portfolio)
    }

    /// Portfolio plus holdings snapshot
    pub async fn portfolio_snapshot(&self, account_id: i64) -> Result<(Portfolio, Vec<Holding>)> {
        let portfolio = self
            .store
            .get_portfolio(account_id)
            .await?
            .ok_or(BrokerError::PortfolioNotFound { account_id })?;
        let holdings = self.store.list_holdings(portfolio.id).await?;
        Ok((portfolio, holdings))
    }

    // ==================== Order lifecycle ====================

    /// Accept an order request: validate, reserve resources, persist as
    /// PENDING, and execute immediately when the order qualifies.
    ///
    /// A repeated idempotency key returns the original order unchanged.
    #[instrument(skip(self, request), fields(account_id = request.account_id, symbol = %request.symbol))]
    pub async fn create_order(&self, request: OrderRequest) -> Result<Order> {
        request
            .validate()
            .map_err(|errors| BrokerError::Validation(errors.join("; ")))?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.store.get_order_by_idempotency_key(key).await? {
                info!(order_id = existing.id, "duplicate idempotency key, returning prior order");
                return Ok(existing);
            }
        }

        let symbol = request.normalized_symbol();

        // One price sample drives the cost estimate, the immediate-trigger
        // check and the fill itself. Fetched fresh, before any lock is taken.
        let quote = self.quotes.get_price(&symbol, true).await?;

        let estimated_cost = self.estimate_cost(&request, quote)?;
        let reserved_amount = match request.side {
            OrderSide::Buy => estimated_cost.unwrap_or(Decimal::ZERO),
            OrderSide::Sell => Decimal::ZERO,
        };

        let expires_at = match request.time_in_force {
            TimeInForce::DAY => Some(day_order_expiry(Utc::now())),
            _ => None,
        };

        let mut tx = self.store.begin().await?;

        // Reserve under lock: portfolio row first, holding row second.
        let portfolio = PostgresStore::get_portfolio_for_update(&mut tx, request.account_id)
            .await?
            .ok_or(BrokerError::PortfolioNotFound {
                account_id: request.account_id,
            })?;

        let holding = self
            .reserve_resources(&mut tx, &request, &portfolio, &symbol, reserved_amount)
            .await?;

        let new_order = NewOrder {
            account_id: request.account_id,
            symbol: symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            reserved_amount,
            estimated_cost,
            idempotency_key: request.idempotency_key.clone(),
            expires_at,
        };
        let mut order = match PostgresStore::insert_order(&mut tx, &new_order).await {
            Ok(order) => order,
            // Two in-flight requests with the same idempotency key: the
            // loser rolls back its reservation and returns the winner's row.
            Err(BrokerError::Database(e)) if is_idempotency_conflict(&e) => {
                tx.rollback().await?;
                if let Some(key) = &request.idempotency_key {
                    if let Some(existing) = self.store.get_order_by_idempotency_key(key).await? {
                        info!(order_id = existing.id, "idempotency race lost, returning prior order");
                        return Ok(existing);
                    }
                }
                return Err(BrokerError::Database(e));
            }
            Err(e) => return Err(e),
        };

        // Market orders execute now; limit orders execute now when the
        // submission-time price already satisfies the trigger.
        let execute_now = match (order.order_type, quote) {
            (OrderType::Market, _) => true,
            (OrderType::Limit, Some(price)) => order.is_triggered(price),
            _ => false,
        };

        if execute_now {
            match quote {
                Some(reference_price) => {
                    order = self
                        .fill_with_recovery(&mut tx, order, &portfolio, holding.as_ref(), reference_price)
                        .await?;
                }
                None => {
                    // No quote and no last-known price: a market order
                    // cannot rest, so it is rejected with the reservation
                    // released.
                    let reason = BrokerError::NoPriceAvailable {
                        symbol: symbol.clone(),
                    }
                    .rejection_reason();
                    self.release_reservation(&mut tx, &order, portfolio.id).await?;
                    PostgresStore::mark_order_terminal(
                        &mut tx,
                        order.id,
                        OrderStatus::Rejected,
                        Some(&reason),
                    )
                    .await?;
                    warn!(order_id = order.id, symbol = %symbol, "rejected market order: no price available");
                    order.status = OrderStatus::Rejected;
                    order.rejection_reason = Some(reason);
                }
            }
        } else if order.time_in_force.is_immediate() {
            // IOC/FOK orders either trade at submission or die at submission.
            self.release_reservation(&mut tx, &order, portfolio.id).await?;
            PostgresStore::mark_order_terminal(&mut tx, order.id, OrderStatus::Canceled, None)
                .await?;
            info!(order_id = order.id, tif = %order.time_in_force, "canceled unfillable immediate order");
            order.status = OrderStatus::Canceled;
        }

        tx.commit().await?;

        info!(
            order_id = order.id,
            symbol = %order.symbol,
            side = %order.side,
            status = %order.status,
            "order accepted"
        );

        // Return the persisted row so timestamps reflect the final state.
        self.store
            .get_order(request.account_id, order.id)
            .await?
            .ok_or(BrokerError::OrderNotFound { order_id: order.id })
    }

    /// Cancel an active order and release the unfilled remainder of its
    /// reservation. Serializes with monitor execution on the order row lock.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, account_id: i64, order_id: i64) -> Result<Order> {
        let mut tx = self.store.begin().await?;

        let order = PostgresStore::get_order_for_update(&mut tx, order_id)
            .await?
            .filter(|o| o.account_id == account_id)
            .ok_or(BrokerError::OrderNotFound { order_id })?;

        if !order.is_active() {
            return Err(BrokerError::OrderNotActive {
                status: order.status.to_string(),
            });
        }

        let portfolio = PostgresStore::get_portfolio_for_update(&mut tx, account_id)
            .await?
            .ok_or(BrokerError::PortfolioNotFound { account_id })?;

        self.release_reservation(&mut tx, &order, portfolio.id).await?;
        PostgresStore::mark_order_terminal(&mut tx, order.id, OrderStatus::Canceled, None).await?;

        tx.commit().await?;
        info!(order_id, account_id, "order canceled");

        self.store
            .get_order(account_id, order_id)
            .await?
            .ok_or(BrokerError::OrderNotFound { order_id })
    }

    /// Expire an order past its time-in-force deadline. Same path as a
    /// user cancel apart from the terminal status; skips orders that
    /// reached a terminal state since the sweep selected them.
    pub async fn expire_order(&self, order_id: i64) -> Result<bool> {
        let mut tx = self.store.begin().await?;

        let order = match PostgresStore::get_order_for_update(&mut tx, order_id).await? {
            Some(order) if order.is_active() => order,
            _ => return Ok(false),
        };

        let portfolio = PostgresStore::get_portfolio_for_update(&mut tx, order.account_id)
            .await?
            .ok_or(BrokerError::PortfolioNotFound {
                account_id: order.account_id,
            })?;

        self.release_reservation(&mut tx, &order, portfolio.id).await?;
        PostgresStore::mark_order_terminal(&mut tx, order.id, OrderStatus::Expired, None).await?;

        tx.commit().await?;
        info!(order_id, "order expired");
        Ok(true)
    }

    /// Execute a resting order against a price sample from the monitor.
    ///
    /// Re-locks the order row and re-checks that it is still active, so a
    /// concurrent cancel wins or loses cleanly, never both.
    #[instrument(skip(self))]
    pub async fn execute_resting_order(
        &self,
        order_id: i64,
        reference_price: Decimal,
    ) -> Result<Option<Order>> {
        let mut tx = self.store.begin().await?;

        let order = match PostgresStore::get_order_for_update(&mut tx, order_id).await? {
            Some(order) if order.is_active() => order,
            _ => {
                // Cancelled, expired or filled since the scan: nothing to do.
                return Ok(None);
            }
        };

        let portfolio = PostgresStore::get_portfolio_for_update(&mut tx, order.account_id)
            .await?
            .ok_or(BrokerError::PortfolioNotFound {
                account_id: order.account_id,
            })?;

        let holding = match order.side {
            OrderSide::Sell => {
                PostgresStore::get_holding_for_update(&mut tx, portfolio.id, &order.symbol).await?
            }
            OrderSide::Buy => None,
        };

        let order = self
            .fill_with_recovery(&mut tx, order, &portfolio, holding.as_ref(), reference_price)
            .await?;

        tx.commit().await?;
        Ok(Some(order))
    }

    /// Read one order, scoped to its owner
    pub async fn get_order(&self, account_id: i64, order_id: i64) -> Result<Order> {
        self.store
            .get_order(account_id, order_id)
            .await?
            .ok_or(BrokerError::OrderNotFound { order_id })
    }

    /// Order history, newest first
    pub async fn list_orders(&self, account_id: i64, filter: &OrderFilter) -> Result<Vec<Order>> {
        self.store.list_orders(account_id, filter).await
    }

    /// Fill history, newest first
    pub async fn list_transactions(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>> {
        self.store.list_transactions(account_id, limit, offset).await
    }

    // ==================== Reservation ====================

    /// Ring-fence the resources an order needs before any execution
    /// attempt. Insufficient resources reject the order outright, for
    /// market and resting types alike; accepting an uncovered reservation
    /// would break `reserved <= balance`.
    async fn reserve_resources(
        &self,
        conn: &mut PgConnection,
        request: &OrderRequest,
        portfolio: &Portfolio,
        symbol: &str,
        estimated_cost: Decimal,
    ) -> Result<Option<Holding>> {
        match request.side {
            OrderSide::Buy => {
                let available = portfolio.available_cash();
                if available < estimated_cost {
                    return Err(BrokerError::InsufficientFunds {
                        available,
                        required: estimated_cost,
                    });
                }
                PostgresStore::adjust_reserved_cash(conn, portfolio.id, estimated_cost).await?;
                Ok(None)
            }
            OrderSide::Sell => {
                let holding = PostgresStore::get_holding_for_update(conn, portfolio.id, symbol)
                    .await?
                    .ok_or(BrokerError::InsufficientShares {
                        available: Decimal::ZERO,
                        required: request.quantity,
                    })?;

                let available = holding.available_quantity();
                if available < request.quantity {
                    return Err(BrokerError::InsufficientShares {
                        available,
                        required: request.quantity,
                    });
                }
                PostgresStore::adjust_reserved_quantity(conn, holding.id, request.quantity).await?;
                Ok(Some(holding))
            }
        }
    }

    /// Release the unfilled remainder of an order's reservation. The
    /// caller must hold the portfolio lock; exactly-once release is
    /// guaranteed by zeroing `reserved_amount` in the same transaction
    /// that moves the order to a terminal state.
    async fn release_reservation(
        &self,
        conn: &mut PgConnection,
        order: &Order,
        portfolio_id: i64,
    ) -> Result<()> {
        match order.side {
            OrderSide::Buy => {
                if order.reserved_amount > Decimal::ZERO {
                    PostgresStore::adjust_reserved_cash(conn, portfolio_id, -order.reserved_amount)
                        .await?;
                }
            }
            OrderSide::Sell => {
                let unfilled = order.remaining_quantity();
                if unfilled > Decimal::ZERO {
                    let holding =
                        PostgresStore::get_holding_for_update(conn, portfolio_id, &order.symbol)
                            .await?
                            .ok_or_else(|| {
                                BrokerError::InvariantViolation(format!(
                                    "holding {} missing while order {} holds a share reservation",
                                    order.symbol, order.id
                                ))
                            })?;
                    PostgresStore::adjust_reserved_quantity(conn, holding.id, -unfilled).await?;
                }
            }
        }
        Ok(())
    }

    // ==================== Execution engine ====================

    /// Estimated cost of an order at submission time. Buys reserve against
    /// the worst price the order can legally fill at: the live quote for
    /// market orders, the limit price for priced types, the stop price for
    /// plain stop entries.
    ///
    /// A market buy with no quote cannot size its reservation and is a hard
    /// error. A market sell reserves shares, not cash, so a missing quote
    /// just leaves the estimate empty; the execution path decides its fate.
    fn estimate_cost(
        &self,
        request: &OrderRequest,
        quote: Option<Decimal>,
    ) -> Result<Option<Decimal>> {
        let reference = match request.order_type {
            OrderType::Market => match (quote, request.side) {
                (Some(price), _) => price,
                (None, OrderSide::Buy) => {
                    return Err(BrokerError::NoPriceAvailable {
                        symbol: request.normalized_symbol(),
                    })
                }
                (None, OrderSide::Sell) => return Ok(None),
            },
            OrderType::Limit | OrderType::StopLimit | OrderType::TakeProfit => request
                .price
                .ok_or_else(|| BrokerError::Validation("price is required".to_string()))?,
            OrderType::Stop => request
                .stop_price
                .ok_or_else(|| BrokerError::Validation("stop_price is required".to_string()))?,
        };

        let execution_price = apply_slippage(reference, request.side, self.config.slippage_rate);
        let trade_value = (request.quantity * execution_price).round_dp(MONEY_SCALE);
        let fee = calculate_fee(trade_value, self.config.fee_rate, self.config.min_fee);

        Ok(Some(match request.side {
            OrderSide::Buy => trade_value + fee,
            OrderSide::Sell => (trade_value - fee).max(Decimal::ZERO),
        }))
    }

    /// Attempt a fill inside a savepoint. A failed fill rolls back to the
    /// savepoint and converts the order to REJECTED with its reservation
    /// released, leaving no resources double-reserved or dangling.
    async fn fill_with_recovery(
        &self,
        tx: &mut PgConnection,
        order: Order,
        portfolio: &Portfolio,
        holding: Option<&Holding>,
        reference_price: Decimal,
    ) -> Result<Order> {
        let mut savepoint = (&mut *tx).begin().await?;
        match self
            .fill_order(&mut savepoint, &order, portfolio, holding, reference_price)
            .await
        {
            Ok(_) => {
                savepoint.commit().await?;
            }
            Err(e) => {
                savepoint.rollback().await?;
                let reason = e.rejection_reason();
                warn!(order_id = order.id, error = %e, "fill failed, rejecting order");
                self.release_reservation(tx, &order, portfolio.id).await?;
                PostgresStore::mark_order_terminal(
                    tx,
                    order.id,
                    OrderStatus::Rejected,
                    Some(&reason),
                )
                .await?;
            }
        }

        PostgresStore::get_order_for_update(tx, order.id)
            .await?
            .ok_or(BrokerError::OrderNotFound { order_id: order.id })
    }

    /// Turn a reserved order into one complete fill at the given reference
    /// price. Caller holds the portfolio (and, for sells, holding) locks;
    /// everything here happens in the caller's transaction.
    async fn fill_order(
        &self,
        conn: &mut PgConnection,
        order: &Order,
        portfolio: &Portfolio,
        holding: Option<&Holding>,
        reference_price: Decimal,
    ) -> Result<Transaction> {
        let quantity = order.quantity;
        let execution_price = apply_slippage(reference_price, order.side, self.config.slippage_rate);
        let trade_value = (quantity * execution_price).round_dp(MONEY_SCALE);
        let fee = calculate_fee(trade_value, self.config.fee_rate, self.config.min_fee);

        let cash_before = portfolio.cash_balance;

        let (net_amount, cash_after, shares_before, shares_after) = match order.side {
            OrderSide::Buy => {
                let net_amount = trade_value + fee;

                // Release this order's reserved cash and pay for the fill.
                PostgresStore::settle_cash(conn, portfolio.id, order.reserved_amount, -net_amount)
                    .await?;

                // Upsert the holding under lock, blending the cost basis.
                let existing =
                    PostgresStore::get_holding_for_update(conn, portfolio.id, &order.symbol)
                        .await?;
                let shares_before = existing.as_ref().map_or(Decimal::ZERO, |h| h.quantity);
                match existing {
                    Some(h) => {
                        let new_quantity = h.quantity + quantity;
                        let new_average = blended_cost_basis(
                            h.quantity,
                            h.average_buy_price,
                            quantity,
                            execution_price,
                        );
                        PostgresStore::update_holding_position(
                            conn,
                            h.id,
                            new_quantity,
                            new_average,
                            Decimal::ZERO,
                        )
                        .await?;
                    }
                    None => {
                        PostgresStore::insert_holding(
                            conn,
                            portfolio.id,
                            &order.symbol,
                            quantity,
                            execution_price,
                        )
                        .await?;
                    }
                }

                (
                    net_amount,
                    cash_before - net_amount,
                    shares_before,
                    shares_before + quantity,
                )
            }
            OrderSide::Sell => {
                let holding = holding.ok_or_else(|| {
                    BrokerError::InvariantViolation(format!(
                        "sell order {} executing without its holding", order.id
                    ))
                })?;
                let net_amount = trade_value - fee;
                let shares_before = holding.quantity;
                let new_quantity = shares_before - quantity;

                if new_quantity < Decimal::ZERO {
                    return Err(BrokerError::InvariantViolation(format!(
                        "sell order {} would take holding {} negative",
                        order.id, holding.symbol
                    )));
                }

                if new_quantity.is_zero() {
                    PostgresStore::delete_holding(conn, holding.id).await?;
                } else {
                    PostgresStore::update_holding_position(
                        conn,
                        holding.id,
                        new_quantity,
                        holding.average_buy_price,
                        -quantity,
                    )
                    .await?;
                }

                PostgresStore::settle_cash(conn, portfolio.id, Decimal::ZERO, net_amount).await?;

                (net_amount, cash_before + net_amount, shares_before, new_quantity)
            }
        };

        let transaction = PostgresStore::insert_transaction(
            conn,
            &NewTransaction {
                account_id: order.account_id,
                order_id: order.id,
                symbol: order.symbol.clone(),
                transaction_type: match order.side {
                    OrderSide::Buy => TransactionType::Buy,
                    OrderSide::Sell => TransactionType::Sell,
                },
                quantity,
                price: execution_price,
                total_amount: trade_value,
                fee,
                net_amount,
                cash_before,
                cash_after,
                shares_before,
                shares_after,
            },
        )
        .await?;

        PostgresStore::record_fill(conn, order.id, quantity, execution_price, fee).await?;

        info!(
            order_id = order.id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %quantity,
            price = %execution_price,
            fee = %fee,
            net = %net_amount,
            "order filled"
        );

        Ok(transaction)
    }
}
