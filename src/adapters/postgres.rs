use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Postgres, Row, Transaction as SqlxTransaction};
use tracing::{debug, info, instrument};

use crate::domain::{
    Holding, Order, OrderSide, OrderStatus, OrderType, Portfolio, TimeInForce, Transaction,
    TransactionType,
};
use crate::error::{BrokerError, Result};

/// Insert payload for a new order row.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub account_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    pub reserved_amount: Decimal,
    pub estimated_cost: Option<Decimal>,
    pub idempotency_key: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Insert payload for a fill record.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: i64,
    pub order_id: i64,
    pub symbol: String,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub total_amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub cash_before: Decimal,
    pub cash_after: Decimal,
    pub shares_before: Decimal,
    pub shares_after: Decimal,
}

/// Filters for order history queries.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub symbol: Option<String>,
    pub side: Option<OrderSide>,
    pub order_type: Option<OrderType>,
    pub limit: i64,
    pub offset: i64,
}

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a database transaction. All reservation, execution and
    /// cancellation paths run inside one of these.
    pub async fn begin(&self) -> Result<SqlxTransaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Liveness probe used by the health endpoint
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Portfolios ====================

    /// Create a portfolio for an account with the starting balance
    #[instrument(skip(self))]
    pub async fn create_portfolio(
        &self,
        account_id: i64,
        starting_balance: Decimal,
    ) -> Result<Portfolio> {
        let row = sqlx::query(
            r#"
            INSERT INTO portfolios (account_id, cash_balance, reserved_cash, initial_balance)
            VALUES ($1, $2, 0, $2)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(starting_balance)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                BrokerError::PortfolioExists { account_id }
            }
            _ => BrokerError::Database(e),
        })?;

        map_portfolio(&row)
    }

    /// Get a portfolio by account
    pub async fn get_portfolio(&self, account_id: i64) -> Result<Option<Portfolio>> {
        let row = sqlx::query("SELECT * FROM portfolios WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_portfolio).transpose()
    }

    /// Get a portfolio with an exclusive row lock. Always taken before any
    /// holding lock for the same account.
    pub async fn get_portfolio_for_update(
        conn: &mut PgConnection,
        account_id: i64,
    ) -> Result<Option<Portfolio>> {
        let row = sqlx::query("SELECT * FROM portfolios WHERE account_id = $1 FOR UPDATE")
            .bind(account_id)
            .fetch_optional(conn)
            .await?;

        row.as_ref().map(map_portfolio).transpose()
    }

    /// Adjust the earmarked cash on a portfolio. Positive deltas reserve,
    /// negative deltas release; the CHECK constraints backstop both
    /// directions.
    pub async fn adjust_reserved_cash(
        conn: &mut PgConnection,
        portfolio_id: i64,
        delta: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE portfolios
            SET reserved_cash = reserved_cash + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(portfolio_id)
        .bind(delta)
        .execute(conn)
        .await
        .map_err(constraint_to_invariant)?;

        if result.rows_affected() != 1 {
            return Err(BrokerError::Internal(format!(
                "portfolio {portfolio_id} missing during reservation update"
            )));
        }
        Ok(())
    }

    /// Settle a fill against the cash balance: release the order's
    /// reservation and apply the net cash movement in one statement.
    pub async fn settle_cash(
        conn: &mut PgConnection,
        portfolio_id: i64,
        reserved_release: Decimal,
        cash_delta: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE portfolios
            SET reserved_cash = reserved_cash - $2,
                cash_balance = cash_balance + $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(portfolio_id)
        .bind(reserved_release)
        .bind(cash_delta)
        .execute(conn)
        .await
        .map_err(constraint_to_invariant)?;

        if result.rows_affected() != 1 {
            return Err(BrokerError::Internal(format!(
                "portfolio {portfolio_id} missing during settlement"
            )));
        }
        Ok(())
    }

    // ==================== Holdings ====================

    /// Get a holding by portfolio and symbol
    pub async fn get_holding(&self, portfolio_id: i64, symbol: &str) -> Result<Option<Holding>> {
        let row = sqlx::query("SELECT * FROM holdings WHERE portfolio_id = $1 AND symbol = $2")
            .bind(portfolio_id)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_holding).transpose()
    }

    /// All holdings for a portfolio
    pub async fn list_holdings(&self, portfolio_id: i64) -> Result<Vec<Holding>> {
        let rows = sqlx::query("SELECT * FROM holdings WHERE portfolio_id = $1 ORDER BY symbol")
            .bind(portfolio_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(map_holding).collect()
    }

    /// Get a holding with an exclusive row lock. The portfolio lock must
    /// already be held.
    pub async fn get_holding_for_update(
        conn: &mut PgConnection,
        portfolio_id: i64,
        symbol: &str,
    ) -> Result<Option<Holding>> {
        let row =
            sqlx::query("SELECT * FROM holdings WHERE portfolio_id = $1 AND symbol = $2 FOR UPDATE")
                .bind(portfolio_id)
                .bind(symbol)
                .fetch_optional(conn)
                .await?;

        row.as_ref().map(map_holding).transpose()
    }

    /// Adjust the earmarked share count on a holding
    pub async fn adjust_reserved_quantity(
        conn: &mut PgConnection,
        holding_id: i64,
        delta: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE holdings
            SET reserved_quantity = reserved_quantity + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(holding_id)
        .bind(delta)
        .execute(conn)
        .await
        .map_err(constraint_to_invariant)?;

        if result.rows_affected() != 1 {
            return Err(BrokerError::Internal(format!(
                "holding {holding_id} missing during reservation update"
            )));
        }
        Ok(())
    }

    /// Create a holding on first buy fill
    pub async fn insert_holding(
        conn: &mut PgConnection,
        portfolio_id: i64,
        symbol: &str,
        quantity: Decimal,
        average_buy_price: Decimal,
    ) -> Result<Holding> {
        let row = sqlx::query(
            r#"
            INSERT INTO holdings (portfolio_id, symbol, quantity, reserved_quantity, average_buy_price)
            VALUES ($1, $2, $3, 0, $4)
            RETURNING *
            "#,
        )
        .bind(portfolio_id)
        .bind(symbol)
        .bind(quantity)
        .bind(average_buy_price)
        .fetch_one(conn)
        .await?;

        map_holding(&row)
    }

    /// Rewrite a holding's position after a fill
    pub async fn update_holding_position(
        conn: &mut PgConnection,
        holding_id: i64,
        quantity: Decimal,
        average_buy_price: Decimal,
        reserved_delta: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE holdings
            SET quantity = $2,
                average_buy_price = $3,
                reserved_quantity = reserved_quantity + $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(holding_id)
        .bind(quantity)
        .bind(average_buy_price)
        .bind(reserved_delta)
        .execute(conn)
        .await
        .map_err(constraint_to_invariant)?;

        if result.rows_affected() != 1 {
            return Err(BrokerError::Internal(format!(
                "holding {holding_id} missing during position update"
            )));
        }
        Ok(())
    }

    /// Remove a holding whose quantity reached zero
    pub async fn delete_holding(conn: &mut PgConnection, holding_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM holdings WHERE id = $1")
            .bind(holding_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    // ==================== Orders ====================

    /// Insert a new order as PENDING
    #[instrument(skip(conn, new_order), fields(symbol = %new_order.symbol, side = %new_order.side))]
    pub async fn insert_order(conn: &mut PgConnection, new_order: &NewOrder) -> Result<Order> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (
                account_id, symbol, side, order_type, quantity,
                price, stop_price, time_in_force, status,
                reserved_amount, estimated_cost, idempotency_key, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'PENDING', $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(new_order.account_id)
        .bind(&new_order.symbol)
        .bind(new_order.side.as_str())
        .bind(new_order.order_type.as_str())
        .bind(new_order.quantity)
        .bind(new_order.price)
        .bind(new_order.stop_price)
        .bind(new_order.time_in_force.as_str())
        .bind(new_order.reserved_amount)
        .bind(new_order.estimated_cost)
        .bind(&new_order.idempotency_key)
        .bind(new_order.expires_at)
        .fetch_one(conn)
        .await?;

        map_order(&row)
    }

    /// Get an order owned by an account
    pub async fn get_order(&self, account_id: i64, order_id: i64) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1 AND account_id = $2")
            .bind(order_id)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_order).transpose()
    }

    /// Get an order with an exclusive row lock. Taken before the portfolio
    /// lock so cancellation and monitor execution serialize per order.
    pub async fn get_order_for_update(
        conn: &mut PgConnection,
        order_id: i64,
    ) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(conn)
            .await?;

        row.as_ref().map(map_order).transpose()
    }

    /// Look up a prior order by client idempotency key
    pub async fn get_order_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_order).transpose()
    }

    /// Record a complete fill on the order summary
    pub async fn record_fill(
        conn: &mut PgConnection,
        order_id: i64,
        filled_quantity: Decimal,
        average_fill_price: Decimal,
        total_fees: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET filled_quantity = $2,
                average_fill_price = $3,
                total_fees = $4,
                status = 'FILLED',
                reserved_amount = 0,
                executed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(filled_quantity)
        .bind(average_fill_price)
        .bind(total_fees)
        .execute(conn)
        .await
        .map_err(constraint_to_invariant)?;

        if result.rows_affected() != 1 {
            return Err(BrokerError::Internal(format!(
                "order {order_id} missing during fill update"
            )));
        }
        Ok(())
    }

    /// Move an order to a terminal non-filled state
    pub async fn mark_order_terminal(
        conn: &mut PgConnection,
        order_id: i64,
        status: OrderStatus,
        rejection_reason: Option<&str>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal() && status != OrderStatus::Filled);

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                rejection_reason = $3,
                reserved_amount = 0,
                canceled_at = CASE WHEN $2 IN ('CANCELED', 'EXPIRED') THEN NOW() ELSE canceled_at END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(status.as_str())
        .bind(rejection_reason)
        .execute(conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(BrokerError::Internal(format!(
                "order {order_id} missing during status update"
            )));
        }
        Ok(())
    }

    /// Order history for an account, newest first
    pub async fn list_orders(&self, account_id: i64, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut builder = sqlx::QueryBuilder::<Postgres>::new(
            "SELECT * FROM orders WHERE account_id = ",
        );
        builder.push_bind(account_id);

        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(symbol) = &filter.symbol {
            builder
                .push(" AND symbol = ")
                .push_bind(symbol.to_ascii_uppercase());
        }
        if let Some(side) = filter.side {
            builder.push(" AND side = ").push_bind(side.as_str());
        }
        if let Some(order_type) = filter.order_type {
            builder
                .push(" AND order_type = ")
                .push_bind(order_type.as_str());
        }

        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit.clamp(1, 200))
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(map_order).collect()
    }

    /// All orders still awaiting a fill, for the monitor's trigger scan
    pub async fn list_active_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE status IN ('PENDING', 'PARTIALLY_FILLED')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_order).collect()
    }

    /// Active orders whose time-in-force deadline has passed
    pub async fn list_expired_active_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM orders
            WHERE status IN ('PENDING', 'PARTIALLY_FILLED')
              AND expires_at IS NOT NULL
              AND expires_at <= NOW()
            ORDER BY expires_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_order).collect()
    }

    // ==================== Transactions ====================

    /// Append a fill record. Rows in this table are never updated.
    pub async fn insert_transaction(
        conn: &mut PgConnection,
        new_tx: &NewTransaction,
    ) -> Result<Transaction> {
        let row = sqlx::query(
            r#"
            INSERT INTO transactions (
                account_id, order_id, symbol, transaction_type,
                quantity, price, total_amount, fee, net_amount,
                cash_before, cash_after, shares_before, shares_after
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(new_tx.account_id)
        .bind(new_tx.order_id)
        .bind(&new_tx.symbol)
        .bind(new_tx.transaction_type.as_str())
        .bind(new_tx.quantity)
        .bind(new_tx.price)
        .bind(new_tx.total_amount)
        .bind(new_tx.fee)
        .bind(new_tx.net_amount)
        .bind(new_tx.cash_before)
        .bind(new_tx.cash_after)
        .bind(new_tx.shares_before)
        .bind(new_tx.shares_after)
        .fetch_one(conn)
        .await?;

        map_transaction(&row)
    }

    /// Fill history for an account, newest first
    pub async fn list_transactions(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM transactions
            WHERE account_id = $1
            ORDER BY executed_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit.clamp(1, 200))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        debug!("Retrieved {} transactions for account {}", rows.len(), account_id);
        rows.iter().map(map_transaction).collect()
    }
}

/// CHECK constraint failures on ledger columns are reservation-accounting
/// bugs surfacing at the storage layer, not user errors.
fn constraint_to_invariant(e: sqlx::Error) -> BrokerError {
    match &e {
        sqlx::Error::Database(db) if db.is_check_violation() => BrokerError::InvariantViolation(
            db.constraint().unwrap_or("unknown constraint").to_string(),
        ),
        _ => BrokerError::Database(e),
    }
}

fn parse_enum<T: std::str::FromStr<Err = &'static str>>(raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|e| BrokerError::Internal(format!("{e}: {raw}")))
}

fn map_portfolio(row: &PgRow) -> Result<Portfolio> {
    Ok(Portfolio {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        cash_balance: row.try_get("cash_balance")?,
        reserved_cash: row.try_get("reserved_cash")?,
        initial_balance: row.try_get("initial_balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_holding(row: &PgRow) -> Result<Holding> {
    Ok(Holding {
        id: row.try_get("id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        symbol: row.try_get("symbol")?,
        quantity: row.try_get("quantity")?,
        reserved_quantity: row.try_get("reserved_quantity")?,
        average_buy_price: row.try_get("average_buy_price")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_order(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        symbol: row.try_get("symbol")?,
        side: parse_enum(row.try_get::<&str, _>("side")?)?,
        order_type: parse_enum(row.try_get::<&str, _>("order_type")?)?,
        quantity: row.try_get("quantity")?,
        filled_quantity: row.try_get("filled_quantity")?,
        price: row.try_get("price")?,
        stop_price: row.try_get("stop_price")?,
        average_fill_price: row.try_get("average_fill_price")?,
        status: parse_enum(row.try_get::<&str, _>("status")?)?,
        time_in_force: parse_enum(row.try_get::<&str, _>("time_in_force")?)?,
        reserved_amount: row.try_get("reserved_amount")?,
        estimated_cost: row.try_get("estimated_cost")?,
        total_fees: row.try_get("total_fees")?,
        idempotency_key: row.try_get("idempotency_key")?,
        related_order_id: row.try_get("related_order_id")?,
        parent_order_id: row.try_get("parent_order_id")?,
        rejection_reason: row.try_get("rejection_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        executed_at: row.try_get("executed_at")?,
        canceled_at: row.try_get("canceled_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn map_transaction(row: &PgRow) -> Result<Transaction> {
    Ok(Transaction {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        order_id: row.try_get("order_id")?,
        symbol: row.try_get("symbol")?,
        transaction_type: parse_enum(row.try_get::<&str, _>("transaction_type")?)?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        total_amount: row.try_get("total_amount")?,
        fee: row.try_get("fee")?,
        net_amount: row.try_get("net_amount")?,
        cash_before: row.try_get("cash_before")?,
        cash_after: row.try_get("cash_after")?,
        shares_before: row.try_get("shares_before")?,
        shares_after: row.try_get("shares_after")?,
        execution_venue: row.try_get("execution_venue")?,
        executed_at: row.try_get("executed_at")?,
        created_at: row.try_get("created_at")?,
    })
}
