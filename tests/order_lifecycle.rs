//! End-to-end lifecycle tests against a real PostgreSQL instance.
//!
//! These tests are ignored by default; run them with a database available:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/paperbroker_test cargo test -- --ignored
//! ```

use paperbroker::{
    BrokerError, OrderFilter, OrderMonitor, OrderMonitorConfig, OrderRequest, OrderSide,
    OrderStatus, OrderType, PostgresStore, StaticQuoteSource, TimeInForce, TradingService,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

struct TestContext {
    store: PostgresStore,
    quotes: Arc<StaticQuoteSource>,
    trading: TradingService,
    monitor: Arc<OrderMonitor>,
    account_id: i64,
}

async fn setup() -> TestContext {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a test database for ignored tests");
    let store = PostgresStore::new(&url, 5).await.expect("connect");
    store.migrate().await.expect("migrate");

    let quotes = Arc::new(StaticQuoteSource::new());
    let trading = TradingService::new(
        store.clone(),
        quotes.clone(),
        paperbroker::config::TradingConfig::default(),
    );
    let monitor = Arc::new(OrderMonitor::new(
        trading.clone(),
        quotes.clone(),
        OrderMonitorConfig::default(),
    ));

    let account_id = (Uuid::new_v4().as_u128() as i64) & i64::MAX;
    trading.open_account(account_id).await.expect("open account");

    TestContext {
        store,
        quotes,
        trading,
        monitor,
        account_id,
    }
}

fn market_buy(ctx: &TestContext, symbol: &str, quantity: Decimal) -> OrderRequest {
    OrderRequest {
        account_id: ctx.account_id,
        symbol: symbol.to_string(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        quantity,
        price: None,
        stop_price: None,
        time_in_force: TimeInForce::GTC,
        idempotency_key: None,
    }
}

async fn assert_ledger_invariants(ctx: &TestContext) {
    let (portfolio, holdings) = ctx
        .trading
        .portfolio_snapshot(ctx.account_id)
        .await
        .expect("snapshot");
    assert!(
        portfolio.reserved_cash <= portfolio.cash_balance,
        "reserved_cash {} exceeds cash_balance {}",
        portfolio.reserved_cash,
        portfolio.cash_balance
    );
    assert!(portfolio.reserved_cash >= Decimal::ZERO);
    for holding in holdings {
        assert!(
            holding.reserved_quantity <= holding.quantity,
            "reserved_quantity {} exceeds quantity {} for {}",
            holding.reserved_quantity,
            holding.quantity,
            holding.symbol
        );
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn scenario_a_market_buy_fills_at_slipped_price() {
    let ctx = setup().await;
    ctx.quotes.set_price("AAPL", dec!(100));

    let order = ctx
        .trading
        .create_order(market_buy(&ctx, "AAPL", dec!(10)))
        .await
        .expect("create order");

    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_quantity, dec!(10));
    // 100 * (1 + 0.001) slippage against the buyer
    assert_eq!(order.average_fill_price, Some(dec!(100.1)));
    assert_eq!(order.total_fees, dec!(0.50));

    let (portfolio, holdings) = ctx.trading.portfolio_snapshot(ctx.account_id).await.unwrap();
    // 10 * 100.1 = 1001.00 trade value + 0.50 fee
    assert_eq!(portfolio.cash_balance, dec!(8998.50));
    assert_eq!(portfolio.reserved_cash, Decimal::ZERO);

    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].symbol, "AAPL");
    assert_eq!(holdings[0].quantity, dec!(10));
    assert_eq!(holdings[0].average_buy_price, dec!(100.1));

    let transactions = ctx.trading.list_transactions(ctx.account_id, 10, 0).await.unwrap();
    assert_eq!(transactions.len(), 1);
    let tx = &transactions[0];
    assert_eq!(tx.cash_before, dec!(10000));
    assert_eq!(tx.cash_after, dec!(8998.50));
    assert_eq!(tx.shares_before, Decimal::ZERO);
    assert_eq!(tx.shares_after, dec!(10));
    assert_eq!(tx.net_amount, dec!(1001.50));

    assert_ledger_invariants(&ctx).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn scenario_b_limit_sell_rests_until_price_reaches_limit() {
    let ctx = setup().await;
    ctx.quotes.set_price("AAPL", dec!(100));

    ctx.trading
        .create_order(market_buy(&ctx, "AAPL", dec!(10)))
        .await
        .expect("buy");

    let sell = ctx
        .trading
        .create_order(OrderRequest {
            account_id: ctx.account_id,
            symbol: "AAPL".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            quantity: dec!(10),
            price: Some(dec!(150)),
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            idempotency_key: None,
        })
        .await
        .expect("sell");

    assert_eq!(sell.status, OrderStatus::Pending);
    let (_, holdings) = ctx.trading.portfolio_snapshot(ctx.account_id).await.unwrap();
    assert_eq!(holdings[0].reserved_quantity, dec!(10));

    // Price below the limit: the monitor leaves the order resting.
    ctx.monitor.process_pending_orders().await.unwrap();
    let still_resting = ctx.trading.get_order(ctx.account_id, sell.id).await.unwrap();
    assert_eq!(still_resting.status, OrderStatus::Pending);

    // Price reaches the limit: the monitor fills it fully.
    ctx.quotes.set_price("AAPL", dec!(150));
    ctx.monitor.process_pending_orders().await.unwrap();

    let filled = ctx.trading.get_order(ctx.account_id, sell.id).await.unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);
    // 150 * (1 - 0.001) = 149.85; 10 * 149.85 = 1498.50; fee 0.75
    assert_eq!(filled.average_fill_price, Some(dec!(149.85)));

    let (portfolio, holdings) = ctx.trading.portfolio_snapshot(ctx.account_id).await.unwrap();
    assert!(holdings.is_empty(), "holding should be deleted at zero quantity");
    // 8998.50 after the buy, plus 1498.50 - 0.75
    assert_eq!(portfolio.cash_balance, dec!(10496.25));

    assert_ledger_invariants(&ctx).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn scenario_c_cancel_restores_reservation_without_a_fill() {
    let ctx = setup().await;
    ctx.quotes.set_price("MSFT", dec!(100));

    let order = ctx
        .trading
        .create_order(OrderRequest {
            account_id: ctx.account_id,
            symbol: "MSFT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(5),
            price: Some(dec!(90)),
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            idempotency_key: None,
        })
        .await
        .expect("create");

    assert_eq!(order.status, OrderStatus::Pending);
    let (portfolio, _) = ctx.trading.portfolio_snapshot(ctx.account_id).await.unwrap();
    // 5 * 90.09 = 450.45 value + 0.50 minimum fee
    assert_eq!(portfolio.reserved_cash, dec!(450.95));

    let canceled = ctx
        .trading
        .cancel_order(ctx.account_id, order.id)
        .await
        .expect("cancel");
    assert_eq!(canceled.status, OrderStatus::Canceled);
    assert!(canceled.canceled_at.is_some());

    let (portfolio, _) = ctx.trading.portfolio_snapshot(ctx.account_id).await.unwrap();
    assert_eq!(portfolio.reserved_cash, Decimal::ZERO);
    assert_eq!(portfolio.cash_balance, dec!(10000));

    let transactions = ctx.trading.list_transactions(ctx.account_id, 10, 0).await.unwrap();
    assert!(transactions.is_empty());

    // A second cancel observes the terminal state.
    let err = ctx.trading.cancel_order(ctx.account_id, order.id).await.unwrap_err();
    assert!(matches!(err, BrokerError::OrderNotActive { .. }));

    assert_ledger_invariants(&ctx).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn scenario_d_concurrent_buys_cannot_jointly_overdraw() {
    let ctx = setup().await;
    ctx.quotes.set_price("NVDA", dec!(100));

    // Each order costs ~6009, about 60% of the 10k balance.
    let first = {
        let trading = ctx.trading.clone();
        let request = market_buy(&ctx, "NVDA", dec!(60));
        tokio::spawn(async move { trading.create_order(request).await })
    };
    let second = {
        let trading = ctx.trading.clone();
        let request = market_buy(&ctx, "NVDA", dec!(60));
        tokio::spawn(async move { trading.create_order(request).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let filled = results
        .iter()
        .filter(|r| matches!(r, Ok(o) if o.status == OrderStatus::Filled))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(BrokerError::InsufficientFunds { .. })))
        .count();

    assert_eq!(filled, 1, "exactly one order must fill");
    assert_eq!(rejected, 1, "the other must be rejected for insufficient funds");

    assert_ledger_invariants(&ctx).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn idempotency_key_returns_the_original_order() {
    let ctx = setup().await;
    ctx.quotes.set_price("AAPL", dec!(100));

    let key = Uuid::new_v4().to_string();
    let mut request = market_buy(&ctx, "AAPL", dec!(1));
    request.idempotency_key = Some(key.clone());

    let first = ctx.trading.create_order(request.clone()).await.expect("first");
    let second = ctx.trading.create_order(request).await.expect("second");

    assert_eq!(first.id, second.id);
    assert_eq!(second.status, OrderStatus::Filled);

    // Only one fill happened.
    let transactions = ctx.trading.list_transactions(ctx.account_id, 10, 0).await.unwrap();
    assert_eq!(transactions.len(), 1);

    assert_ledger_invariants(&ctx).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn stop_loss_fires_when_price_drops_through_stop() {
    let ctx = setup().await;
    ctx.quotes.set_price("TSLA", dec!(100));

    ctx.trading
        .create_order(market_buy(&ctx, "TSLA", dec!(10)))
        .await
        .expect("buy");

    let stop = ctx
        .trading
        .create_order(OrderRequest {
            account_id: ctx.account_id,
            symbol: "TSLA".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Stop,
            quantity: dec!(10),
            price: None,
            stop_price: Some(dec!(95)),
            time_in_force: TimeInForce::GTC,
            idempotency_key: None,
        })
        .await
        .expect("stop order");
    assert_eq!(stop.status, OrderStatus::Pending);

    // Above the stop: nothing happens.
    ctx.quotes.set_price("TSLA", dec!(98));
    ctx.monitor.process_pending_orders().await.unwrap();
    assert_eq!(
        ctx.trading.get_order(ctx.account_id, stop.id).await.unwrap().status,
        OrderStatus::Pending
    );

    // Through the stop: the monitor executes the exit.
    ctx.quotes.set_price("TSLA", dec!(94));
    ctx.monitor.process_pending_orders().await.unwrap();
    let filled = ctx.trading.get_order(ctx.account_id, stop.id).await.unwrap();
    assert_eq!(filled.status, OrderStatus::Filled);

    assert_ledger_invariants(&ctx).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn selling_more_than_held_is_rejected() {
    let ctx = setup().await;
    ctx.quotes.set_price("AAPL", dec!(100));

    ctx.trading
        .create_order(market_buy(&ctx, "AAPL", dec!(5)))
        .await
        .expect("buy");

    let err = ctx
        .trading
        .create_order(OrderRequest {
            account_id: ctx.account_id,
            symbol: "AAPL".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            quantity: dec!(6),
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            idempotency_key: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::InsufficientShares { .. }));
    assert_ledger_invariants(&ctx).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn market_buy_without_any_price_is_rejected() {
    let ctx = setup().await;

    let err = ctx
        .trading
        .create_order(market_buy(&ctx, "UNPRICED", dec!(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::NoPriceAvailable { .. }));

    let orders = ctx
        .trading
        .list_orders(ctx.account_id, &OrderFilter { limit: 10, ..OrderFilter::default() })
        .await
        .unwrap();
    assert!(orders.is_empty(), "no order row for an unreservable market buy");
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn expiry_sweep_cancels_stale_orders_and_releases_reservation() {
    let ctx = setup().await;
    ctx.quotes.set_price("AAPL", dec!(100));

    let order = ctx
        .trading
        .create_order(OrderRequest {
            account_id: ctx.account_id,
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: dec!(5),
            price: Some(dec!(90)),
            stop_price: None,
            time_in_force: TimeInForce::DAY,
            idempotency_key: None,
        })
        .await
        .expect("create");
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.expires_at.is_some());

    // Force the deadline into the past, then sweep.
    sqlx::query("UPDATE orders SET expires_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(order.id)
        .execute(ctx.store.pool())
        .await
        .unwrap();

    ctx.monitor.expire_due_orders().await.unwrap();

    let expired = ctx.trading.get_order(ctx.account_id, order.id).await.unwrap();
    assert_eq!(expired.status, OrderStatus::Expired);

    let (portfolio, _) = ctx.trading.portfolio_snapshot(ctx.account_id).await.unwrap();
    assert_eq!(portfolio.reserved_cash, Decimal::ZERO);

    assert_ledger_invariants(&ctx).await;
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn buy_fills_blend_the_cost_basis() {
    let ctx = setup().await;
    ctx.quotes.set_price("AAPL", dec!(100));

    ctx.trading
        .create_order(market_buy(&ctx, "AAPL", dec!(10)))
        .await
        .expect("first buy");

    ctx.quotes.set_price("AAPL", dec!(110));
    ctx.trading
        .create_order(market_buy(&ctx, "AAPL", dec!(10)))
        .await
        .expect("second buy");

    let (_, holdings) = ctx.trading.portfolio_snapshot(ctx.account_id).await.unwrap();
    assert_eq!(holdings[0].quantity, dec!(20));
    // Fills at 100.1 and 110.11: blended (1001 + 1101.1) / 20 = 105.105
    assert_eq!(holdings[0].average_buy_price, dec!(105.105));

    assert_ledger_invariants(&ctx).await;
}
