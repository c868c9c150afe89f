use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::adapters::OrderFilter;
use crate::api::{state::AppState, types::*};
use crate::domain::{Order, OrderRequest, Transaction};
use crate::error::BrokerError;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = std::result::Result<T, ApiError>;

/// Map service errors onto HTTP statuses. Reservation and execution
/// failures inside an accepted order never reach here; they surface as
/// order status changes.
fn into_api_error(e: BrokerError) -> ApiError {
    let status = match &e {
        BrokerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BrokerError::InsufficientFunds { .. } | BrokerError::InsufficientShares { .. } => {
            StatusCode::CONFLICT
        }
        BrokerError::OrderNotActive { .. } | BrokerError::PortfolioExists { .. } => {
            StatusCode::CONFLICT
        }
        BrokerError::OrderNotFound { .. } | BrokerError::PortfolioNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        BrokerError::NoPriceAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn parse_filter(query: &OrderListQuery) -> ApiResult<OrderFilter> {
    let mut filter = OrderFilter {
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
        ..OrderFilter::default()
    };

    if let Some(raw) = &query.status {
        filter.status = Some(raw.parse().map_err(|e: &str| {
            into_api_error(BrokerError::Validation(e.to_string()))
        })?);
    }
    if let Some(raw) = &query.side {
        filter.side = Some(raw.parse().map_err(|e: &str| {
            into_api_error(BrokerError::Validation(e.to_string()))
        })?);
    }
    if let Some(raw) = &query.order_type {
        filter.order_type = Some(raw.parse().map_err(|e: &str| {
            into_api_error(BrokerError::Validation(e.to_string()))
        })?);
    }
    filter.symbol = query.symbol.clone();

    Ok(filter)
}

/// POST /api/accounts
pub async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> ApiResult<(StatusCode, Json<PortfolioResponse>)> {
    let portfolio = state
        .trading
        .open_account(request.account_id)
        .await
        .map_err(into_api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(PortfolioResponse::from_snapshot(portfolio, Vec::new())),
    ))
}

/// GET /api/accounts/:account_id/portfolio
pub async fn get_portfolio(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> ApiResult<Json<PortfolioResponse>> {
    let (portfolio, holdings) = state
        .trading
        .portfolio_snapshot(account_id)
        .await
        .map_err(into_api_error)?;

    Ok(Json(PortfolioResponse::from_snapshot(portfolio, holdings)))
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let order = state
        .trading
        .create_order(request)
        .await
        .map_err(into_api_error)?;

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<Order>> {
    let order = state
        .trading
        .get_order(query.account_id, order_id)
        .await
        .map_err(into_api_error)?;

    Ok(Json(order))
}

/// GET /api/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<Json<Vec<Order>>> {
    let filter = parse_filter(&query)?;
    let orders = state
        .trading
        .list_orders(query.account_id, &filter)
        .await
        .map_err(into_api_error)?;

    Ok(Json(orders))
}

/// POST /api/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<Order>> {
    let order = state
        .trading
        .cancel_order(query.account_id, order_id)
        .await
        .map_err(into_api_error)?;

    Ok(Json(order))
}

/// GET /api/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionListQuery>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let transactions = state
        .trading
        .list_transactions(
            query.account_id,
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )
        .await
        .map_err(into_api_error)?;

    Ok(Json(transactions))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_connected = state.trading.store().health_check().await.is_ok();
    let status_code = if database_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if database_connected { "ok" } else { "degraded" },
            database_connected,
            uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn api_error_mapping() {
        let (status, _) = into_api_error(BrokerError::Validation("bad".to_string()));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = into_api_error(BrokerError::OrderNotFound { order_id: 1 });
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = into_api_error(BrokerError::OrderNotActive {
            status: "FILLED".to_string(),
        });
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = into_api_error(BrokerError::InsufficientFunds {
            available: dec!(1),
            required: dec!(2),
        });
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = into_api_error(BrokerError::NoPriceAvailable {
            symbol: "AAPL".to_string(),
        });
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = into_api_error(BrokerError::Internal("x".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn filter_parsing_rejects_unknown_status() {
        let query = OrderListQuery {
            account_id: 1,
            status: Some("NOT_A_STATUS".to_string()),
            symbol: None,
            side: None,
            order_type: None,
            limit: None,
            offset: None,
        };
        assert!(parse_filter(&query).is_err());
    }

    #[test]
    fn filter_parsing_accepts_known_values() {
        let query = OrderListQuery {
            account_id: 1,
            status: Some("PENDING".to_string()),
            symbol: Some("AAPL".to_string()),
            side: Some("BUY".to_string()),
            order_type: Some("LIMIT".to_string()),
            limit: Some(10),
            offset: Some(0),
        };
        let filter = parse_filter(&query).unwrap();
        assert_eq!(filter.status, Some(crate::domain::OrderStatus::Pending));
        assert_eq!(filter.side, Some(crate::domain::OrderSide::Buy));
        assert_eq!(filter.order_type, Some(crate::domain::OrderType::Limit));
    }
}
