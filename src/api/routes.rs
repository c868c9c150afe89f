use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Account endpoints
        .route("/api/accounts", post(handlers::create_account))
        .route(
            "/api/accounts/:account_id/portfolio",
            get(handlers::get_portfolio),
        )
        // Order endpoints
        .route("/api/orders", post(handlers::create_order).get(handlers::list_orders))
        .route("/api/orders/:id", get(handlers::get_order))
        .route("/api/orders/:id/cancel", post(handlers::cancel_order))
        // Transaction endpoints
        .route("/api/transactions", get(handlers::list_transactions))
        // Health endpoint
        .route("/health", get(handlers::health))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}
