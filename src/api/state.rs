use chrono::{DateTime, Utc};

use crate::services::TradingService;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Order lifecycle service (owns the store and quote source)
    pub trading: TradingService,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(trading: TradingService) -> Self {
        Self {
            trading,
            start_time: Utc::now(),
        }
    }
}
