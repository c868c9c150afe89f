//! Market data collaborator.
//!
//! The core consumes one narrow interface: give me a price for a symbol,
//! possibly stale, possibly absent. Provider fallback, rate limiting and
//! upstream caching live behind this seam; "unavailable" is a first-class
//! answer (`Ok(None)`), never an exception path.

mod cache;
mod http;
mod memory;

pub use cache::CachingQuoteSource;
pub use http::HttpQuoteSource;
pub use memory::StaticQuoteSource;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;

/// Source of reference prices for order execution.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Latest reference price for a symbol. `force_fresh` asks the provider
    /// to bypass its own caching. A missing price is `Ok(None)`.
    async fn get_price(&self, symbol: &str, force_fresh: bool) -> Result<Option<Decimal>>;
}
