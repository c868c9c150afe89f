use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::QuoteSource;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: Decimal,
    fetched_at: DateTime<Utc>,
}

/// Last-known-price decorator. A fresh answer refreshes the cache; a miss
/// falls back to the cached value while it is younger than the staleness
/// window. A total miss stays `None` -- the engine decides what that means
/// for the order, the cache never invents a price.
pub struct CachingQuoteSource {
    inner: Arc<dyn QuoteSource>,
    cache: DashMap<String, CachedPrice>,
    staleness: Duration,
}

impl CachingQuoteSource {
    pub fn new(inner: Arc<dyn QuoteSource>, staleness_secs: u64) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            staleness: Duration::seconds(staleness_secs as i64),
        }
    }
}

#[async_trait]
impl QuoteSource for CachingQuoteSource {
    async fn get_price(&self, symbol: &str, force_fresh: bool) -> Result<Option<Decimal>> {
        let key = symbol.to_ascii_uppercase();

        if let Some(price) = self.inner.get_price(symbol, force_fresh).await? {
            self.cache.insert(
                key,
                CachedPrice {
                    price,
                    fetched_at: Utc::now(),
                },
            );
            return Ok(Some(price));
        }

        if let Some(entry) = self.cache.get(&key) {
            let age = Utc::now() - entry.fetched_at;
            if age <= self.staleness {
                debug!(symbol, age_secs = age.num_seconds(), "serving last-known price");
                return Ok(Some(entry.price));
            }
        }

        Ok(None)
    }
}
