use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;

use super::QuoteSource;
use crate::error::Result;

/// In-memory quote source for demos and tests. Prices are set explicitly;
/// symbols without a price answer `None` like any other provider miss.
#[derive(Debug, Default)]
pub struct StaticQuoteSource {
    prices: DashMap<String, Decimal>,
}

impl StaticQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.insert(symbol.to_ascii_uppercase(), price);
    }

    pub fn clear_price(&self, symbol: &str) {
        self.prices.remove(&symbol.to_ascii_uppercase());
    }
}

#[async_trait]
impl QuoteSource for StaticQuoteSource {
    async fn get_price(&self, symbol: &str, _force_fresh: bool) -> Result<Option<Decimal>> {
        Ok(self
            .prices
            .get(&symbol.to_ascii_uppercase())
            .map(|entry| *entry.value()))
    }
}
