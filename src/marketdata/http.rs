use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use super::QuoteSource;
use crate::error::Result;

/// Quote payload returned by the upstream price service.
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[allow(dead_code)]
    symbol: String,
    price: Decimal,
}

/// HTTP-backed quote source with a bounded request timeout.
///
/// Expects `GET {base_url}/quotes/{symbol}` to return
/// `{"symbol": "...", "price": "123.45"}`. Transport failures and non-2xx
/// responses are reported as "no price", not errors; the upstream owns
/// retries and provider fallback.
pub struct HttpQuoteSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuoteSource {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn get_price(&self, symbol: &str, force_fresh: bool) -> Result<Option<Decimal>> {
        let mut url = format!("{}/quotes/{}", self.base_url, symbol);
        if force_fresh {
            url.push_str("?fresh=true");
        }

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(symbol, error = %e, "quote request failed");
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            warn!(symbol, status = %response.status(), "quote request rejected");
            return Ok(None);
        }

        match response.json::<QuoteResponse>().await {
            Ok(quote) if quote.price > Decimal::ZERO => Ok(Some(quote.price)),
            Ok(quote) => {
                warn!(symbol, price = %quote.price, "ignoring non-positive quote");
                Ok(None)
            }
            Err(e) => {
                warn!(symbol, error = %e, "malformed quote payload");
                Ok(None)
            }
        }
    }
}
