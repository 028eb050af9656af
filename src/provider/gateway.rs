/// Market-data provider contract consumed by the ingestion pipeline
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Currency, RawSample, Token};

/// Raw samples keyed by currency, as returned for one coin and window
pub type CurrencySeries = HashMap<Currency, Vec<RawSample>>;

/// Builds the gateway a token worker uses, given that token's request timeout
pub type GatewayFactory = Arc<dyn Fn(Token, Duration) -> Arc<dyn MarketDataGateway> + Send + Sync>;

/// Range queries against the external price API.
///
/// Implementations never retry; callers own the retry policy.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Samples for one coin in one currency between two unix-second bounds, ordered by time
    async fn fetch_range(
        &self,
        coin_id: &str,
        currency: Currency,
        from: i64,
        to: i64,
    ) -> Result<Vec<RawSample>>;

    /// Query each currency in turn; the first failure aborts the whole set
    async fn fetch_all_currencies(
        &self,
        coin_id: &str,
        currencies: &[Currency],
        from: i64,
        to: i64,
    ) -> Result<CurrencySeries> {
        let mut series = HashMap::with_capacity(currencies.len());
        for currency in currencies {
            let samples = self.fetch_range(coin_id, *currency, from, to).await?;
            series.insert(*currency, samples);
        }
        Ok(series)
    }
}
