/// CoinGecko REST client
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::CoinGeckoConfig;
use crate::error::{IngestError, Result};
use crate::provider::gateway::{GatewayFactory, MarketDataGateway};
use crate::types::{Currency, RawSample, Token};
use crate::utils::RequestPacer;

const USER_AGENT: &str = concat!("coinquotes/", env!("CARGO_PKG_VERSION"));
const API_KEY_HEADER: &str = "x-cg-pro-api-key";
const ERROR_BODY_LIMIT: usize = 256;

#[derive(Debug, Deserialize)]
struct MarketChartRangeResponse {
    #[serde(default)]
    prices: Vec<Vec<f64>>,
}

/// CoinGecko market-chart client
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    pacer: Arc<RequestPacer>,
}

impl CoinGeckoClient {
    pub fn new(
        client: Client,
        config: &CoinGeckoConfig,
        timeout: Duration,
        pacer: Arc<RequestPacer>,
    ) -> Self {
        let api_key = Some(config.api_key.trim().to_string()).filter(|key| !key.is_empty());

        CoinGeckoClient {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            pacer,
        }
    }

    /// Shared HTTP client for all token workers
    pub fn build_http_client() -> Result<Client> {
        Ok(Client::builder().user_agent(USER_AGENT).build()?)
    }

    /// Factory handing each token its own timeout over one connection pool and pacer
    pub fn factory(config: CoinGeckoConfig, pacer: Arc<RequestPacer>) -> Result<GatewayFactory> {
        let client = Self::build_http_client()?;

        Ok(Arc::new(move |token: Token, timeout: Duration| {
            let gateway = CoinGeckoClient::new(client.clone(), &config, timeout, Arc::clone(&pacer));
            debug!(
                "Creating CoinGecko client for {} (timeout {:?}, api key: {})",
                token,
                timeout,
                if gateway.has_api_key() { "yes" } else { "no" }
            );
            Arc::new(gateway) as Arc<dyn MarketDataGateway>
        }))
    }

    fn range_url(&self, coin_id: &str, currency: Currency, from: i64, to: i64) -> String {
        format!(
            "{}/coins/{}/market_chart/range?vs_currency={}&from={}&to={}",
            self.base_url, coin_id, currency, from, to
        )
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl MarketDataGateway for CoinGeckoClient {
    async fn fetch_range(
        &self,
        coin_id: &str,
        currency: Currency,
        from: i64,
        to: i64,
    ) -> Result<Vec<RawSample>> {
        self.pacer.acquire().await;

        let url = self.range_url(coin_id, currency, from, to);
        debug!("CoinGecko request: {}", url);

        let mut request = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .header(ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        debug!("CoinGecko response: status {}, {} bytes", status, body.len());

        if !status.is_success() {
            return Err(IngestError::ProviderApiError {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }

        parse_prices(&body)
    }
}

/// Decode a market-chart body into time-ordered samples; short pairs are skipped
fn parse_prices(body: &str) -> Result<Vec<RawSample>> {
    let response: MarketChartRangeResponse = serde_json::from_str(body)
        .map_err(|e| IngestError::MappingError(format!("Malformed market chart response: {}", e)))?;

    let total = response.prices.len();
    let mut samples: Vec<RawSample> = response
        .prices
        .iter()
        .filter(|point| point.len() >= 2)
        .map(|point| RawSample::new(point[0].floor() as i64, point[1]))
        .collect();

    if samples.len() < total {
        debug!("Skipped {} malformed price points", total - samples.len());
    }

    samples.sort_by_key(|s| s.timestamp_ms);
    Ok(samples)
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= ERROR_BODY_LIMIT {
        return trimmed.to_string();
    }

    let mut end = ERROR_BODY_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
