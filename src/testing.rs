/// Shared test doubles
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::data::QuoteStore;
use crate::error::{IngestError, Result};
use crate::provider::{GatewayFactory, MarketDataGateway};
use crate::types::{Currency, CurrencyPrices, Quote, RawSample, Token};

/// Quote at a unix second with only a USD price
pub fn quote_at(second: i64, usd: f64) -> Quote {
    let mut prices = CurrencyPrices::default();
    prices.set(Currency::Usd, Some(usd));
    Quote::at_second(second, prices).unwrap()
}

type Responder = dyn Fn(&str, Currency, i64, i64) -> Result<Vec<RawSample>> + Send + Sync;
type HangRule = dyn Fn(&str) -> bool + Send + Sync;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCall {
    pub coin_id: String,
    pub currency: Currency,
    pub from: i64,
    pub to: i64,
}

/// Scripted provider recording every range request
pub struct FakeGateway {
    responder: Box<Responder>,
    calls: Mutex<Vec<GatewayCall>>,
    hang: Box<HangRule>,
}

impl FakeGateway {
    pub fn with<F>(responder: F) -> Self
    where
        F: Fn(&str, Currency, i64, i64) -> Result<Vec<RawSample>> + Send + Sync + 'static,
    {
        FakeGateway {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            hang: Box::new(|_: &str| false),
        }
    }

    /// Every request succeeds with no samples
    pub fn empty() -> Self {
        Self::with(|_, _, _, _| Ok(Vec::new()))
    }

    /// One USD sample per minute inside the requested window, other currencies empty
    pub fn minutely() -> Self {
        Self::with(|_, currency, from, to| {
            if currency != Currency::Usd {
                return Ok(Vec::new());
            }
            let first = (from + 59).div_euclid(60) * 60;
            Ok((first..=to)
                .step_by(60)
                .map(|s| RawSample::new(s * 1000, 1.0))
                .collect())
        })
    }

    /// Requests never complete
    pub fn hanging() -> Self {
        FakeGateway {
            hang: Box::new(|_: &str| true),
            ..Self::empty()
        }
    }

    /// Requests for `coin_id` never complete, others behave like `minutely`
    pub fn hanging_for(coin_id: &str) -> Self {
        let coin_id = coin_id.to_string();
        FakeGateway {
            hang: Box::new(move |requested: &str| requested == coin_id),
            ..Self::minutely()
        }
    }

    pub fn requested_coin(&self, coin_id: &str) -> bool {
        self.calls().iter().any(|call| call.coin_id == coin_id)
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Distinct `(from, to)` windows in request order
    pub fn windows(&self) -> Vec<(i64, i64)> {
        let mut windows: Vec<(i64, i64)> = Vec::new();
        for call in self.calls() {
            if windows.last() != Some(&(call.from, call.to)) {
                windows.push((call.from, call.to));
            }
        }
        windows
    }

    /// Factory handing out this gateway to every token
    pub fn factory(self: &Arc<Self>) -> GatewayFactory {
        let gateway = Arc::clone(self);
        Arc::new(move |_: Token, _: Duration| Arc::clone(&gateway) as Arc<dyn MarketDataGateway>)
    }
}

#[async_trait]
impl MarketDataGateway for FakeGateway {
    async fn fetch_range(
        &self,
        coin_id: &str,
        currency: Currency,
        from: i64,
        to: i64,
    ) -> Result<Vec<RawSample>> {
        self.calls.lock().unwrap().push(GatewayCall {
            coin_id: coin_id.to_string(),
            currency,
            from,
            to,
        });

        if (self.hang)(coin_id) {
            std::future::pending::<()>().await;
        }

        (self.responder)(coin_id, currency, from, to)
    }
}

/// Store whose every operation fails
#[derive(Default)]
pub struct FailingStore {
    range_reads: AtomicUsize,
}

impl FailingStore {
    pub fn range_reads(&self) -> usize {
        self.range_reads.load(Ordering::SeqCst)
    }
}

fn unavailable() -> IngestError {
    IngestError::PersistenceError("store unavailable".to_string())
}

#[async_trait]
impl QuoteStore for FailingStore {
    async fn save_batch(&self, _token: Token, _quotes: &[Quote]) -> Result<usize> {
        Err(unavailable())
    }

    async fn last_timestamp(&self, _token: Token) -> Result<Option<DateTime<Utc>>> {
        Err(unavailable())
    }

    async fn quotes_in_range(
        &self,
        _token: Token,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        _limit: Option<usize>,
    ) -> Result<Vec<Quote>> {
        self.range_reads.fetch_add(1, Ordering::SeqCst);
        Err(unavailable())
    }

    async fn last_quote(&self, _token: Token) -> Result<Option<Quote>> {
        Err(unavailable())
    }

    async fn count(&self, _token: Token) -> Result<usize> {
        Err(unavailable())
    }
}
