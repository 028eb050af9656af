/// One ingestion pass over a time window: fetch → align → dedup → persist
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::data::{DedupFilter, QuoteAligner, QuoteStore};
use crate::error::{IngestError, Result};
use crate::provider::MarketDataGateway;
use crate::types::{Quote, Token};
use crate::utils::format_window;

/// What a single window produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowOutcome {
    pub raw_points: usize,
    pub aligned: usize,
    pub saved: usize,
    /// Timestamp of the last aligned record, before dedup
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Aligned quotes for one window, not yet deduplicated
#[derive(Debug, Clone, Default)]
pub struct AlignedWindow {
    pub raw_points: usize,
    pub quotes: Vec<Quote>,
}

impl AlignedWindow {
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.quotes.last().map(Quote::timestamp)
    }
}

pub struct IngestPipeline {
    gateway: Arc<dyn MarketDataGateway>,
    store: Arc<dyn QuoteStore>,
    aligner: QuoteAligner,
    dedup: DedupFilter,
}

impl IngestPipeline {
    pub fn new(gateway: Arc<dyn MarketDataGateway>, store: Arc<dyn QuoteStore>) -> Self {
        IngestPipeline {
            gateway,
            dedup: DedupFilter::new(Arc::clone(&store)),
            store,
            aligner: QuoteAligner::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn QuoteStore> {
        &self.store
    }

    /// Fetch every currency for the window and align the result.
    ///
    /// Cancellation is honoured while the provider is being queried.
    pub async fn fetch_aligned(
        &self,
        token: Token,
        coin_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<AlignedWindow> {
        let fetch = self.gateway.fetch_all_currencies(
            coin_id,
            self.aligner.currencies(),
            from.timestamp(),
            to.timestamp(),
        );

        let series = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(IngestError::Cancelled(format!("{} fetch interrupted", token)));
            }
            series = fetch => series?,
        };

        let raw_points = series.values().map(Vec::len).sum();
        let quotes = self.aligner.align(&series)?;

        debug!(
            "{} window {}: {} raw points, {} aligned",
            token,
            format_window(from, to),
            raw_points,
            quotes.len()
        );

        Ok(AlignedWindow { raw_points, quotes })
    }

    /// Drop already-stored seconds and write the rest as one batch
    pub async fn persist(&self, token: Token, quotes: Vec<Quote>) -> Result<usize> {
        let fresh = self.dedup.filter_new(token, quotes).await;
        if fresh.is_empty() {
            return Ok(0);
        }
        self.store.save_batch(token, &fresh).await
    }

    /// Run one window end to end. Once aligned, the batch is persisted in full.
    pub async fn ingest_window(
        &self,
        token: Token,
        coin_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<WindowOutcome> {
        let window = self.fetch_aligned(token, coin_id, from, to, cancel).await?;
        let raw_points = window.raw_points;
        let aligned = window.quotes.len();
        let last_timestamp = window.last_timestamp();

        let saved = self.persist(token, window.quotes).await?;

        Ok(WindowOutcome {
            raw_points,
            aligned,
            saved,
            last_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::HybridQuoteStore;
    use crate::testing::FakeGateway;
    use crate::types::{Currency, RawSample};
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn pipeline(gateway: Arc<FakeGateway>) -> (IngestPipeline, Arc<HybridQuoteStore>) {
        let store = Arc::new(HybridQuoteStore::in_memory(&Token::all()));
        (IngestPipeline::new(gateway, store.clone()), store)
    }

    #[tokio::test]
    async fn test_window_queries_every_currency() {
        let gateway = Arc::new(FakeGateway::minutely());
        let (pipeline, store) = pipeline(gateway.clone());

        let outcome = pipeline
            .ingest_window(Token::Usdt, "tether", ts(0), ts(300), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.raw_points, 6);
        assert_eq!(outcome.aligned, 6);
        assert_eq!(outcome.saved, 6);
        assert_eq!(outcome.last_timestamp, Some(ts(300)));
        assert_eq!(store.count(Token::Usdt).await.unwrap(), 6);

        let calls = gateway.calls();
        assert_eq!(calls.len(), Currency::ALL.len());
        assert!(calls.iter().all(|c| c.coin_id == "tether" && c.from == 0 && c.to == 300));
    }

    #[tokio::test]
    async fn test_repeated_window_is_idempotent() {
        let gateway = Arc::new(FakeGateway::with(|_, currency, _, _| {
            Ok(match currency {
                Currency::Usd => vec![RawSample::new(1_000, 100.0), RawSample::new(3_000, 102.0)],
                Currency::Btc => vec![RawSample::new(2_000, 0.01)],
                _ => Vec::new(),
            })
        }));
        let (pipeline, store) = pipeline(gateway);
        let cancel = CancellationToken::new();

        let first = pipeline
            .ingest_window(Token::Mvrk, "mavryk-network", ts(0), ts(10), &cancel)
            .await
            .unwrap();
        let after_first = store.quotes_in_range(Token::Mvrk, ts(0), ts(10), None).await.unwrap();

        let second = pipeline
            .ingest_window(Token::Mvrk, "mavryk-network", ts(0), ts(10), &cancel)
            .await
            .unwrap();
        let after_second = store.quotes_in_range(Token::Mvrk, ts(0), ts(10), None).await.unwrap();

        assert_eq!(first.saved, 3);
        assert_eq!(second.saved, 0);
        assert_eq!(second.aligned, 3);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_provider_error_propagates_without_writes() {
        let gateway = Arc::new(FakeGateway::with(|_, _, _, _| {
            Err(IngestError::ProviderApiError {
                status: 429,
                message: "Too Many Requests".to_string(),
            })
        }));
        let (pipeline, store) = pipeline(gateway.clone());

        let err = pipeline
            .ingest_window(Token::Usdt, "tether", ts(0), ts(60), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_provider_error());
        // First failure aborts the remaining currencies
        assert_eq!(gateway.calls().len(), 1);
        assert_eq!(store.count(Token::Usdt).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_fetch() {
        let gateway = Arc::new(FakeGateway::hanging());
        let (pipeline, store) = pipeline(gateway);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline
            .ingest_window(Token::Usdt, "tether", ts(0), ts(60), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Cancelled(_)));
        assert_eq!(store.count(Token::Usdt).await.unwrap(), 0);
    }
}
