/// Historical catch-up for a single token
///
/// Walks from the configured start (or the newest stored quote, whichever is
/// later) towards now in bounded chunks, then exits. The runner stays a
/// safety margin behind now so it never races the live collector on the
/// most recent seconds.
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::IngestPipeline;
use crate::config::TokenSettings;
use crate::error::{IngestError, Result};
use crate::types::Token;
use crate::utils::{format_window, now_seconds};

/// Gap kept between the backfill cursor and the live collector
pub const SAFETY_MARGIN_SECS: i64 = 60;

/// Window skip applied after a failed chunk
pub const RECOVERY_STEP_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillOutcome {
    /// Stored history was already recent enough
    UpToDate,
    /// Every chunk up to now was processed
    CaughtUp,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub token: Token,
    pub started_from: DateTime<Utc>,
    pub chunks: usize,
    pub quotes_saved: usize,
    pub errors: usize,
    pub outcome: BackfillOutcome,
}

pub struct BackfillRunner {
    token: Token,
    coin_id: String,
    start_from: DateTime<Utc>,
    chunk: Duration,
    sleep: std::time::Duration,
    pipeline: IngestPipeline,
}

impl BackfillRunner {
    pub fn new(
        token: Token,
        coin_id: String,
        start_from: DateTime<Utc>,
        chunk: Duration,
        sleep: std::time::Duration,
        pipeline: IngestPipeline,
    ) -> Self {
        BackfillRunner {
            token,
            coin_id,
            start_from,
            // A zero chunk would never advance
            chunk: chunk.max(Duration::seconds(1)),
            sleep,
            pipeline,
        }
    }

    /// Build a runner from resolved token settings.
    ///
    /// `Ok(None)` when backfill is disabled or no start date is configured;
    /// an unparsable start date is a `ConfigError`.
    pub fn from_settings(
        settings: &TokenSettings,
        coin_id: String,
        pipeline: IngestPipeline,
    ) -> Result<Option<Self>> {
        if !settings.backfill.enabled {
            return Ok(None);
        }

        Ok(settings.backfill.start()?.map(|start| {
            Self::new(
                settings.token,
                coin_id,
                start,
                settings.backfill.chunk,
                settings.backfill.sleep,
                pipeline,
            )
        }))
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub async fn run(&self, cancel: &CancellationToken) -> BackfillReport {
        self.run_until(now_seconds(), cancel).await
    }

    /// Catch up to `now`, which is fixed for the whole run
    pub async fn run_until(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> BackfillReport {
        let start = self.effective_start().await;
        let mut report = BackfillReport {
            token: self.token,
            started_from: start,
            chunks: 0,
            quotes_saved: 0,
            errors: 0,
            outcome: BackfillOutcome::UpToDate,
        };

        if start >= now - Duration::seconds(SAFETY_MARGIN_SECS) {
            info!("✅ Backfill up-to-date for {} (from {}) - skipping", self.token, start);
            return report;
        }

        info!(
            "📥 Starting backfill for {}: {} (chunk {} min)",
            self.token,
            format_window(start, now),
            self.chunk.num_minutes()
        );

        let mut from = start;
        while from < now {
            if cancel.is_cancelled() {
                report.outcome = BackfillOutcome::Cancelled;
                break;
            }

            let to = (from + self.chunk).min(now);
            report.chunks += 1;

            match self.process_chunk(from, to, cancel).await {
                Ok((saved, next)) => {
                    report.quotes_saved += saved;
                    from = next;
                }
                Err(IngestError::Cancelled(_)) => {
                    report.outcome = BackfillOutcome::Cancelled;
                    break;
                }
                Err(e) => {
                    report.errors += 1;
                    if e.is_recoverable() {
                        warn!(
                            "⚠️  Backfill chunk {} failed for {} [{}]: {} - skipping ahead {} min",
                            format_window(from, to),
                            self.token,
                            e.error_code(),
                            e,
                            RECOVERY_STEP_MINUTES
                        );
                    } else {
                        error!(
                            "❌ Backfill chunk {} failed for {} [{}]: {} - skipping ahead {} min",
                            format_window(from, to),
                            self.token,
                            e.error_code(),
                            e,
                            RECOVERY_STEP_MINUTES
                        );
                    }
                    from += Duration::minutes(RECOVERY_STEP_MINUTES);
                }
            }

            if from < now && !self.pause(cancel).await {
                report.outcome = BackfillOutcome::Cancelled;
                break;
            }
        }

        if report.outcome != BackfillOutcome::Cancelled {
            report.outcome = BackfillOutcome::CaughtUp;
        }

        info!(
            "🏁 Backfill for {} finished ({:?}): {} chunks, {} quotes saved, {} errors",
            self.token, report.outcome, report.chunks, report.quotes_saved, report.errors
        );

        report
    }

    /// Later of the configured start and the newest stored quote
    async fn effective_start(&self) -> DateTime<Utc> {
        match self.pipeline.store().last_timestamp(self.token).await {
            Ok(Some(last)) => last.max(self.start_from),
            Ok(None) => self.start_from,
            Err(e) => {
                warn!(
                    "⚠️  Could not read last timestamp for {}: {} - using configured start",
                    self.token, e
                );
                self.start_from
            }
        }
    }

    /// Process one chunk and return (saved, next cursor).
    ///
    /// A failed save is logged and the cursor still advances.
    async fn process_chunk(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(usize, DateTime<Utc>)> {
        debug!("Backfill chunk for {}: {}", self.token, format_window(from, to));

        let window = self
            .pipeline
            .fetch_aligned(self.token, &self.coin_id, from, to, cancel)
            .await?;

        // Continue after the last emitted record, or from the chunk end when empty
        let next = match window.last_timestamp() {
            Some(last) if last + Duration::seconds(1) > from => last + Duration::seconds(1),
            _ => to,
        };

        let aligned = window.quotes.len();
        let saved = match self.pipeline.persist(self.token, window.quotes).await {
            Ok(saved) => saved,
            Err(e) => {
                error!("❌ Backfill save failed for {}: {}", self.token, e);
                0
            }
        };

        debug!(
            "Backfill {} chunk: {} raw points, {} aligned, {} saved",
            self.token, window.raw_points, aligned, saved
        );

        Ok((saved, next))
    }

    /// Inter-chunk delay; `false` when cancelled while waiting
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        if self.sleep.is_zero() {
            return !cancel.is_cancelled();
        }

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(self.sleep) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{HybridQuoteStore, QuoteStore};
    use crate::testing::{quote_at, FailingStore, FakeGateway};
    use chrono::TimeZone;
    use std::sync::Arc;

    // Minute-aligned so per-minute samples land on chunk edges
    const T: i64 = 1_700_000_040;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn runner(
        gateway: Arc<FakeGateway>,
        store: Arc<dyn QuoteStore>,
        start: i64,
        chunk_minutes: i64,
    ) -> BackfillRunner {
        BackfillRunner::new(
            Token::Usdt,
            "tether".to_string(),
            ts(start),
            Duration::minutes(chunk_minutes),
            std::time::Duration::ZERO,
            IngestPipeline::new(gateway, store),
        )
    }

    #[tokio::test]
    async fn test_recent_history_needs_no_chunks() {
        let store = Arc::new(HybridQuoteStore::in_memory(&Token::all()));
        store.save_batch(Token::Usdt, &[quote_at(T, 1.0)]).await.unwrap();
        let gateway = Arc::new(FakeGateway::minutely());

        let report = runner(gateway.clone(), store, T - 10 * 86_400, 5)
            .run_until(ts(T + 5), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, BackfillOutcome::UpToDate);
        assert_eq!(report.started_from, ts(T));
        assert_eq!(report.chunks, 0);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_walks_chunks_until_now() {
        let store = Arc::new(HybridQuoteStore::in_memory(&Token::all()));
        let gateway = Arc::new(FakeGateway::minutely());

        let report = runner(gateway.clone(), store.clone(), T, 5)
            .run_until(ts(T + 20 * 60), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, BackfillOutcome::CaughtUp);
        assert_eq!(report.errors, 0);
        // One sample per minute from T to T+20min inclusive
        assert_eq!(report.quotes_saved, 21);
        assert_eq!(store.count(Token::Usdt).await.unwrap(), 21);

        let windows = gateway.windows();
        assert_eq!(windows.first(), Some(&(T, T + 300)));
        assert_eq!(windows.last().map(|w| w.1), Some(T + 20 * 60));
        for pair in windows.windows(2) {
            assert!(pair[1].0 > pair[0].0, "cursor must strictly advance");
        }
    }

    #[tokio::test]
    async fn test_provider_failure_skips_ahead() {
        // Only the very first request fails
        let gateway = Arc::new(FakeGateway::with(|_, _, from, _| {
            if from == T {
                Err(IngestError::ProviderApiError {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            } else {
                Ok(Vec::new())
            }
        }));
        let store = Arc::new(HybridQuoteStore::in_memory(&Token::all()));

        let report = runner(gateway.clone(), store, T, 5)
            .run_until(ts(T + 30 * 60), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, BackfillOutcome::CaughtUp);
        assert_eq!(report.errors, 1);
        assert_eq!(
            gateway.windows(),
            vec![
                (T, T + 300),
                (T + 900, T + 1200),
                (T + 1200, T + 1500),
                (T + 1500, T + 1800),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_chunks_still_advance() {
        let gateway = Arc::new(FakeGateway::empty());
        let store = Arc::new(HybridQuoteStore::in_memory(&Token::all()));

        let report = runner(gateway.clone(), store, T, 10)
            .run_until(ts(T + 25 * 60), &CancellationToken::new())
            .await;

        assert_eq!(report.chunks, 3);
        assert_eq!(report.quotes_saved, 0);
        assert_eq!(gateway.windows(), vec![(T, T + 600), (T + 600, T + 1200), (T + 1200, T + 1500)]);
    }

    #[tokio::test]
    async fn test_storage_failures_are_not_fatal() {
        let gateway = Arc::new(FakeGateway::minutely());
        let store: Arc<dyn QuoteStore> = Arc::new(FailingStore::default());

        let report = runner(gateway.clone(), store, T, 5)
            .run_until(ts(T + 10 * 60), &CancellationToken::new())
            .await;

        // Last-timestamp read failed, so the configured start is used
        assert_eq!(report.started_from, ts(T));
        assert_eq!(report.outcome, BackfillOutcome::CaughtUp);
        assert_eq!(report.quotes_saved, 0);
        assert_eq!(report.errors, 0);
        assert_eq!(gateway.windows().first(), Some(&(T, T + 300)));
    }

    #[tokio::test]
    async fn test_cancel_stops_runner() {
        let gateway = Arc::new(FakeGateway::hanging());
        let store = Arc::new(HybridQuoteStore::in_memory(&Token::all()));
        let cancel = CancellationToken::new();

        let runner = runner(gateway, store, T, 5);
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run_until(ts(T + 3600), &cancel).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let report = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcome, BackfillOutcome::Cancelled);
        assert_eq!(report.chunks, 1);
    }

    #[test]
    fn test_from_settings_requires_start_date() {
        let mut config = crate::config::Config::default();
        config.backfill.enabled = true;
        let settings = config.token_settings(Token::Mvrk);
        let pipeline = || {
            IngestPipeline::new(
                Arc::new(FakeGateway::empty()),
                Arc::new(HybridQuoteStore::in_memory(&Token::all())),
            )
        };

        assert!(BackfillRunner::from_settings(&settings, "mavryk-network".into(), pipeline())
            .unwrap()
            .is_none());

        config.backfill.start_from = "2025-09-18".to_string();
        let settings = config.token_settings(Token::Mvrk);
        let runner = BackfillRunner::from_settings(&settings, "mavryk-network".into(), pipeline())
            .unwrap()
            .unwrap();
        assert_eq!(runner.token(), Token::Mvrk);

        config.backfill.start_from = "yesterday".to_string();
        let settings = config.token_settings(Token::Mvrk);
        assert!(matches!(
            BackfillRunner::from_settings(&settings, "mavryk-network".into(), pipeline()),
            Err(IngestError::ConfigError(_))
        ));
    }
}
