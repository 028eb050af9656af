/// Per-token orchestration of backfill and periodic live collection
use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::{Barrier, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::{BackfillRunner, IngestPipeline, WindowOutcome};
use crate::config::{BackfillGate, Config, TokenSettings};
use crate::data::QuoteStore;
use crate::error::{IngestError, Result};
use crate::provider::GatewayFactory;
use crate::types::Token;
use crate::utils::{format_window, now_seconds};

/// Lookback used when a token has no readable history
pub const DEFAULT_LOOKBACK_MINUTES: i64 = 60;

/// Single collection cycle for one token
pub struct LiveCollector {
    token: Token,
    coin_id: String,
    min_time_range: Duration,
    pipeline: IngestPipeline,
}

impl LiveCollector {
    pub fn new(settings: &TokenSettings, coin_id: String, pipeline: IngestPipeline) -> Self {
        LiveCollector {
            token: settings.token,
            coin_id,
            min_time_range: settings.min_time_range,
            pipeline,
        }
    }

    pub async fn collect_once(&self, cancel: &CancellationToken) -> Option<WindowOutcome> {
        self.collect_once_at(now_seconds(), cancel).await
    }

    /// Fetch everything since the newest stored quote, up to `now`.
    ///
    /// Spans shorter than the minimum range are skipped without touching the
    /// provider. Errors are logged and end the cycle.
    pub async fn collect_once_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<WindowOutcome> {
        let from = match self.pipeline.store().last_timestamp(self.token).await {
            Ok(Some(last)) => last,
            Ok(None) => now - Duration::minutes(DEFAULT_LOOKBACK_MINUTES),
            Err(e) => {
                warn!(
                    "⚠️  Could not read last timestamp for {}: {} - looking back {} min",
                    self.token, e, DEFAULT_LOOKBACK_MINUTES
                );
                now - Duration::minutes(DEFAULT_LOOKBACK_MINUTES)
            }
        };

        if now - from < self.min_time_range {
            debug!(
                "Skipping {} cycle: {}s since last quote (minimum {}s)",
                self.token,
                (now - from).num_seconds(),
                self.min_time_range.num_seconds()
            );
            return None;
        }

        // Always up to now, so a sparse span keeps growing until data lands
        match self
            .pipeline
            .ingest_window(self.token, &self.coin_id, from, now, cancel)
            .await
        {
            Ok(outcome) => {
                info!(
                    "💾 {} {}: {} raw points, {} aligned, {} saved",
                    self.token,
                    format_window(from, now),
                    outcome.raw_points,
                    outcome.aligned,
                    outcome.saved
                );
                Some(outcome)
            }
            Err(IngestError::Cancelled(_)) => None,
            Err(e) if e.is_recoverable() => {
                warn!(
                    "⚠️  Collection cycle failed for {} [{}]: {} - retrying next tick",
                    self.token,
                    e.error_code(),
                    e
                );
                None
            }
            Err(e) => {
                error!(
                    "❌ Collection cycle failed for {} [{}]: {}",
                    self.token,
                    e.error_code(),
                    e
                );
                None
            }
        }
    }
}

/// Everything one token's task needs
struct TokenWorker {
    token: Token,
    interval: std::time::Duration,
    live: bool,
    backfill: Option<BackfillRunner>,
    collector: LiveCollector,
    gate: Option<Arc<Barrier>>,
}

impl TokenWorker {
    async fn run(self, cancel: CancellationToken) {
        if let Some(runner) = &self.backfill {
            runner.run(&cancel).await;
        }

        if let Some(gate) = &self.gate {
            debug!("{} waiting for every backfill to finish", self.token);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = gate.wait() => {}
            }
        }

        if !self.live {
            info!("Live collection disabled - {} worker done", self.token);
            return;
        }

        info!(
            "📡 Live collection for {} every {}s",
            self.token,
            self.interval.as_secs()
        );

        // First tick fires immediately
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.collector.collect_once(&cancel).await;
                }
            }
        }

        debug!("{} worker exiting", self.token);
    }
}

enum SchedulerState {
    Idle,
    Running {
        cancel: CancellationToken,
        workers: Vec<(Token, JoinHandle<()>)>,
    },
    Stopped,
}

/// Owns the per-token workers
pub struct TokenScheduler {
    config: Arc<Config>,
    store: Arc<dyn QuoteStore>,
    gateways: GatewayFactory,
    state: Mutex<SchedulerState>,
}

impl TokenScheduler {
    pub fn new(config: Arc<Config>, store: Arc<dyn QuoteStore>, gateways: GatewayFactory) -> Self {
        TokenScheduler {
            config,
            store,
            gateways,
            state: Mutex::new(SchedulerState::Idle),
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, SchedulerState::Running { .. })
    }

    /// Spawn one worker per enabled token.
    ///
    /// Cancelling `parent` unwinds every worker just like `stop` does.
    pub async fn start(&self, parent: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, SchedulerState::Running { .. }) {
            return Err(IngestError::AlreadyRunning);
        }

        for key in self.config.unknown_token_keys() {
            warn!("⚠️  Ignoring configuration for unsupported token '{}'", key);
        }

        let mut workers: Vec<TokenWorker> = Token::all()
            .into_iter()
            .filter_map(|token| self.build_worker(token))
            .collect();

        if workers.is_empty() {
            warn!("⚠️  No tokens enabled - scheduler has nothing to do");
        }

        if self.config.backfill.gate == BackfillGate::Global && !workers.is_empty() {
            let barrier = Arc::new(Barrier::new(workers.len()));
            for worker in &mut workers {
                worker.gate = Some(Arc::clone(&barrier));
            }
        }

        let cancel = parent.child_token();
        let handles = workers
            .into_iter()
            .map(|worker| {
                let token = worker.token;
                let handle = tokio::spawn(worker.run(cancel.clone()));
                (token, handle)
            })
            .collect::<Vec<_>>();

        info!(
            "🚀 Scheduler started with {} token workers (backfill gate: {:?})",
            handles.len(),
            self.config.backfill.gate
        );

        *state = SchedulerState::Running {
            cancel,
            workers: handles,
        };
        Ok(())
    }

    /// Cancel every worker and wait for each to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, SchedulerState::Stopped)
        };

        let SchedulerState::Running { cancel, workers } = previous else {
            debug!("Scheduler not running - nothing to stop");
            return;
        };

        info!("🛑 Stopping {} token workers...", workers.len());
        cancel.cancel();

        let (tokens, handles): (Vec<Token>, Vec<JoinHandle<()>>) = workers.into_iter().unzip();
        let results = join_all(handles).await;

        for (token, result) in tokens.into_iter().zip(results) {
            match result {
                Ok(()) => debug!("{} worker stopped", token),
                Err(e) => error!("❌ {} worker ended abnormally: {}", token, e),
            }
        }

        info!("✅ Scheduler stopped");
    }

    fn build_worker(&self, token: Token) -> Option<TokenWorker> {
        let settings = self.config.token_settings(token);
        if !settings.enabled {
            info!("Token {} disabled - skipping", token);
            return None;
        }

        let coin_id = match self.config.coin_id(token) {
            Ok(id) => id,
            Err(e) => {
                warn!("⚠️  Skipping {}: {}", token, e);
                return None;
            }
        };

        let gateway = (self.gateways)(token, settings.timeout);
        let pipeline = || IngestPipeline::new(Arc::clone(&gateway), Arc::clone(&self.store));

        let backfill = match BackfillRunner::from_settings(&settings, coin_id.clone(), pipeline()) {
            Ok(Some(runner)) => Some(runner),
            Ok(None) => {
                if settings.backfill.enabled {
                    info!("Backfill enabled for {} but no start date set - skipping", token);
                }
                None
            }
            Err(e) => {
                warn!("⚠️  Backfill skipped for {}: {}", token, e);
                None
            }
        };

        Some(TokenWorker {
            token,
            interval: settings.interval.max(std::time::Duration::from_secs(1)),
            live: self.config.job_enabled(),
            backfill,
            collector: LiveCollector::new(&settings, coin_id, pipeline()),
            gate: None,
        })
    }
}
