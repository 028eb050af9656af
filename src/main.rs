/// Main entry point for the quote ingestion service
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use coinquotes::{
    collector::TokenScheduler,
    config::load_config,
    data::HybridQuoteStore,
    provider::CoinGeckoClient,
    utils::{init_logging, RequestPacer},
    Config, Token,
};

/// Upper bound on waiting for workers after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state
pub struct IngestApp {
    config: Arc<Config>,
    scheduler: TokenScheduler,
    shutdown: CancellationToken,
}

impl IngestApp {
    pub async fn new(config_path: &str) -> anyhow::Result<Self> {
        let config = Arc::new(load_config(config_path)?);
        init_logging(&config.logging.level, config.logging.json);

        info!("Starting quote ingestion service...");
        info!("Configuration loaded from {}", config_path);

        let store = Arc::new(HybridQuoteStore::open(&config.storage.data_dir, &Token::all()).await?);

        let pacer = Arc::new(RequestPacer::new(config.api.rate_limit_rps));
        let gateways = CoinGeckoClient::factory(config.coingecko.clone(), pacer)?;
        if config.coingecko.api_key.trim().is_empty() {
            info!("No CoinGecko API key configured - using the public rate tier");
        }

        let scheduler = TokenScheduler::new(Arc::clone(&config), store, gateways);

        Ok(IngestApp {
            config,
            scheduler,
            shutdown: CancellationToken::new(),
        })
    }

    /// Run until Ctrl+C or SIGTERM, then stop the workers
    pub async fn run(&self) -> anyhow::Result<()> {
        self.setup_shutdown_handler();

        self.scheduler.start(&self.shutdown).await?;
        info!(
            "Service running (interval {}s, backfill {})",
            self.config.job.interval_seconds,
            if self.config.backfill.enabled { "on" } else { "off" }
        );

        self.shutdown.cancelled().await;
        info!("Shutdown signal received - stopping workers");

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.scheduler.stop()).await {
            Ok(()) => info!("Shutdown completed"),
            Err(_) => warn!(
                "⚠️  Workers did not stop within {}s - exiting anyway",
                SHUTDOWN_TIMEOUT.as_secs()
            ),
        }

        Ok(())
    }

    fn setup_shutdown_handler(&self) {
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown.cancel();
        });
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to listen for SIGTERM: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Ctrl+C received - initiating graceful shutdown");
        }
        _ = terminate.recv() => info!("SIGTERM received - initiating graceful shutdown"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received - initiating graceful shutdown"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

    let app = IngestApp::new(&config_path).await?;

    app.run().await?;

    Ok(())
}
