/// Standalone utility to backfill one token's history and exit
/// Usage: cargo run --bin backfill_token --release -- <mvrk|usdt>

use coinquotes::collector::{BackfillOutcome, BackfillRunner, IngestPipeline};
use coinquotes::config::load_config;
use coinquotes::data::{HybridQuoteStore, QuoteStore};
use coinquotes::provider::CoinGeckoClient;
use coinquotes::utils::{init_logging, RequestPacer};
use coinquotes::Token;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let token: Token = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => {
            eprintln!("Usage: backfill_token <mvrk|usdt>");
            std::process::exit(2);
        }
    };

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Arc::new(load_config(&config_path)?);
    init_logging(&config.logging.level, config.logging.json);

    info!("🚀 Backfill utility for {}", token);
    info!("==========================");

    let mut settings = config.token_settings(token);
    if !settings.backfill.enabled {
        // Running this tool is an explicit request
        warn!("⚠️  Backfill is disabled for {} in configuration - running anyway", token);
        settings.backfill.enabled = true;
    }

    let coin_id = config.coin_id(token)?;
    let store: Arc<dyn QuoteStore> =
        Arc::new(HybridQuoteStore::open(&config.storage.data_dir, &[token]).await?);
    let pacer = Arc::new(RequestPacer::new(config.api.rate_limit_rps));
    let gateways = CoinGeckoClient::factory(config.coingecko.clone(), pacer)?;
    let pipeline = IngestPipeline::new(gateways(token, settings.timeout), Arc::clone(&store));

    let Some(runner) = BackfillRunner::from_settings(&settings, coin_id, pipeline)? else {
        error!("❌ No backfill start date configured for {}", token);
        info!("💡 Set backfill.start_from or tokens.{}.backfill.start_from", token);
        return Ok(());
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received - stopping after the current chunk");
                cancel.cancel();
            }
        });
    }

    let report = runner.run(&cancel).await;

    info!("");
    info!("📊 Summary:");
    info!("   Started from: {}", report.started_from);
    info!("   Chunks: {}", report.chunks);
    info!("   Quotes saved: {}", report.quotes_saved);
    info!("   Errors: {}", report.errors);
    info!("   Stored total: {}", store.count(token).await?);

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.outcome == BackfillOutcome::Cancelled {
        warn!("⚠️  Backfill interrupted - rerun to continue from the last stored quote");
    }

    Ok(())
}
