/// Show stored quote status - row count and latest quote per token
use coinquotes::config::load_config;
use coinquotes::data::{HybridQuoteStore, QuoteStore};
use coinquotes::utils::now_seconds;
use coinquotes::{Currency, Token};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("📊 Quote Storage Status");
    println!("=======================\n");

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config(&config_path)?;
    let data_dir = &config.storage.data_dir;

    if !std::path::Path::new(data_dir).exists() {
        println!("❌ No quote data found in {}", data_dir);
        println!("\n💡 To start collecting, run:");
        println!("   cargo run --release");
        return Ok(());
    }

    let store = HybridQuoteStore::open(data_dir, &Token::all()).await?;
    let now = now_seconds();

    for token in Token::all() {
        let count = store.count(token).await?;
        println!("🪙 {} ({} rows)", token.as_str().to_uppercase(), count);

        let Some(quote) = store.last_quote(token).await? else {
            println!("   No quotes stored yet\n");
            continue;
        };

        let age = (now - quote.timestamp()).num_seconds();
        println!("   Latest: {} ({}s ago)", quote.timestamp(), age);
        for currency in Currency::ALL {
            match quote.price(currency) {
                Some(price) => println!("   {:>4}: {}", currency.as_str().to_uppercase(), price),
                None => println!("   {:>4}: -", currency.as_str().to_uppercase()),
            }
        }
        println!();
    }

    Ok(())
}
