pub mod coingecko;
pub mod gateway;

pub use coingecko::CoinGeckoClient;
pub use gateway::{CurrencySeries, GatewayFactory, MarketDataGateway};
