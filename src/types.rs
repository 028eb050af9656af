/// Core type definitions for the quote ingestion pipeline
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IngestError;

/// Tokens whose price series are collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Token {
    Mvrk,
    Usdt,
}

impl Token {
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Mvrk => "mvrk",
            Token::Usdt => "usdt",
        }
    }

    /// Default CoinGecko coin identifier
    pub fn coin_id(&self) -> &'static str {
        match self {
            Token::Mvrk => "mavryk-network",
            Token::Usdt => "tether",
        }
    }

    pub fn all() -> Vec<Token> {
        vec![Token::Mvrk, Token::Usdt]
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Token {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mvrk" => Ok(Token::Mvrk),
            "usdt" => Ok(Token::Usdt),
            other => Err(IngestError::UnsupportedToken(other.to_string())),
        }
    }
}

/// Quote denominations tracked for every token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Btc,
    Usd,
    Eur,
    Cny,
    Jpy,
    Krw,
    Eth,
    Gbp,
}

impl Currency {
    pub const ALL: [Currency; 8] = [
        Currency::Btc,
        Currency::Usd,
        Currency::Eur,
        Currency::Cny,
        Currency::Jpy,
        Currency::Krw,
        Currency::Eth,
        Currency::Gbp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Btc => "btc",
            Currency::Usd => "usd",
            Currency::Eur => "eur",
            Currency::Cny => "cny",
            Currency::Jpy => "jpy",
            Currency::Krw => "krw",
            Currency::Eth => "eth",
            Currency::Gbp => "gbp",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One price slot per currency; `None` means no sample seen yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyPrices {
    #[serde(default)]
    pub btc: Option<f64>,
    #[serde(default)]
    pub usd: Option<f64>,
    #[serde(default)]
    pub eur: Option<f64>,
    #[serde(default)]
    pub cny: Option<f64>,
    #[serde(default)]
    pub jpy: Option<f64>,
    #[serde(default)]
    pub krw: Option<f64>,
    #[serde(default)]
    pub eth: Option<f64>,
    #[serde(default)]
    pub gbp: Option<f64>,
}

impl CurrencyPrices {
    pub fn get(&self, currency: Currency) -> Option<f64> {
        match currency {
            Currency::Btc => self.btc,
            Currency::Usd => self.usd,
            Currency::Eur => self.eur,
            Currency::Cny => self.cny,
            Currency::Jpy => self.jpy,
            Currency::Krw => self.krw,
            Currency::Eth => self.eth,
            Currency::Gbp => self.gbp,
        }
    }

    pub fn set(&mut self, currency: Currency, price: Option<f64>) {
        let slot = match currency {
            Currency::Btc => &mut self.btc,
            Currency::Usd => &mut self.usd,
            Currency::Eur => &mut self.eur,
            Currency::Cny => &mut self.cny,
            Currency::Jpy => &mut self.jpy,
            Currency::Krw => &mut self.krw,
            Currency::Eth => &mut self.eth,
            Currency::Gbp => &mut self.gbp,
        };
        *slot = price;
    }

    pub fn has_any(&self) -> bool {
        Currency::ALL.iter().any(|c| self.get(*c).is_some())
    }
}

/// Aligned multi-currency price record for one second
///
/// Identity within storage is (token, timestamp); the token is the
/// partition key and is not carried on the record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    prices: CurrencyPrices,
}

impl Quote {
    pub fn new(timestamp: DateTime<Utc>, prices: CurrencyPrices) -> Self {
        Quote { timestamp, prices }
    }

    /// Build a quote at a whole unix second, `None` if the second is out of range
    pub fn at_second(unix_seconds: i64, prices: CurrencyPrices) -> Option<Self> {
        let timestamp = Utc.timestamp_opt(unix_seconds, 0).single()?;
        Some(Quote { timestamp, prices })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn unix_seconds(&self) -> i64 {
        self.timestamp.timestamp()
    }

    pub fn price(&self, currency: Currency) -> Option<f64> {
        self.prices.get(currency)
    }

    pub fn prices(&self) -> &CurrencyPrices {
        &self.prices
    }
}

/// Raw provider sample: epoch milliseconds and price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub timestamp_ms: i64,
    pub price: f64,
}

impl RawSample {
    pub fn new(timestamp_ms: i64, price: f64) -> Self {
        RawSample { timestamp_ms, price }
    }

    /// Whole second containing this sample
    pub fn second(&self) -> i64 {
        self.timestamp_ms.div_euclid(1000)
    }
}
