/// Multi-currency timestamp alignment
///
/// Each currency series is sampled independently by the provider, so the
/// raw points rarely share timestamps. Alignment snaps every sample to its
/// whole second, walks the union of seconds in order and fills gaps with
/// the last known value of each currency.
use std::collections::{BTreeSet, HashMap};

use crate::error::{IngestError, Result};
use crate::provider::CurrencySeries;
use crate::types::{Currency, CurrencyPrices, Quote};

pub struct QuoteAligner {
    currencies: Vec<Currency>,
}

impl Default for QuoteAligner {
    fn default() -> Self {
        Self::new(&Currency::ALL)
    }
}

impl QuoteAligner {
    pub fn new(currencies: &[Currency]) -> Self {
        QuoteAligner {
            currencies: currencies.to_vec(),
        }
    }

    pub fn currencies(&self) -> &[Currency] {
        &self.currencies
    }

    /// Merge raw series into ascending, one-per-second quotes
    pub fn align(&self, series: &CurrencySeries) -> Result<Vec<Quote>> {
        if series.is_empty() {
            return Ok(Vec::new());
        }

        let mut seconds = BTreeSet::new();
        let mut by_second: HashMap<Currency, HashMap<i64, f64>> = HashMap::new();

        for (currency, samples) in series {
            let prices = by_second.entry(*currency).or_default();
            for sample in samples {
                if !sample.price.is_finite() {
                    return Err(IngestError::MappingError(format!(
                        "Non-finite {} price at {}ms",
                        currency, sample.timestamp_ms
                    )));
                }
                // Later samples within the same second win
                prices.insert(sample.second(), sample.price);
                seconds.insert(sample.second());
            }
        }

        let mut quotes = Vec::with_capacity(seconds.len());
        let mut previous: Option<CurrencyPrices> = None;

        for second in seconds {
            let mut prices = CurrencyPrices::default();
            for currency in &self.currencies {
                let exact = by_second
                    .get(currency)
                    .and_then(|points| points.get(&second).copied());
                let value = exact.or_else(|| previous.and_then(|p| p.get(*currency)));
                prices.set(*currency, value);
            }

            if !prices.has_any() {
                continue;
            }

            let quote = Quote::at_second(second, prices).ok_or_else(|| {
                IngestError::MappingError(format!("Timestamp out of range: {}s", second))
            })?;
            previous = Some(prices);
            quotes.push(quote);
        }

        Ok(quotes)
    }
}
