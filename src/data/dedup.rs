/// Filter candidate quotes against already-persisted history
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::data::QuoteStore;
use crate::types::{Quote, Token};

pub struct DedupFilter {
    store: Arc<dyn QuoteStore>,
}

impl DedupFilter {
    pub fn new(store: Arc<dyn QuoteStore>) -> Self {
        DedupFilter { store }
    }

    /// Keep candidates whose second is not stored yet.
    ///
    /// `candidates` must be ascending by timestamp. If the existence check
    /// fails the full list is returned so ingestion is not blocked.
    pub async fn filter_new(&self, token: Token, candidates: Vec<Quote>) -> Vec<Quote> {
        let (from, to) = match (candidates.first(), candidates.last()) {
            (Some(first), Some(last)) => (first.timestamp(), last.timestamp()),
            _ => return candidates,
        };

        let existing = match self.store.quotes_in_range(token, from, to, None).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(
                    "⚠️  Could not check existing quotes for {}: {} - keeping all {} candidates",
                    token,
                    e,
                    candidates.len()
                );
                return candidates;
            }
        };

        let stored: HashSet<i64> = existing.iter().map(Quote::unix_seconds).collect();
        let total = candidates.len();
        let fresh: Vec<Quote> = candidates
            .into_iter()
            .filter(|quote| !stored.contains(&quote.unix_seconds()))
            .collect();

        debug!(
            "Dedup for {}: {} candidates, {} already stored, {} new",
            token,
            total,
            total - fresh.len(),
            fresh.len()
        );

        fresh
    }
}
