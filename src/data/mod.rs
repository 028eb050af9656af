pub mod aligner;
pub mod dedup;
pub mod quote_store;

pub use aligner::QuoteAligner;
pub use dedup::DedupFilter;
pub use quote_store::{HybridQuoteStore, QuoteStore};
