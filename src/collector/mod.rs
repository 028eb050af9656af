pub mod backfill;
pub mod pipeline;
pub mod scheduler;

pub use backfill::{BackfillOutcome, BackfillReport, BackfillRunner};
pub use pipeline::{AlignedWindow, IngestPipeline, WindowOutcome};
pub use scheduler::{LiveCollector, TokenScheduler};
