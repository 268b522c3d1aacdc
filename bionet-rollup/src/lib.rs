//! bionet-rollup library - detection aggregation
//!
//! Turns stored detections into hourly summaries, rolls those up into
//! days, weeks and months, and keeps a running all-time summary. Reads and
//! writes only through the shared database; ingestion never calls in here.

pub mod accumulator;
pub mod aggregator;
pub mod backfill;
pub mod jobs;
pub mod merger;
pub mod retention;
pub mod scheduler;

pub use accumulator::AllTimeAccumulator;
pub use aggregator::aggregate;
pub use jobs::{RollupJobs, RollupReport};
pub use merger::merge;
pub use retention::RetentionPolicy;
pub use scheduler::Scheduler;
