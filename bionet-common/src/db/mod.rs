//! SQLite document store
//!
//! Detections, bucket summaries and the all-time summary live in one
//! database file shared by the ingest and rollup services. Each summary is
//! an independent JSON document keyed by granularity and bucket key.

pub mod all_time;
pub mod detections;
pub mod init;
pub mod retry;
pub mod summaries;

pub use all_time::*;
pub use detections::*;
pub use init::*;
pub use retry::*;
pub use summaries::*;
