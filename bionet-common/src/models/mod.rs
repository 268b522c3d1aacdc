//! Data model shared by ingestion and rollup

pub mod detection;
pub mod summary;

pub use detection::Detection;
pub use summary::BucketSummary;
