//! # Bionet Common Library
//!
//! Shared code for the bionet services including:
//! - Detection and bucket summary models
//! - Bucket keys and time-window arithmetic
//! - Count maps, score statistics and diversity indices
//! - SQLite document store
//! - Configuration loading

pub mod bucket;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod stats;
pub mod time;

pub use bucket::{BucketKey, Granularity};
pub use error::{Error, Result};
pub use models::{BucketSummary, Detection};
