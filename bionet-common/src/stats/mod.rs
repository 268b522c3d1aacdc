//! Statistics primitives shared by the aggregation stages
//!
//! - [`CountMap`] / [`NestedCountMap`]: keyed counts with a union-and-sum merge
//! - [`ScoreStats`] / [`ScoreSamples`]: confidence `{avg, min, max}`
//! - [`Diversity`]: Shannon and Simpson indices over category counts

pub mod counts;
pub mod diversity;
pub mod score;

pub use counts::{CountMap, NestedCountMap};
pub use diversity::{diversity_index, Diversity};
pub use score::{ScoreSamples, ScoreStats};
