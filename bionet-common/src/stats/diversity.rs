//! Shannon and Simpson diversity indices
//!
//! Both indices are recomputed from counts at every level of the rollup
//! hierarchy; neither is additive, so they are never merged directly.

use serde::{Deserialize, Serialize};

use super::CountMap;

/// Diversity of one category distribution
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Diversity {
    /// H = -Σ p_i ln(p_i), natural log
    pub shannon: f64,
    /// D = 1 - Σ p_i²
    pub simpson: f64,
}

impl Diversity {
    /// Diversity of the species distribution held in `counts`
    pub fn from_counts(counts: &CountMap) -> Self {
        diversity_index(counts.values())
    }
}

/// Compute Shannon and Simpson indices from raw category counts.
///
/// Zero-count categories are skipped. An empty or all-zero input yields
/// both indices at `0.0` rather than NaN.
pub fn diversity_index<I>(counts: I) -> Diversity
where
    I: IntoIterator<Item = u64>,
{
    let counts: Vec<u64> = counts.into_iter().filter(|&c| c > 0).collect();
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return Diversity::default();
    }

    let total = total as f64;
    let mut shannon = 0.0;
    let mut sum_p2 = 0.0;
    for &count in &counts {
        let p = count as f64 / total;
        shannon -= p * p.ln();
        sum_p2 += p * p;
    }

    Diversity {
        // A single category gives -1·ln(1) = -0.0; normalise the sign
        shannon: shannon.max(0.0),
        simpson: (1.0 - sum_p2).clamp(0.0, 1.0),
    }
}
