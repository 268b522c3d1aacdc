//! Confidence score statistics

use serde::{Deserialize, Serialize};

/// `{avg, min, max}` over a set of confidence scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl ScoreStats {
    /// Stats of a single score
    pub fn single(score: f64) -> Self {
        Self { avg: score, min: score, max: score }
    }

    /// Combine sibling stats treating each `avg` as one equally weighted sample.
    ///
    /// This is the rollup approximation: a sub-bucket holding one detection
    /// moves the merged average as much as one holding a hundred. Min and
    /// max are exact. Returns `None` for an empty input.
    pub fn combine_unweighted<'a, I>(stats: I) -> Option<ScoreStats>
    where
        I: IntoIterator<Item = &'a ScoreStats>,
    {
        let stats: Vec<&ScoreStats> = stats.into_iter().collect();
        if stats.is_empty() {
            return None;
        }

        let avgs: Vec<f64> = stats.iter().map(|s| s.avg).collect();
        Some(ScoreStats {
            avg: stable_mean(avgs),
            min: stats.iter().map(|s| s.min).fold(f64::INFINITY, f64::min),
            max: stats.iter().map(|s| s.max).fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// Count-weighted merge of two stats.
    ///
    /// `avg = (a.avg·a_n + b.avg·b_n) / (a_n + b_n)`. With both weights at
    /// zero the result keeps `self.avg`.
    pub fn merge_weighted(&self, self_n: u64, other: &ScoreStats, other_n: u64) -> ScoreStats {
        let total = self_n + other_n;
        let avg = if total == 0 {
            self.avg
        } else {
            (self.avg * self_n as f64 + other.avg * other_n as f64) / total as f64
        };

        ScoreStats {
            avg,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Raw scores collected for one key while aggregating a bucket
#[derive(Debug, Clone, Default)]
pub struct ScoreSamples(Vec<f64>);

impl ScoreSamples {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, score: f64) {
        self.0.push(score);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mean, min and max of the collected scores; `None` when empty
    pub fn stats(&self) -> Option<ScoreStats> {
        if self.0.is_empty() {
            return None;
        }

        Some(ScoreStats {
            avg: stable_mean(self.0.clone()),
            min: self.0.iter().copied().fold(f64::INFINITY, f64::min),
            max: self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Mean summed in sorted order so the result does not depend on input order
fn stable_mean(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len() as f64;
    values.iter().sum::<f64>() / n
}
