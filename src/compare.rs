//! Fingerprint similarity scoring and match ranking
//!
//! # Scoring
//!
//! Two compact vectors are compared over their common prefix (the longer
//! one is truncated) with two complementary measures:
//!
//! ```text
//! correlation   = |pearson(a, b)|                (NaN → 0)
//! l2_similarity = 1 - ||a - b|| / sqrt(2·n)
//! combined      = clamp(correlation·w_c + l2_similarity·w_l2, 0, 1)
//! ```
//!
//! Correlation ignores overall level and offset and tracks the *shape* of
//! the band energy over time. The L2 term penalizes absolute differences
//! and keeps two unrelated-but-similarly-shaped vectors apart.
//!
//! Empty vectors, and vectors with no energy at all (silence), score 0.0
//! on every component. Comparison never fails.
//!
//! # Ranking
//!
//! [`Comparator::rank_matches`] keeps candidates that pass *all* thresholds
//! and orders them by `(score, correlation, l2_similarity, duration)`, all
//! descending. Full ties keep input order.

use crate::extractor::FingerprintRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Blend weights for the combined score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    pub correlation_weight: f64,
    pub l2_weight: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            correlation_weight: 0.7,
            l2_weight: 0.3,
        }
    }
}

/// Every intermediate of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SimilarityComponents {
    pub correlation: f64,
    pub l2_similarity: f64,
    pub combined: f64,
}

/// Inclusion criteria for [`Comparator::rank_matches`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    pub min_score: f64,
    /// Seconds.
    pub min_duration: f64,
    pub correlation_threshold: f64,
    pub l2_threshold: f64,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            min_score: 0.8,
            min_duration: 0.0,
            correlation_threshold: 0.7,
            l2_threshold: 0.5,
        }
    }
}

impl MatchThresholds {
    /// Thresholds that let every candidate through.
    pub fn permissive() -> Self {
        Self {
            min_score: 0.0,
            min_duration: 0.0,
            correlation_threshold: 0.0,
            l2_threshold: 0.0,
        }
    }
}

/// A stored fingerprint offered for ranking.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub vector: &'a [f64],
    /// Seconds.
    pub duration: f64,
}

/// A candidate that passed every threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub id: String,
    pub score: f64,
    pub correlation: f64,
    pub l2_similarity: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Comparator {
    weights: SimilarityWeights,
}

impl Comparator {
    pub fn new(weights: SimilarityWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SimilarityWeights {
        &self.weights
    }

    /// Combined similarity in `[0, 1]`.
    pub fn compare(&self, a: &[f64], b: &[f64]) -> f64 {
        self.components(a, b).combined
    }

    pub fn components(&self, a: &[f64], b: &[f64]) -> SimilarityComponents {
        let n = a.len().min(b.len());
        let (a, b) = (&a[..n], &b[..n]);
        if n == 0 || is_silent(a) || is_silent(b) {
            return SimilarityComponents::default();
        }

        let correlation = {
            let r = pearson_correlation(a, b);
            if r.is_nan() {
                0.0
            } else {
                r.abs().min(1.0)
            }
        };
        let l2_similarity = l2_similarity(a, b);
        let combined = (correlation * self.weights.correlation_weight
            + l2_similarity * self.weights.l2_weight)
            .clamp(0.0, 1.0);

        SimilarityComponents {
            correlation,
            l2_similarity,
            combined,
        }
    }

    /// Compare the compact vectors of two records.
    pub fn compare_records(&self, a: &FingerprintRecord, b: &FingerprintRecord) -> f64 {
        self.compare(a.compact().values(), b.compact().values())
    }

    /// Score, filter and order `candidates` against `query`.
    pub fn rank_matches(
        &self,
        query: &[f64],
        candidates: &[Candidate<'_>],
        thresholds: &MatchThresholds,
    ) -> Vec<Match> {
        let mut matches: Vec<Match> = candidates
            .iter()
            .filter_map(|candidate| {
                let c = self.components(query, candidate.vector);
                let passes = candidate.duration >= thresholds.min_duration
                    && c.correlation >= thresholds.correlation_threshold
                    && c.l2_similarity >= thresholds.l2_threshold
                    && c.combined >= thresholds.min_score;
                passes.then(|| Match {
                    id: candidate.id.to_string(),
                    score: c.combined,
                    correlation: c.correlation,
                    l2_similarity: c.l2_similarity,
                    duration: candidate.duration,
                })
            })
            .collect();

        sort_matches(&mut matches);
        matches
    }
}

/// Stable sort by `(score, correlation, l2_similarity, duration)`, descending.
pub fn sort_matches(matches: &mut [Match]) {
    matches.sort_by(match_order);
}

/// Pearson correlation coefficient. NaN when either input has zero variance.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return f64::NAN;
    }
    let (a, b) = (&a[..n], &b[..n]);

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    cov / (var_a * var_b).sqrt()
}

/// `1 - euclidean / sqrt(2·n)` over the common prefix.
pub fn l2_similarity(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let distance = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt();
    1.0 - distance / (2.0 * n as f64).sqrt()
}

fn is_silent(v: &[f64]) -> bool {
    v.iter().all(|&x| x == 0.0)
}

/// Total order on matches, same key as [`sort_matches`].
pub fn match_order(a: &Match, b: &Match) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.correlation.total_cmp(&a.correlation))
        .then_with(|| b.l2_similarity.total_cmp(&a.l2_similarity))
        .then_with(|| b.duration.total_cmp(&a.duration))
}
