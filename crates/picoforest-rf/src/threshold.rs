//! Consensus-threshold search.

use serde::Serialize;
use tracing::debug;

use crate::consensus::EvaluationSample;
use crate::metrics::{MetricFlags, MetricsSummary, metrics_at_threshold, objective_score};

const TOLERANCE: f64 = 1e-6;

/// Best acceptance threshold for a set of scored samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdSearch {
    /// Chosen acceptance threshold.
    pub threshold: f64,
    /// Objective value at that threshold.
    pub score: f64,
    /// Full metrics at that threshold.
    pub metrics: MetricsSummary,
}

/// Try every observed consensus value plus 0 and 1 as the threshold.
///
/// Keeps the highest objective score; within `1e-6` it prefers higher
/// coverage, then the lower threshold. Returns `None` when no sample
/// received a vote.
#[must_use]
pub fn find_best_threshold(
    samples: &[EvaluationSample],
    flags: MetricFlags,
) -> Option<ThresholdSearch> {
    if !samples.iter().any(|s| s.total_votes > 0) {
        return None;
    }

    let mut candidates: Vec<f64> = samples
        .iter()
        .filter(|s| s.total_votes > 0)
        .map(|s| s.consensus)
        .chain([0.0, 1.0])
        .collect();
    candidates.sort_by(f64::total_cmp);
    candidates.dedup();

    let mut best: Option<ThresholdSearch> = None;
    for threshold in candidates {
        let metrics = metrics_at_threshold(samples, threshold);
        let score = objective_score(&metrics, flags);
        let better = match &best {
            None => true,
            Some(b) => {
                score > b.score + TOLERANCE
                    || ((score - b.score).abs() <= TOLERANCE
                        && metrics.coverage > b.metrics.coverage + TOLERANCE)
            }
        };
        if better {
            best = Some(ThresholdSearch {
                threshold,
                score,
                metrics,
            });
        }
    }

    if let Some(b) = &best {
        debug!(threshold = b.threshold, score = b.score, coverage = b.metrics.coverage, "threshold selected");
    }
    best
}
