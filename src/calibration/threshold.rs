//! Operating threshold search on normalized validation scores.
//!
//! ## Searches
//!
//! - **F-beta grid** ([`best_threshold_fbeta`]): `grid_size` evenly spaced
//!   candidates over `[min, max]` of the scores, positive iff `score > t`.
//!   The best F-beta wins. Equal scores form a plateau starting at the lowest
//!   such candidate; the middle grid point of that first plateau is returned.
//! - **Precision floor** ([`threshold_for_min_precision`]): candidates are the
//!   distinct scores in ascending order, positive iff `score >= t`. The first
//!   candidate reaching the floor wins.
//!
//! The operating threshold is the larger of the two. When a search has no
//! qualifying candidate it falls back to the most conservative value and
//! records a [`ThresholdFallback`]; this is logged, never silent.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CalibrationError;

// ============================================================================
// Confusion counts
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

impl ConfusionCounts {
    pub fn from_decisions(predicted: &[bool], actual: &[bool]) -> Self {
        predicted
            .iter()
            .zip(actual)
            .fold(Self::default(), |mut c, (&p, &a)| {
                match (p, a) {
                    (true, true) => c.tp += 1,
                    (true, false) => c.fp += 1,
                    (false, false) => c.tn += 1,
                    (false, true) => c.fn_ += 1,
                }
                c
            })
    }

    /// Counts for the decision `score > threshold`.
    pub fn at_threshold(scores: &[f64], labels: &[bool], threshold: f64) -> Self {
        scores
            .iter()
            .zip(labels)
            .fold(Self::default(), |mut c, (&s, &a)| {
                match (s > threshold, a) {
                    (true, true) => c.tp += 1,
                    (true, false) => c.fp += 1,
                    (false, false) => c.tn += 1,
                    (false, true) => c.fn_ += 1,
                }
                c
            })
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f_beta(&self, beta: f64) -> f64 {
        f_beta(self.precision(), self.recall(), beta)
    }

    pub fn f1(&self) -> f64 {
        self.f_beta(1.0)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// `(1+β²)·P·R / (β²·P + R)`, 0 when the denominator is 0.
pub fn f_beta(precision: f64, recall: f64, beta: f64) -> f64 {
    let b2 = beta * beta;
    let denom = b2 * precision + recall;
    if denom > 0.0 {
        (1.0 + b2) * precision * recall / denom
    } else {
        0.0
    }
}

// ============================================================================
// Fallback records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSearch {
    FBeta,
    PrecisionFloor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FallbackReason {
    /// No grid candidate had a positive F-beta
    NoPositiveFbeta { beta: f64 },
    /// No candidate reached the precision floor
    PrecisionFloorUnreachable { target: f64, best_precision: f64 },
}

/// A search that found no qualifying candidate and used its boundary value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdFallback {
    /// Which score series was searched (e.g. "operate", "reconstruction")
    pub series: String,
    pub search: ThresholdSearch,
    pub threshold: f64,
    #[serde(flatten)]
    pub reason: FallbackReason,
}

// ============================================================================
// Algorithm A: F-beta grid search
// ============================================================================

/// Result of [`best_threshold_fbeta`].
#[derive(Debug, Clone, PartialEq)]
pub struct FbetaSearch {
    pub fbeta: f64,
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub fallback: Option<FallbackReason>,
}

/// `n` evenly spaced values over `[lo, hi]`, both ends included.
pub fn threshold_grid(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lo],
        _ => {
            let step = (hi - lo) / (n - 1) as f64;
            let mut grid: Vec<f64> = (0..n).map(|i| lo + i as f64 * step).collect();
            grid[n - 1] = hi;
            grid
        }
    }
}

pub(crate) fn check_inputs(scores: &[f64], labels: &[bool]) -> Result<(), CalibrationError> {
    if scores.is_empty() {
        return Err(CalibrationError::EmptyValidationSet);
    }
    if scores.len() != labels.len() {
        return Err(CalibrationError::LengthMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(CalibrationError::NonFiniteScore { index });
    }
    Ok(())
}

/// Grid search for the threshold maximizing F-beta.
///
/// Falls back to `max(scores)` (nothing classified positive) when no
/// candidate reaches a positive F-beta.
pub fn best_threshold_fbeta(
    scores: &[f64],
    labels: &[bool],
    beta: f64,
    grid_size: usize,
) -> Result<FbetaSearch, CalibrationError> {
    check_inputs(scores, labels)?;
    if !(beta.is_finite() && beta > 0.0) {
        return Err(CalibrationError::InvalidParameter(format!("beta must be positive, got {beta}")));
    }
    if grid_size < 2 {
        return Err(CalibrationError::InvalidParameter(format!(
            "grid size must be at least 2, got {grid_size}"
        )));
    }

    let (lo, hi) = scores
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    let grid = threshold_grid(lo, hi, grid_size);

    let evaluated: Vec<(f64, ConfusionCounts)> = grid
        .par_iter()
        .map(|&t| {
            let counts = ConfusionCounts::at_threshold(scores, labels, t);
            (counts.f_beta(beta), counts)
        })
        .collect();
    let best_fbeta = evaluated.iter().map(|(f, _)| *f).fold(0.0, f64::max);

    // The first run of grid points reaching the best F-beta is a plateau of
    // equally good thresholds; take its middle point.
    let best = evaluated.iter().position(|(f, _)| *f == best_fbeta).map(|first| {
        let len = evaluated[first..].iter().take_while(|(f, _)| *f == best_fbeta).count();
        let i = first + (len - 1) / 2;
        (i, evaluated[i].0, evaluated[i].1)
    });

    match best {
        Some((i, fbeta, counts)) if fbeta > 0.0 => {
            debug!(threshold = grid[i], fbeta, beta, "F-beta grid search complete");
            Ok(FbetaSearch {
                fbeta,
                threshold: grid[i],
                precision: counts.precision(),
                recall: counts.recall(),
                f1: counts.f1(),
                fallback: None,
            })
        }
        _ => {
            warn!(beta, threshold = hi, "No threshold with positive F-beta; using max score");
            Ok(FbetaSearch {
                fbeta: 0.0,
                threshold: hi,
                precision: 0.0,
                recall: 0.0,
                f1: 0.0,
                fallback: Some(FallbackReason::NoPositiveFbeta { beta }),
            })
        }
    }
}

// ============================================================================
// Algorithm B: precision floor
// ============================================================================

/// One point of the precision/recall curve; positive iff `score >= threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub threshold: f64,
    pub precision: f64,
    pub recall: f64,
}

/// Precision/recall at every distinct score, ascending by threshold.
pub fn precision_recall_curve(scores: &[f64], labels: &[bool]) -> Result<Vec<CurvePoint>, CalibrationError> {
    check_inputs(scores, labels)?;

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let positives = labels.iter().filter(|&&l| l).count();

    let mut points = Vec::new();
    let (mut tp, mut fp) = (0usize, 0usize);
    for (pos, &i) in order.iter().enumerate() {
        if labels[i] {
            tp += 1;
        } else {
            fp += 1;
        }
        // Emit once per distinct value, after all rows sharing it are counted
        let last_of_value = order.get(pos + 1).map_or(true, |&next| scores[next] != scores[i]);
        if last_of_value {
            points.push(CurvePoint {
                threshold: scores[i],
                precision: ratio(tp, tp + fp),
                recall: ratio(tp, positives),
            });
        }
    }
    points.reverse();
    Ok(points)
}

/// Result of [`threshold_for_min_precision`].
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisionFloorSearch {
    pub threshold: f64,
    /// Realized precision at `threshold`
    pub precision: f64,
    pub recall: f64,
    pub fallback: Option<FallbackReason>,
}

/// Lowest threshold whose precision reaches `min_precision`, or the highest
/// threshold on the curve when none does.
pub fn threshold_for_min_precision(
    scores: &[f64],
    labels: &[bool],
    min_precision: f64,
) -> Result<PrecisionFloorSearch, CalibrationError> {
    if !(min_precision > 0.0 && min_precision <= 1.0) {
        return Err(CalibrationError::InvalidParameter(format!(
            "precision target must be in (0, 1], got {min_precision}"
        )));
    }
    let curve = precision_recall_curve(scores, labels)?;

    if let Some(point) = curve.iter().find(|p| p.precision >= min_precision) {
        return Ok(PrecisionFloorSearch {
            threshold: point.threshold,
            precision: point.precision,
            recall: point.recall,
            fallback: None,
        });
    }

    let best_precision = curve.iter().map(|p| p.precision).fold(0.0, f64::max);
    // check_inputs guarantees at least one point
    let last = curve[curve.len() - 1];
    warn!(
        precision_target = min_precision,
        best_precision,
        threshold = last.threshold,
        "Precision floor unreachable; using highest threshold"
    );
    Ok(PrecisionFloorSearch {
        threshold: last.threshold,
        precision: last.precision,
        recall: last.recall,
        fallback: Some(FallbackReason::PrecisionFloorUnreachable {
            target: min_precision,
            best_precision,
        }),
    })
}

// ============================================================================
// Operating threshold
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OperatingThreshold {
    pub threshold: f64,
    pub fbeta: FbetaSearch,
    pub precision_floor: PrecisionFloorSearch,
}

impl OperatingThreshold {
    /// Fallbacks taken by either search, labelled with `series`.
    pub fn fallbacks(&self, series: &str) -> Vec<ThresholdFallback> {
        let a = self.fbeta.fallback.clone().map(|reason| ThresholdFallback {
            series: series.to_string(),
            search: ThresholdSearch::FBeta,
            threshold: self.fbeta.threshold,
            reason,
        });
        let b = self.precision_floor.fallback.clone().map(|reason| ThresholdFallback {
            series: series.to_string(),
            search: ThresholdSearch::PrecisionFloor,
            threshold: self.precision_floor.threshold,
            reason,
        });
        a.into_iter().chain(b).collect()
    }
}

/// `max(best F-beta threshold, precision-floor threshold)`.
pub fn operating_threshold(
    scores: &[f64],
    labels: &[bool],
    beta: f64,
    min_precision: f64,
    grid_size: usize,
) -> Result<OperatingThreshold, CalibrationError> {
    let fbeta = best_threshold_fbeta(scores, labels, beta, grid_size)?;
    let precision_floor = threshold_for_min_precision(scores, labels, min_precision)?;
    let threshold = fbeta.threshold.max(precision_floor.threshold);
    debug!(
        threshold,
        fbeta_threshold = fbeta.threshold,
        floor_threshold = precision_floor.threshold,
        "Operating threshold selected"
    );
    Ok(OperatingThreshold {
        threshold,
        fbeta,
        precision_floor,
    })
}
