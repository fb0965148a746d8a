//! Min-max score normalization against fixed training-derived bounds.
//!
//! Raw detector scores live on unrelated scales (mean squared reconstruction
//! error vs. isolation path-length score). Each is mapped onto a nominal
//! [0, 1] scale with bounds taken once from a reference distribution:
//!
//! ```text
//! normalized = (raw - lo) / max(hi - lo, ε)
//! ```
//!
//! Values are NOT clamped. A raw score beyond the reference range
//! extrapolates below 0 or above 1.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Epsilon guard for bounds taken from a fixed reference distribution.
pub const REFERENCE_EPSILON: f64 = 1e-12;

/// Epsilon guard for bounds taken from the batch being normalized.
pub const BATCH_EPSILON: f64 = 1e-8;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizationError {
    #[error("Cannot derive normalization bounds from a batch of {0} score(s); supply reference bounds")]
    NoBounds(usize),
}

/// Immutable (lo, hi) pair derived once from a reference distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizationRange {
    pub lo: f64,
    pub hi: f64,
}

impl NormalizationRange {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Bounds from the finite min/max of a reference distribution.
    ///
    /// Returns `None` when there is no finite value to take bounds from.
    pub fn from_reference(scores: &[f64]) -> Option<Self> {
        let (lo, hi) = scores
            .iter()
            .copied()
            .filter(|s| s.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(s), hi.max(s)));
        (lo <= hi).then_some(Self { lo, hi })
    }

    pub fn span(&self) -> f64 {
        self.hi - self.lo
    }

    /// True when `hi ≈ lo` and normalized scores carry no information.
    pub fn is_degenerate(&self) -> bool {
        self.span().abs() <= REFERENCE_EPSILON
    }
}

impl Default for NormalizationRange {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

/// Normalize one raw score with reference-bound epsilon.
pub fn normalize(raw: f64, range: &NormalizationRange) -> f64 {
    normalize_with_epsilon(raw, range, REFERENCE_EPSILON)
}

fn normalize_with_epsilon(raw: f64, range: &NormalizationRange, eps: f64) -> f64 {
    (raw - range.lo) / range.span().max(eps)
}

/// Per-detector normalizer bound to one immutable range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreNormalizer {
    range: NormalizationRange,
    epsilon: f64,
}

impl ScoreNormalizer {
    /// Normalizer over fixed reference bounds. Logs when the range is degenerate.
    pub fn new(label: &str, range: NormalizationRange) -> Self {
        if range.is_degenerate() {
            warn!(
                detector = label,
                lo = range.lo,
                hi = range.hi,
                "Degenerate normalization range: scores collapse onto the epsilon guard and are unreliable"
            );
        }
        Self {
            range,
            epsilon: REFERENCE_EPSILON,
        }
    }

    pub fn range(&self) -> NormalizationRange {
        self.range
    }

    pub fn normalize(&self, raw: f64) -> f64 {
        normalize_with_epsilon(raw, &self.range, self.epsilon)
    }

    pub fn normalize_all(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter().map(|&r| self.normalize(r)).collect()
    }
}

/// Normalize an offline batch of scores.
///
/// With `reference` bounds those are used. Otherwise the batch's own min/max
/// are used, which needs more than one score: a single-element batch is
/// rejected rather than silently passed through.
pub fn normalize_batch(
    scores: &[f64],
    reference: Option<NormalizationRange>,
) -> Result<Vec<f64>, NormalizationError> {
    if let Some(range) = reference {
        return Ok(scores.iter().map(|&s| normalize(s, &range)).collect());
    }
    if scores.len() <= 1 {
        return Err(NormalizationError::NoBounds(scores.len()));
    }
    let range = NormalizationRange::from_reference(scores).ok_or(NormalizationError::NoBounds(0))?;
    if range.is_degenerate() {
        warn!(lo = range.lo, hi = range.hi, n = scores.len(), "Degenerate batch normalization range");
    }
    Ok(scores
        .iter()
        .map(|&s| normalize_with_epsilon(s, &range, BATCH_EPSILON))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstruction_error_example() {
        let range = NormalizationRange::new(0.01, 0.10);
        let score = normalize(0.08, &range);
        assert!((score - 0.7778).abs() < 1e-4, "Score: {}", score);
        assert!(score > 0.6);
    }

    #[test]
    fn test_degenerate_range_does_not_divide_by_zero() {
        let range = NormalizationRange::new(0.05, 0.05);
        assert!(range.is_degenerate());
        let score = normalize(0.05, &range);
        assert_eq!(score, 0.0);
        assert!(normalize(0.06, &range).is_finite());
    }

    #[test]
    fn test_monotone_in_raw_score() {
        let range = NormalizationRange::new(-0.3, 2.5);
        let raws = [-5.0, -0.3, 0.0, 0.1, 1.0, 2.5, 7.0];
        for pair in raws.windows(2) {
            assert!(normalize(pair[0], &range) <= normalize(pair[1], &range));
        }
    }

    #[test]
    fn test_no_clamping_outside_reference() {
        let range = NormalizationRange::new(1.0, 2.0);
        assert!((normalize(3.0, &range) - 2.0).abs() < 1e-12);
        assert!((normalize(0.0, &range) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_from_reference_skips_non_finite() {
        let range = NormalizationRange::from_reference(&[0.4, f64::NAN, 0.1, f64::INFINITY, 0.9]).unwrap();
        assert_eq!(range, NormalizationRange::new(0.1, 0.9));
        assert!(NormalizationRange::from_reference(&[]).is_none());
        assert!(NormalizationRange::from_reference(&[f64::NAN]).is_none());
    }

    #[test]
    fn test_batch_uses_own_bounds() {
        let out = normalize_batch(&[2.0, 4.0, 3.0], None).unwrap();
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);
        assert!((out[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_single_element_batch_needs_reference() {
        assert_eq!(normalize_batch(&[0.3], None), Err(NormalizationError::NoBounds(1)));

        let out = normalize_batch(&[0.3], Some(NormalizationRange::new(0.0, 0.6))).unwrap();
        assert!((out[0] - 0.5).abs() < 1e-12);
    }
}
