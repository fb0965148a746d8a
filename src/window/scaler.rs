//! Fitted per-feature transforms shipped with the models.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::WindowError;

/// Standard scaler: `(x - mean) / scale`, fitted on training-normal rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl FeatureScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, WindowError> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    /// Identity transform over `n` features.
    pub fn identity(n: usize) -> Self {
        Self {
            mean: vec![0.0; n],
            scale: vec![1.0; n],
        }
    }

    pub fn validate(&self) -> Result<(), WindowError> {
        if self.mean.len() != self.scale.len() {
            return Err(WindowError::ScalerWidthMismatch {
                expected: self.mean.len(),
                found: self.scale.len(),
            });
        }
        Ok(())
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Scale one row. A zero (or non-finite) scale leaves the centered value
    /// unscaled, matching how constant training columns were fitted.
    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, WindowError> {
        if row.len() != self.mean.len() {
            return Err(WindowError::ScalerWidthMismatch {
                expected: self.mean.len(),
                found: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| {
                let s = if *s == 0.0 || !s.is_finite() { 1.0 } else { *s };
                (x - m) / s
            })
            .collect())
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, WindowError> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

/// Per-feature medians of the training split, keyed by feature name.
///
/// Used to fill missing values at inference; never recomputed from the
/// window being scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingMedians(HashMap<String, f64>);

impl TrainingMedians {
    pub fn new(values: HashMap<String, f64>) -> Self {
        Self(values)
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.0.get(feature).copied().filter(|v| v.is_finite())
    }

    /// Medians laid out in `feature_order`. Every feature needs a finite median.
    pub fn for_order(&self, feature_order: &[String]) -> Result<Vec<f64>, WindowError> {
        feature_order
            .iter()
            .map(|name| self.get(name).ok_or_else(|| WindowError::MissingMedian(name.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_row() {
        let scaler = FeatureScaler::new(vec![1.0, 10.0], vec![2.0, 0.0]).unwrap();
        let out = scaler.transform_row(&[3.0, 12.0]).unwrap();
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_width_mismatch() {
        let scaler = FeatureScaler::identity(2);
        assert!(matches!(
            scaler.transform_row(&[1.0]),
            Err(WindowError::ScalerWidthMismatch { expected: 2, found: 1 })
        ));
        assert!(FeatureScaler::new(vec![0.0], vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn test_medians_for_order() {
        let medians: TrainingMedians = serde_json::from_str(r#"{"b": 2.0, "a": 1.0}"#).unwrap();
        let order = vec!["a".to_string(), "b".to_string()];
        assert_eq!(medians.for_order(&order).unwrap(), vec![1.0, 2.0]);

        let order = vec!["a".to_string(), "c".to_string()];
        assert!(matches!(medians.for_order(&order), Err(WindowError::MissingMedian(ref f)) if f == "c"));
    }
}
