//! Inference window assembly.
//!
//! Turns an ordered feature table into the scaled rows the detectors expect:
//!
//! 1. Check the table's columns against the deployed feature order
//! 2. Replace missing and non-finite values with the training median
//! 3. Take the trailing `lookback` rows (fewer is an error, never padded)
//! 4. Apply the fitted scaler row-wise

pub mod scaler;

pub use scaler::{FeatureScaler, TrainingMedians};

use thiserror::Error;

use crate::types::FeatureTable;

#[derive(Debug, Error)]
pub enum WindowError {
    #[error("Insufficient window: need {required} rows, got {available}")]
    InsufficientWindow { required: usize, available: usize },

    #[error("Feature count mismatch: expected {expected} values per row, found {found}")]
    FeatureCountMismatch { expected: usize, found: usize },

    #[error("Scaler width mismatch: expected {expected} features, found {found}")]
    ScalerWidthMismatch { expected: usize, found: usize },

    #[error("No training median for feature '{0}'")]
    MissingMedian(String),

    #[error("Column {position} is '{found}', deployed feature order expects '{expected}'")]
    ColumnMismatch {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Lookback must be at least 1")]
    ZeroLookback,
}

/// Builds repaired, scaled windows of a fixed length.
#[derive(Debug, Clone)]
pub struct InferenceWindowBuilder {
    lookback: usize,
    feature_order: Vec<String>,
    /// Training medians in `feature_order`
    medians: Vec<f64>,
}

impl InferenceWindowBuilder {
    pub fn new(lookback: usize, feature_order: Vec<String>, medians: &TrainingMedians) -> Result<Self, WindowError> {
        if lookback == 0 {
            return Err(WindowError::ZeroLookback);
        }
        let medians = medians.for_order(&feature_order)?;
        Ok(Self {
            lookback,
            feature_order,
            medians,
        })
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn feature_order(&self) -> &[String] {
        &self.feature_order
    }

    /// Fill missing and non-finite values from the training medians.
    pub fn repair_row(&self, row: &[f64]) -> Result<Vec<f64>, WindowError> {
        if row.len() != self.medians.len() {
            return Err(WindowError::FeatureCountMismatch {
                expected: self.medians.len(),
                found: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(&self.medians)
            .map(|(&v, &median)| if v.is_finite() { v } else { median })
            .collect())
    }

    /// Fail unless `table` has exactly the deployed feature order.
    pub fn check_columns(&self, table: &FeatureTable) -> Result<(), WindowError> {
        if table.columns().len() != self.feature_order.len() {
            return Err(WindowError::FeatureCountMismatch {
                expected: self.feature_order.len(),
                found: table.columns().len(),
            });
        }
        if let Some((position, (expected, found))) = self
            .feature_order
            .iter()
            .zip(table.columns())
            .enumerate()
            .find(|(_, (e, f))| e != f)
        {
            return Err(WindowError::ColumnMismatch {
                position,
                expected: expected.clone(),
                found: found.clone(),
            });
        }
        Ok(())
    }

    /// Repair and scale every row of `rows` (no length requirement).
    pub fn prepare_rows(&self, rows: &[Vec<f64>], scaler: &FeatureScaler) -> Result<Vec<Vec<f64>>, WindowError> {
        let repaired = rows
            .iter()
            .map(|row| self.repair_row(row))
            .collect::<Result<Vec<_>, _>>()?;
        scaler.transform(&repaired)
    }

    /// Repair and scale a whole table after checking its column order.
    pub fn prepare(&self, table: &FeatureTable, scaler: &FeatureScaler) -> Result<Vec<Vec<f64>>, WindowError> {
        self.check_columns(table)?;
        self.prepare_rows(table.rows(), scaler)
    }

    /// Scaled window over the trailing `lookback` rows of `rows`.
    pub fn build_from_rows(&self, rows: &[Vec<f64>], scaler: &FeatureScaler) -> Result<Vec<Vec<f64>>, WindowError> {
        if rows.len() < self.lookback {
            return Err(WindowError::InsufficientWindow {
                required: self.lookback,
                available: rows.len(),
            });
        }
        self.prepare_rows(&rows[rows.len() - self.lookback..], scaler)
    }

    /// Scaled window over the trailing `lookback` rows of `table`.
    pub fn build(&self, table: &FeatureTable, scaler: &FeatureScaler) -> Result<Vec<Vec<f64>>, WindowError> {
        self.check_columns(table)?;
        self.build_from_rows(table.rows(), scaler)
    }

    /// Every full window over already prepared rows, in time order. Window `i`
    /// ends at row `i + lookback - 1`.
    pub fn sliding<'a>(&self, prepared: &'a [Vec<f64>]) -> Result<std::slice::Windows<'a, Vec<f64>>, WindowError> {
        if prepared.len() < self.lookback {
            return Err(WindowError::InsufficientWindow {
                required: self.lookback,
                available: prepared.len(),
            });
        }
        Ok(prepared.windows(self.lookback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn order() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    fn builder(lookback: usize) -> InferenceWindowBuilder {
        let medians = TrainingMedians::new(HashMap::from([("a".to_string(), 5.0), ("b".to_string(), -1.0)]));
        InferenceWindowBuilder::new(lookback, order(), &medians).unwrap()
    }

    fn table(rows: Vec<Vec<f64>>) -> FeatureTable {
        FeatureTable::from_rows(order(), rows).unwrap()
    }

    #[test]
    fn test_repairs_with_training_medians() {
        let b = builder(2);
        let t = table(vec![
            vec![0.0, 0.0],
            vec![f64::NAN, f64::INFINITY],
            vec![1.0, f64::NEG_INFINITY],
        ]);
        let window = b.build(&t, &FeatureScaler::identity(2)).unwrap();
        assert_eq!(window, vec![vec![5.0, -1.0], vec![1.0, -1.0]]);
    }

    #[test]
    fn test_median_ignores_window_contents() {
        // Window-local median of column a would be 100; training median is 5
        let b = builder(3);
        let t = table(vec![vec![100.0, 0.0], vec![f64::NAN, 0.0], vec![100.0, 0.0]]);
        let window = b.build(&t, &FeatureScaler::identity(2)).unwrap();
        assert_eq!(window[1][0], 5.0);
    }

    #[test]
    fn test_short_history_is_rejected() {
        let b = builder(24);
        let t = table(vec![vec![0.0, 0.0]; 23]);
        let err = b.build(&t, &FeatureScaler::identity(2)).unwrap_err();
        assert!(matches!(
            err,
            WindowError::InsufficientWindow { required: 24, available: 23 }
        ));
    }

    #[test]
    fn test_takes_last_rows_and_scales() {
        let b = builder(2);
        let rows = (0..5).map(|i| vec![i as f64, 0.0]).collect();
        let scaler = FeatureScaler::new(vec![1.0, 0.0], vec![2.0, 1.0]).unwrap();
        let window = b.build(&table(rows), &scaler).unwrap();
        assert_eq!(window, vec![vec![1.0, 0.0], vec![1.5, 0.0]]);
    }

    #[test]
    fn test_column_order_is_enforced() {
        let b = builder(1);
        let swapped = FeatureTable::from_rows(vec!["b".to_string(), "a".to_string()], vec![vec![0.0, 0.0]]).unwrap();
        assert!(matches!(
            b.build(&swapped, &FeatureScaler::identity(2)),
            Err(WindowError::ColumnMismatch { position: 0, .. })
        ));
    }

    #[test]
    fn test_sliding_windows_end_positions() {
        let b = builder(3);
        let prepared: Vec<Vec<f64>> = (0..5).map(|i| vec![i as f64, 0.0]).collect();
        let ends: Vec<f64> = b.sliding(&prepared).unwrap().map(|w| w[2][0]).collect();
        assert_eq!(ends, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_missing_median_rejected_at_construction() {
        let medians = TrainingMedians::new(HashMap::from([("a".to_string(), 1.0)]));
        assert!(matches!(
            InferenceWindowBuilder::new(2, order(), &medians),
            Err(WindowError::MissingMedian(_))
        ));
    }
}
