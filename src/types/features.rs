//! Feature records and the aligned feature table consumed by the window builder.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::window::WindowError;

/// One incoming observation: feature name → value.
///
/// `null` (or an absent key) marks a missing value. Non-finite values are
/// accepted here and repaired later by the window builder.
pub type FeatureRecord = HashMap<String, Option<f64>>;

/// Time-ordered feature matrix aligned to the deployed feature order.
///
/// Missing values are stored as `NaN`; `index` carries each row's position
/// in the caller's original input so results can be mapped back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    columns: Vec<String>,
    index: Vec<usize>,
    rows: Vec<Vec<f64>>,
}

impl FeatureTable {
    /// Align JSON-style records to `feature_order`.
    ///
    /// Columns absent from a record become missing for that row. Keys not in
    /// `feature_order` are ignored.
    pub fn from_records(records: &[FeatureRecord], feature_order: &[String]) -> Self {
        let mut ignored = 0usize;
        let rows: Vec<Vec<f64>> = records
            .iter()
            .map(|record| {
                ignored += record
                    .keys()
                    .filter(|k| !feature_order.iter().any(|f| f == *k))
                    .count();
                align_record(record, feature_order)
            })
            .collect();

        if ignored > 0 {
            debug!(ignored, rows = rows.len(), "Ignored values for columns outside the feature order");
        }

        Self {
            columns: feature_order.to_vec(),
            index: (0..rows.len()).collect(),
            rows,
        }
    }

    /// Build a table from positional rows. Every row must have exactly one
    /// value per column; reordering is the caller's responsibility.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self, WindowError> {
        if let Some(bad) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(WindowError::FeatureCountMismatch {
                expected: columns.len(),
                found: bad.len(),
            });
        }
        Ok(Self {
            index: (0..rows.len()).collect(),
            columns,
            rows,
        })
    }

    /// Keep only the trailing `n` rows. Indices keep their original values.
    pub fn tail(&self, n: usize) -> Self {
        let start = self.rows.len().saturating_sub(n);
        Self {
            columns: self.columns.clone(),
            index: self.index[start..].to_vec(),
            rows: self.rows[start..].to_vec(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index(&self) -> &[usize] {
        &self.index
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Project a single record onto `feature_order`, `NaN` for missing values.
pub fn align_record(record: &FeatureRecord, feature_order: &[String]) -> Vec<f64> {
    feature_order
        .iter()
        .map(|name| record.get(name).copied().flatten().unwrap_or(f64::NAN))
        .collect()
}
