//! Prediction outputs produced by the serving layer.

use serde::{Deserialize, Serialize};

use crate::scoring::ScoringPath;

/// Binary health decision for one scored window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthLabel {
    /// Score at or below the operating threshold
    Normal,
    /// Score strictly above the operating threshold
    Anomaly,
}

impl HealthLabel {
    /// Label a combined score against the operating threshold (strict `>`).
    pub fn from_score(score: f64, threshold: f64) -> Self {
        Self::from_decision(score > threshold)
    }

    pub const fn from_decision(anomalous: bool) -> Self {
        if anomalous {
            Self::Anomaly
        } else {
            Self::Normal
        }
    }

    pub const fn is_anomaly(self) -> bool {
        matches!(self, Self::Anomaly)
    }
}

impl std::fmt::Display for HealthLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthLabel::Normal => write!(f, "NORMAL"),
            HealthLabel::Anomaly => write!(f, "ANOMALY"),
        }
    }
}

/// Result for one scored row. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Row position in the caller's input
    pub index: usize,
    /// Combined normalized score; nominally in [0, 1] but not clamped
    pub score: f64,
    /// Raw (unsmoothed) decision
    pub label: HealthLabel,
    /// Debounced decision, present when batch smoothing was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothed_label: Option<HealthLabel>,
}

/// Rolled-up result for the most recent observation of a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingPrediction {
    pub index: usize,
    pub score: f64,
    pub label: HealthLabel,
    /// Operating threshold the score was compared against
    pub threshold_used: f64,
    /// Rows that formed the scored window
    pub rows_used: usize,
    /// Which detectors contributed to the score
    pub scoring_path: ScoringPath,
    /// Per-feature reconstruction error of the scored window, in deployed
    /// feature order. Absent when the reconstruction detector is not in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_contributions: Option<Vec<FeatureContribution>>,
}

/// Time-averaged squared reconstruction error of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub contribution: f64,
}

/// One-shot batch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionBatch {
    pub model_version: String,
    pub feature_order: Vec<String>,
    pub scoring_path: ScoringPath,
    pub threshold_used: f64,
    pub results: Vec<PredictionResult>,
}

impl PredictionBatch {
    /// Number of rows labeled anomalous (raw decisions).
    pub fn anomaly_count(&self) -> usize {
        self.results.iter().filter(|r| r.label.is_anomaly()).count()
    }
}
