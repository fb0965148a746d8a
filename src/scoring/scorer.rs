//! Detector capability interface.
//!
//! The serving layer holds two opaque scorers and only ever asks them for a
//! raw anomaly score. `Scorer` is the tagged variant over the two detector
//! families; the only thing the engine knows about a variant is the input
//! shape it wants (a window, or a single row).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScorerError {
    #[error("Scorer received an empty input")]
    EmptyInput,

    #[error("Input width mismatch: model expects {expected} features, got {found}")]
    InputWidth { expected: usize, found: usize },

    #[error("Invalid model definition: {0}")]
    InvalidModel(String),
}

/// Detector family, used for logging, health detail and artifact naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Reconstruction,
    Isolation,
}

impl DetectorKind {
    /// Short prefix used by calibration artifact fields (`ae_*`, `if_*`).
    pub const fn prefix(self) -> &'static str {
        match self {
            DetectorKind::Reconstruction => "ae",
            DetectorKind::Isolation => "if",
        }
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorKind::Reconstruction => write!(f, "reconstruction"),
            DetectorKind::Isolation => write!(f, "isolation"),
        }
    }
}

/// Sequence model that reconstructs a scaled window.
pub trait ReconstructionModel: Send + Sync + std::fmt::Debug {
    /// Number of features per timestep the model expects.
    fn n_features(&self) -> usize;

    /// Reconstruct every timestep of `window` (rows × features).
    fn reconstruct(&self, window: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScorerError>;

    /// Mean squared reconstruction error over all cells of the window.
    fn reconstruction_error(&self, window: &[Vec<f64>]) -> Result<f64, ScorerError> {
        let reconstructed = self.reconstruct(window)?;
        let (sum, cells) = window
            .iter()
            .zip(&reconstructed)
            .flat_map(|(row, rec)| row.iter().zip(rec))
            .fold((0.0_f64, 0usize), |(sum, n), (x, x_hat)| (sum + (x - x_hat).powi(2), n + 1));
        if cells == 0 {
            return Err(ScorerError::EmptyInput);
        }
        Ok(sum / cells as f64)
    }

    /// Squared reconstruction error of each feature, averaged over the
    /// window's timesteps. Indexed like the window's columns.
    fn feature_contributions(&self, window: &[Vec<f64>]) -> Result<Vec<f64>, ScorerError> {
        let width = window.first().map(Vec::len).ok_or(ScorerError::EmptyInput)?;
        let reconstructed = self.reconstruct(window)?;
        let mut totals = vec![0.0_f64; width];
        for (row, rec) in window.iter().zip(&reconstructed) {
            for ((total, x), x_hat) in totals.iter_mut().zip(row).zip(rec) {
                *total += (x - x_hat).powi(2);
            }
        }
        let steps = window.len() as f64;
        Ok(totals.into_iter().map(|t| t / steps).collect())
    }
}

/// Tree-ensemble isolation model; higher scores are more anomalous.
pub trait IsolationModel: Send + Sync + std::fmt::Debug {
    fn n_features(&self) -> usize;

    fn anomaly_score(&self, row: &[f64]) -> Result<f64, ScorerError>;
}

/// Input handed to a scorer.
#[derive(Debug, Clone, Copy)]
pub enum ScorerInput<'a> {
    /// Scaled window, oldest row first
    Window(&'a [Vec<f64>]),
    /// Single scaled row
    Row(&'a [f64]),
}

/// One loaded detector.
#[derive(Debug)]
pub enum Scorer {
    Reconstruction(Box<dyn ReconstructionModel>),
    Isolation(Box<dyn IsolationModel>),
}

impl Scorer {
    pub fn kind(&self) -> DetectorKind {
        match self {
            Scorer::Reconstruction(_) => DetectorKind::Reconstruction,
            Scorer::Isolation(_) => DetectorKind::Isolation,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Scorer::Reconstruction(m) => m.n_features(),
            Scorer::Isolation(m) => m.n_features(),
        }
    }

    /// Per-feature reconstruction error of `window`; `None` for detectors
    /// that do not reconstruct their input.
    pub fn feature_contributions(&self, window: &[Vec<f64>]) -> Result<Option<Vec<f64>>, ScorerError> {
        match self {
            Scorer::Reconstruction(m) => m.feature_contributions(window).map(Some),
            Scorer::Isolation(_) => Ok(None),
        }
    }

    /// Raw anomaly score, adapting the input shape to the variant:
    /// a row given to a reconstruction model is a one-step window, and a
    /// window given to an isolation model is scored on its latest row.
    pub fn score(&self, input: ScorerInput<'_>) -> Result<f64, ScorerError> {
        match (self, input) {
            (Scorer::Reconstruction(m), ScorerInput::Window(w)) => m.reconstruction_error(w),
            (Scorer::Reconstruction(m), ScorerInput::Row(r)) => m.reconstruction_error(&[r.to_vec()]),
            (Scorer::Isolation(m), ScorerInput::Row(r)) => m.anomaly_score(r),
            (Scorer::Isolation(m), ScorerInput::Window(w)) => {
                let last = w.last().ok_or(ScorerError::EmptyInput)?;
                m.anomaly_score(last)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reconstructs every value as zero, so the error is the mean of squares.
    #[derive(Debug)]
    struct ZeroModel;

    impl ReconstructionModel for ZeroModel {
        fn n_features(&self) -> usize {
            2
        }
        fn reconstruct(&self, window: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScorerError> {
            Ok(window.iter().map(|r| vec![0.0; r.len()]).collect())
        }
    }

    /// Scores a row by its first feature.
    #[derive(Debug)]
    struct FirstFeature;

    impl IsolationModel for FirstFeature {
        fn n_features(&self) -> usize {
            2
        }
        fn anomaly_score(&self, row: &[f64]) -> Result<f64, ScorerError> {
            row.first().copied().ok_or(ScorerError::EmptyInput)
        }
    }

    #[test]
    fn test_reconstruction_error_is_mean_square() {
        let scorer = Scorer::Reconstruction(Box::new(ZeroModel));
        let window = vec![vec![1.0, 1.0], vec![2.0, 0.0]];
        let score = scorer.score(ScorerInput::Window(&window)).unwrap();
        assert!((score - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_feature_contributions_average_over_time() {
        let scorer = Scorer::Reconstruction(Box::new(ZeroModel));
        let window = vec![vec![1.0, 2.0], vec![3.0, 0.0]];
        let contribs = scorer.feature_contributions(&window).unwrap().unwrap();
        assert_eq!(contribs, vec![5.0, 2.0]);
        // Their mean is the window's reconstruction error
        let score = scorer.score(ScorerInput::Window(&window)).unwrap();
        assert!((contribs.iter().sum::<f64>() / 2.0 - score).abs() < 1e-12);

        let forest = Scorer::Isolation(Box::new(FirstFeature));
        assert_eq!(forest.feature_contributions(&window).unwrap(), None);
    }

    #[test]
    fn test_empty_window_is_error() {
        let scorer = Scorer::Reconstruction(Box::new(ZeroModel));
        assert_eq!(scorer.score(ScorerInput::Window(&[])), Err(ScorerError::EmptyInput));
    }

    #[test]
    fn test_isolation_scores_latest_row_of_window() {
        let scorer = Scorer::Isolation(Box::new(FirstFeature));
        let window = vec![vec![0.1, 0.0], vec![0.7, 0.0]];
        assert_eq!(scorer.score(ScorerInput::Window(&window)).unwrap(), 0.7);
        assert_eq!(scorer.kind(), DetectorKind::Isolation);
        assert_eq!(scorer.kind().prefix(), "if");
    }
}
