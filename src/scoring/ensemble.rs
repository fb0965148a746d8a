//! Ensemble combination of the two normalized detector scores.
//!
//! `score = α·reconstruction + (1 − α)·isolation`, or the reconstruction
//! score alone under the single-detector policy. Pure functions, no state.

use serde::{Deserialize, Serialize};

/// Operating policy fixed at calibration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Weighted combination of both detectors
    Ensemble,
    /// Reconstruction detector only; the isolation score is never computed
    #[default]
    SingleDetector,
}

impl OperatingMode {
    pub const fn from_single_detector_flag(single: bool) -> Self {
        if single {
            Self::SingleDetector
        } else {
            Self::Ensemble
        }
    }

    pub const fn is_single_detector(self) -> bool {
        matches!(self, Self::SingleDetector)
    }
}

/// Combine normalized scores. `alpha` is ignored in single-detector mode.
pub fn combine(ae_norm: f64, if_norm: f64, alpha: f64, mode: OperatingMode) -> f64 {
    match mode {
        OperatingMode::SingleDetector => ae_norm,
        OperatingMode::Ensemble => alpha * ae_norm + (1.0 - alpha) * if_norm,
    }
}

/// Element-wise [`combine`] over aligned score arrays.
pub fn combine_all(ae_norm: &[f64], if_norm: &[f64], alpha: f64, mode: OperatingMode) -> Vec<f64> {
    debug_assert_eq!(ae_norm.len(), if_norm.len());
    ae_norm
        .iter()
        .zip(if_norm)
        .map(|(&a, &i)| combine(a, i, alpha, mode))
        .collect()
}

/// Which detectors actually contribute to served scores.
///
/// Resolved once from detector availability and the operating policy.
/// A missing detector contributes a zero score instead of failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPath {
    /// Both detectors, weighted by α
    Ensemble,
    /// Reconstruction detector only (policy, or isolation missing)
    ReconstructionOnly,
    /// Reconstruction unavailable; its contribution is zeroed
    IsolationOnly,
    /// Neither detector available; every score is 0.0 and carries no meaning
    Unavailable,
}

impl ScoringPath {
    pub const fn resolve(mode: OperatingMode, reconstruction: bool, isolation: bool) -> Self {
        match (mode, reconstruction, isolation) {
            (OperatingMode::SingleDetector, true, _) => Self::ReconstructionOnly,
            (OperatingMode::Ensemble, true, true) => Self::Ensemble,
            (OperatingMode::Ensemble, true, false) => Self::ReconstructionOnly,
            (_, false, true) => Self::IsolationOnly,
            (_, false, false) => Self::Unavailable,
        }
    }

    pub const fn uses_reconstruction(self) -> bool {
        matches!(self, Self::Ensemble | Self::ReconstructionOnly)
    }

    pub const fn uses_isolation(self) -> bool {
        matches!(self, Self::Ensemble | Self::IsolationOnly)
    }

    pub const fn is_available(self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl std::fmt::Display for ScoringPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringPath::Ensemble => write!(f, "ensemble"),
            ScoringPath::ReconstructionOnly => write!(f, "reconstruction_only"),
            ScoringPath::IsolationOnly => write!(f, "isolation_only"),
            ScoringPath::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Calibrated combiner: α and policy from the calibration artifact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleCombiner {
    pub alpha: f64,
    pub mode: OperatingMode,
}

impl EnsembleCombiner {
    pub const fn new(alpha: f64, mode: OperatingMode) -> Self {
        Self { alpha, mode }
    }

    pub fn combine(&self, ae_norm: f64, if_norm: f64) -> f64 {
        combine(ae_norm, if_norm, self.alpha, self.mode)
    }

    /// Score along a resolved path. Only the scores the path uses are read;
    /// callers pass `0.0` for detectors the path does not use.
    pub fn combine_on_path(&self, path: ScoringPath, ae_norm: f64, if_norm: f64) -> f64 {
        match path {
            ScoringPath::Ensemble => combine(ae_norm, if_norm, self.alpha, OperatingMode::Ensemble),
            ScoringPath::ReconstructionOnly => self.combine(ae_norm, 0.0),
            ScoringPath::IsolationOnly => combine(0.0, if_norm, self.alpha, OperatingMode::Ensemble),
            ScoringPath::Unavailable => 0.0,
        }
    }
}
