//! Offline threshold calibration.
//!
//! ## Architecture
//!
//! Consumes raw detector scores on reference (training-normal) and validation
//! data plus validation class labels, and produces the [`CalibrationMeta`]
//! artifact the serving layer loads:
//!
//! 1. **Labels**: sorted class vocabulary, normal class, binary targets
//! 2. **Alignment**: validation sequences end at rows `L-1 ..= N-1-H`; row
//!    scores and labels are sliced to the same rows
//! 3. **Per detector**: reference quantile, F2 threshold, ROC/PR AUC, bounds
//! 4. **Normalize + ensemble** with the reference bounds
//! 5. **Operating threshold**: `max(F-beta best, precision floor)`
//! 6. **Evaluation** of raw vs smoothed decisions
//!
//! Deterministic: identical inputs and settings give an identical artifact
//! (apart from `created_at`).

pub mod artifact;
pub mod labels;
pub mod metrics;
pub mod threshold;

pub use artifact::{CalibrationMeta, META_FILE};
pub use labels::{LabelEncoding, NORMAL_CLASS};
pub use metrics::{average_precision, ranking_metrics, reference_quantile, roc_auc, DecisionSummary};
pub use threshold::{
    best_threshold_fbeta, f_beta, operating_threshold, precision_recall_curve, threshold_for_min_precision,
    threshold_grid, ConfusionCounts, CurvePoint, FallbackReason, FbetaSearch, OperatingThreshold,
    PrecisionFloorSearch, ThresholdFallback, ThresholdSearch,
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::scoring::{combine_all, NormalizationRange, OperatingMode, ScoreNormalizer};
use crate::smoothing::{smooth_alerts, SmoothingError, SmoothingParams};
use crate::storage::{self, ArtifactError};

/// Evaluation rows written next to the artifact.
pub const EVALUATION_FILE: &str = "eval_valid_window.json";

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Validation set is empty after alignment")]
    EmptyValidationSet,

    #[error("Length mismatch: {scores} scores vs {labels} labels")]
    LengthMismatch { scores: usize, labels: usize },

    #[error("{series}: expected {expected} aligned values, found {found}")]
    Misaligned {
        series: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Non-finite score at position {index}")]
    NonFiniteScore { index: usize },

    #[error("Reference distribution '{0}' has no finite values")]
    EmptyReference(&'static str),

    #[error("Invalid calibration parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Smoothing(#[from] SmoothingError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

// ============================================================================
// Inputs and settings
// ============================================================================

/// Raw detector scores and labels handed over by the training job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationInputs {
    /// Reconstruction errors on training sequences
    pub reconstruction_reference: Vec<f64>,
    /// Reconstruction errors on validation sequences, one per aligned row
    pub reconstruction_validation: Vec<f64>,
    /// Isolation scores on training-normal rows
    pub isolation_reference: Vec<f64>,
    /// Isolation scores on every validation row
    pub isolation_validation: Vec<f64>,
    /// Class name of every validation row
    pub validation_labels: Vec<String>,
    /// Class names of the training rows, used to pick the normal class
    /// when no class is called `NORMAL`
    #[serde(default)]
    pub reference_labels: Vec<String>,
    /// Identifier (e.g. timestamp) of every validation row
    #[serde(default)]
    pub validation_index: Option<Vec<String>>,
    #[serde(default)]
    pub model_version: Option<String>,
}

impl CalibrationInputs {
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        storage::read_json("calibration_inputs", path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSettings {
    pub lookback: usize,
    pub horizon_shift: usize,
    pub mode: OperatingMode,
    pub alpha: f64,
    /// Beta of the operating F-beta search
    pub f_beta: f64,
    pub precision_target: f64,
    pub grid_size: usize,
    /// Beta of the per-detector and ensemble ranking thresholds (`*_thr_f2`)
    pub ranking_beta: f64,
    pub reference_quantile: f64,
    pub smoothing: SmoothingParams,
}

impl CalibrationSettings {
    /// Rows `start..end` of the validation set that have a full sequence.
    fn aligned_rows(&self, n_rows: usize) -> Result<std::ops::Range<usize>, CalibrationError> {
        if self.lookback == 0 {
            return Err(CalibrationError::InvalidParameter("lookback must be at least 1".to_string()));
        }
        let start = self.lookback - 1;
        let end = n_rows.saturating_sub(self.horizon_shift);
        if end <= start {
            return Err(CalibrationError::EmptyValidationSet);
        }
        Ok(start..end)
    }
}

// ============================================================================
// Outputs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRow {
    pub index: String,
    pub y_true: bool,
    pub operate_score: f64,
    pub operate_pred_raw: bool,
    pub operate_pred_smooth: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub operate_thr: f64,
    pub raw: DecisionSummary,
    pub smoothed: DecisionSummary,
    pub rows: Vec<EvaluationRow>,
}

#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub meta: CalibrationMeta,
    pub evaluation: EvaluationReport,
}

impl CalibrationOutcome {
    /// Write the artifact, its horizon-tagged copy and the evaluation rows.
    pub fn persist(&self, dir: &Path) -> Result<PathBuf, ArtifactError> {
        let path = self.meta.save(dir)?;
        storage::write_json_atomic(&dir.join(EVALUATION_FILE), &self.evaluation)?;
        Ok(path)
    }
}

// ============================================================================
// Calibration job
// ============================================================================

/// Per-detector summary fields of the artifact.
struct DetectorCalibration {
    thr_p95: f64,
    thr_f2: f64,
    roc_auc: Option<f64>,
    pr_auc: Option<f64>,
    range: NormalizationRange,
}

fn calibrate_detector(
    series: &'static str,
    reference: &[f64],
    validation: &[f64],
    labels: &[bool],
    settings: &CalibrationSettings,
    fallbacks: &mut Vec<ThresholdFallback>,
) -> Result<DetectorCalibration, CalibrationError> {
    let range = NormalizationRange::from_reference(reference).ok_or(CalibrationError::EmptyReference(series))?;
    let thr_p95 =
        reference_quantile(reference, settings.reference_quantile).ok_or(CalibrationError::EmptyReference(series))?;
    let ranking = best_threshold_fbeta(validation, labels, settings.ranking_beta, settings.grid_size)?;
    if let Some(reason) = ranking.fallback {
        fallbacks.push(ThresholdFallback {
            series: series.to_string(),
            search: ThresholdSearch::FBeta,
            threshold: ranking.threshold,
            reason,
        });
    }
    let (roc_auc, pr_auc) = ranking_metrics(validation, labels)?;
    if roc_auc.is_none() {
        warn!(detector = series, "Validation labels have a single class; AUC undefined");
    }
    info!(
        detector = series,
        thr_p95,
        thr_f2 = ranking.threshold,
        roc_auc = roc_auc.unwrap_or(f64::NAN),
        pr_auc = pr_auc.unwrap_or(f64::NAN),
        "Detector calibrated"
    );
    Ok(DetectorCalibration {
        thr_p95,
        thr_f2: ranking.threshold,
        roc_auc,
        pr_auc,
        range,
    })
}

/// Run the full calibration and build the artifact (nothing is written).
pub fn calibrate(
    inputs: &CalibrationInputs,
    settings: &CalibrationSettings,
) -> Result<CalibrationOutcome, CalibrationError> {
    if !(0.0..=1.0).contains(&settings.alpha) {
        return Err(CalibrationError::InvalidParameter(format!(
            "alpha must be in [0, 1], got {}",
            settings.alpha
        )));
    }

    // Labels
    let n_rows = inputs.validation_labels.len();
    if inputs.isolation_validation.len() != n_rows {
        return Err(CalibrationError::LengthMismatch {
            scores: inputs.isolation_validation.len(),
            labels: n_rows,
        });
    }
    let encoding = LabelEncoding::fit(&inputs.validation_labels, &inputs.reference_labels)?;
    let y_rows = encoding.binarize(&inputs.validation_labels);

    // Alignment
    let rows = settings.aligned_rows(n_rows)?;
    let y = &y_rows[rows.clone()];
    if inputs.reconstruction_validation.len() != y.len() {
        return Err(CalibrationError::Misaligned {
            series: "reconstruction_validation",
            expected: y.len(),
            found: inputs.reconstruction_validation.len(),
        });
    }
    let if_aligned = &inputs.isolation_validation[rows.clone()];

    let mut fallbacks = Vec::new();

    // Per-detector summaries. Isolation metrics use every validation row.
    let ae = calibrate_detector(
        "reconstruction",
        &inputs.reconstruction_reference,
        &inputs.reconstruction_validation,
        y,
        settings,
        &mut fallbacks,
    )?;
    let iso = calibrate_detector(
        "isolation",
        &inputs.isolation_reference,
        &inputs.isolation_validation,
        &y_rows,
        settings,
        &mut fallbacks,
    )?;

    // Normalize and ensemble
    let ae_norm = ScoreNormalizer::new("reconstruction", ae.range).normalize_all(&inputs.reconstruction_validation);
    let if_norm = ScoreNormalizer::new("isolation", iso.range).normalize_all(if_aligned);
    let ensemble = combine_all(&ae_norm, &if_norm, settings.alpha, OperatingMode::Ensemble);
    let (ens_roc_auc, ens_pr_auc) = ranking_metrics(&ensemble, y)?;
    let ens_ranking = best_threshold_fbeta(&ensemble, y, settings.ranking_beta, settings.grid_size)?;
    if let Some(reason) = ens_ranking.fallback.clone() {
        fallbacks.push(ThresholdFallback {
            series: "ensemble".to_string(),
            search: ThresholdSearch::FBeta,
            threshold: ens_ranking.threshold,
            reason,
        });
    }

    // Operating policy
    let operate_score = if settings.mode.is_single_detector() { &ae_norm } else { &ensemble };
    let operating = operating_threshold(
        operate_score,
        y,
        settings.f_beta,
        settings.precision_target,
        settings.grid_size,
    )?;
    fallbacks.extend(operating.fallbacks("operate"));
    let operate_thr = operating.threshold;

    // Evaluation
    let raw: Vec<bool> = operate_score.iter().map(|&s| s > operate_thr).collect();
    let smoothed = smooth_alerts(&raw, settings.smoothing.k, settings.smoothing.m)?;
    let raw_summary = DecisionSummary::from_decisions(&raw, y);
    let smoothed_summary = DecisionSummary::from_decisions(&smoothed, y);
    info!(
        mode = ?settings.mode,
        operate_thr,
        raw_precision = raw_summary.precision,
        raw_recall = raw_summary.recall,
        smoothed_precision = smoothed_summary.precision,
        smoothed_recall = smoothed_summary.recall,
        smoothed_f1 = smoothed_summary.f1,
        fallbacks = fallbacks.len(),
        "Operating threshold calibrated"
    );

    let row_ids: Vec<String> = match &inputs.validation_index {
        Some(index) if index.len() == n_rows => index[rows.clone()].to_vec(),
        Some(index) => {
            return Err(CalibrationError::Misaligned {
                series: "validation_index",
                expected: n_rows,
                found: index.len(),
            })
        }
        None => rows.clone().map(|r| r.to_string()).collect(),
    };
    let eval_rows = row_ids
        .into_iter()
        .zip(y)
        .zip(operate_score.iter().zip(raw.iter().zip(&smoothed)))
        .map(|((index, &y_true), (&operate_score, (&raw, &smooth)))| EvaluationRow {
            index,
            y_true,
            operate_score,
            operate_pred_raw: raw,
            operate_pred_smooth: smooth,
        })
        .collect();

    let meta = CalibrationMeta {
        lookback: settings.lookback,
        horizon_shift: settings.horizon_shift,
        classes: encoding.classes,
        normal_id: encoding.normal_id,
        ae_thr_p95: ae.thr_p95,
        ae_thr_f2: ae.thr_f2,
        ae_roc_auc: ae.roc_auc,
        ae_pr_auc: ae.pr_auc,
        ae_score_min: ae.range.lo,
        ae_score_max: ae.range.hi,
        if_thr_p95: iso.thr_p95,
        if_thr_f2: iso.thr_f2,
        if_roc_auc: iso.roc_auc,
        if_pr_auc: iso.pr_auc,
        if_score_min: iso.range.lo,
        if_score_max: iso.range.hi,
        alpha: settings.alpha,
        ens_thr_f2: ens_ranking.threshold,
        ens_roc_auc,
        ens_pr_auc,
        operate_with_ae_only: settings.mode.is_single_detector(),
        operate_thr,
        operate_f_beta: settings.f_beta,
        operate_precision_target: settings.precision_target,
        smoothing_k: settings.smoothing.k,
        smoothing_m: settings.smoothing.m,
        model_version: inputs.model_version.clone(),
        created_at: Some(Utc::now()),
        threshold_fallbacks: fallbacks,
    };

    Ok(CalibrationOutcome {
        meta,
        evaluation: EvaluationReport {
            operate_thr,
            raw: raw_summary,
            smoothed: smoothed_summary,
            rows: eval_rows,
        },
    })
}
