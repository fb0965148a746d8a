//! Serving context: windowed inference against the deployed artifacts.
//!
//! ## Architecture
//!
//! A [`ServingContext`] is built once from a [`ModelBundle`] and then shared
//! by reference (it is `Send + Sync`, with no interior mutability). Every call
//! runs the same pipeline:
//!
//! ```text
//! FeatureTable ─► window repair + scale ─► raw scores ─► normalize ─► combine ─► label (> operate_thr)
//! ```
//!
//! ## Degradation
//!
//! The [`ScoringPath`] is resolved at construction from which detectors (each
//! with its scaler) loaded and from the operating policy. A missing detector
//! contributes a zero score. With neither, scores are all zero and health
//! reports the context as not operational.
//!
//! Streaming state ([`StreamMonitor`]) lives outside the context, one per
//! monitored unit.

pub mod bundle;
pub mod health;
pub mod monitor;

pub use bundle::ModelBundle;
pub use health::{HealthDetails, HealthReport, HealthStatus};
pub use monitor::{StreamMonitor, StreamRegistry, StreamUpdate};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationMeta;
use crate::scoring::{EnsembleCombiner, Scorer, ScorerError, ScorerInput, ScoreNormalizer, ScoringPath};
use crate::smoothing::{smooth_alerts, SmoothingError, SmoothingParams};
use crate::storage::ArtifactError;
use crate::types::{
    FeatureContribution, FeatureRecord, FeatureTable, HealthLabel, PredictionBatch, PredictionResult, RollingPrediction,
};
use crate::window::{FeatureScaler, InferenceWindowBuilder, WindowError};

#[derive(Debug, Error)]
pub enum ServingError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Scorer(#[from] ScorerError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Smoothing(#[from] SmoothingError),

    #[error("No input rows")]
    EmptyInput,
}

/// Deployed feature order and model version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureInfo {
    pub feature_order: Vec<String>,
    pub model_version: String,
}

/// A detector together with the scaler its inputs must go through.
#[derive(Debug)]
struct Detector {
    scorer: Scorer,
    scaler: FeatureScaler,
    normalizer: ScoreNormalizer,
}

fn pair_detector(
    label: &str,
    scorer: Option<Scorer>,
    scaler: Option<FeatureScaler>,
    normalizer: ScoreNormalizer,
) -> Option<Detector> {
    match (scorer, scaler) {
        (Some(scorer), Some(scaler)) => Some(Detector {
            scorer,
            scaler,
            normalizer,
        }),
        (Some(_), None) => {
            warn!(detector = label, "Detector loaded without its scaler; treating as unavailable");
            None
        }
        _ => None,
    }
}

/// Immutable serving state, loaded once.
#[derive(Debug)]
pub struct ServingContext {
    meta: CalibrationMeta,
    model_version: String,
    window: InferenceWindowBuilder,
    reconstruction: Option<Detector>,
    isolation: Option<Detector>,
    combiner: EnsembleCombiner,
    path: ScoringPath,
    smoothing: SmoothingParams,
    health: HealthReport,
}

impl ServingContext {
    /// Load the artifact directory and build the context.
    pub fn load(dir: &Path) -> Result<Self, ServingError> {
        Self::from_bundle(ModelBundle::load(dir)?)
    }

    pub fn from_bundle(bundle: ModelBundle) -> Result<Self, ServingError> {
        let ModelBundle {
            meta,
            feature_order,
            medians,
            reconstruction,
            reconstruction_scaler,
            isolation,
            isolation_scaler,
            ..
        } = bundle;

        let details = HealthDetails {
            feature_columns: feature_order.len(),
            iforest_loaded: isolation.is_some(),
            scaler_if_loaded: isolation_scaler.is_some(),
            ae_loaded: reconstruction.is_some(),
            scaler_ae_loaded: reconstruction_scaler.is_some(),
        };

        let window = InferenceWindowBuilder::new(meta.lookback, feature_order, &medians)?;
        let smoothing = meta.smoothing()?;
        let combiner = meta.combiner();

        let reconstruction = pair_detector(
            "reconstruction",
            reconstruction,
            reconstruction_scaler,
            ScoreNormalizer::new("reconstruction", meta.reconstruction_range()),
        );
        let isolation = pair_detector(
            "isolation",
            isolation,
            isolation_scaler,
            ScoreNormalizer::new("isolation", meta.isolation_range()),
        );

        let path = ScoringPath::resolve(combiner.mode, reconstruction.is_some(), isolation.is_some());
        let health = HealthReport::evaluate(details, path);

        match path {
            ScoringPath::Unavailable => warn!("No detector available: scores will be zero"),
            ScoringPath::IsolationOnly => {
                warn!(mode = ?combiner.mode, "Reconstruction detector unavailable; serving isolation only")
            }
            ScoringPath::ReconstructionOnly if !combiner.mode.is_single_detector() => {
                warn!("Isolation detector unavailable; serving reconstruction only")
            }
            _ => {}
        }
        info!(
            scoring_path = %path,
            operational = health.operational,
            lookback = meta.lookback,
            operate_thr = meta.operate_thr,
            "Serving context ready"
        );

        Ok(Self {
            model_version: meta.version_label(),
            meta,
            window,
            reconstruction,
            isolation,
            combiner,
            path,
            smoothing,
            health,
        })
    }

    pub fn meta(&self) -> &CalibrationMeta {
        &self.meta
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn feature_order(&self) -> &[String] {
        self.window.feature_order()
    }

    pub fn lookback(&self) -> usize {
        self.window.lookback()
    }

    pub fn threshold(&self) -> f64 {
        self.meta.operate_thr
    }

    pub fn scoring_path(&self) -> ScoringPath {
        self.path
    }

    pub fn smoothing(&self) -> SmoothingParams {
        self.smoothing
    }

    pub fn health(&self) -> &HealthReport {
        &self.health
    }

    pub fn features(&self) -> FeatureInfo {
        FeatureInfo {
            feature_order: self.feature_order().to_vec(),
            model_version: self.model_version.clone(),
        }
    }

    /// Align records to the deployed feature order, keeping the trailing
    /// `limit_rows` when given (indices stay positions in `records`).
    pub fn table_from_records(&self, records: &[FeatureRecord], limit_rows: Option<usize>) -> FeatureTable {
        let table = FeatureTable::from_records(records, self.feature_order());
        match limit_rows {
            Some(n) if n > 0 => table.tail(n),
            _ => table,
        }
    }

    fn detector_scores(&self, detector: &Detector, input: ScorerInput<'_>) -> Result<f64, ServingError> {
        let raw = detector.scorer.score(input)?;
        Ok(detector.normalizer.normalize(raw))
    }

    /// Combined score from already prepared inputs.
    fn combined(
        &self,
        reconstruction_window: Option<&[Vec<f64>]>,
        isolation_row: Option<&[f64]>,
    ) -> Result<f64, ServingError> {
        let ae = match (&self.reconstruction, reconstruction_window) {
            (Some(d), Some(w)) if self.path.uses_reconstruction() => self.detector_scores(d, ScorerInput::Window(w))?,
            _ => 0.0,
        };
        let iso = match (&self.isolation, isolation_row) {
            (Some(d), Some(r)) if self.path.uses_isolation() => self.detector_scores(d, ScorerInput::Row(r))?,
            _ => 0.0,
        };
        Ok(self.combiner.combine_on_path(self.path, ae, iso))
    }

    fn prepared(
        &self,
        detector: Option<&Detector>,
        uses: bool,
        table: &FeatureTable,
    ) -> Result<Option<Vec<Vec<f64>>>, ServingError> {
        match detector {
            Some(d) if uses => Ok(Some(self.window.prepare(table, &d.scaler)?)),
            _ => Ok(None),
        }
    }

    /// Score every row that closes a full window, in time order.
    ///
    /// Row `t` (for `t >= lookback - 1`) is scored with the window ending at
    /// `t`. Earlier rows are not scored. With `smooth`, K-of-M smoothing runs
    /// over the raw decisions in row order.
    pub fn predict_table(&self, table: &FeatureTable, smooth: bool) -> Result<PredictionBatch, ServingError> {
        if table.is_empty() {
            return Err(ServingError::EmptyInput);
        }
        self.window.check_columns(table)?;
        let lookback = self.lookback();
        if table.len() < lookback {
            return Err(WindowError::InsufficientWindow {
                required: lookback,
                available: table.len(),
            }
            .into());
        }
        // Validates widths and repairs even when no detector will read the rows
        for row in table.rows() {
            self.window.repair_row(row)?;
        }

        let ae_rows = self.prepared(self.reconstruction.as_ref(), self.path.uses_reconstruction(), table)?;
        let if_rows = self.prepared(self.isolation.as_ref(), self.path.uses_isolation(), table)?;

        // Window i ends at row i + lookback - 1
        let ae_windows: Option<Vec<&[Vec<f64>]>> = match &ae_rows {
            Some(rows) => Some(self.window.sliding(rows)?.collect()),
            None => None,
        };
        let scores: Vec<f64> = (0..table.len() + 1 - lookback)
            .into_par_iter()
            .map(|i| {
                let window = ae_windows.as_ref().map(|w| w[i]);
                let row = if_rows.as_ref().map(|rows| rows[i + lookback - 1].as_slice());
                self.combined(window, row)
            })
            .collect::<Result<_, _>>()?;

        let threshold = self.threshold();
        let raw: Vec<bool> = scores.iter().map(|&s| s > threshold).collect();
        let smoothed = if smooth {
            Some(smooth_alerts(&raw, self.smoothing.k, self.smoothing.m)?)
        } else {
            None
        };

        let index = &table.index()[lookback - 1..];
        let results: Vec<PredictionResult> = scores
            .iter()
            .zip(&raw)
            .enumerate()
            .map(|(i, (&score, &anomalous))| PredictionResult {
                index: index[i],
                score,
                label: HealthLabel::from_decision(anomalous),
                smoothed_label: smoothed.as_ref().map(|s| HealthLabel::from_decision(s[i])),
            })
            .collect();

        let batch = PredictionBatch {
            model_version: self.model_version.clone(),
            feature_order: self.feature_order().to_vec(),
            scoring_path: self.path,
            threshold_used: threshold,
            results,
        };
        debug!(
            rows = table.len(),
            scored = batch.results.len(),
            anomalies = batch.anomaly_count(),
            smoothed = smooth,
            "Batch scored"
        );
        Ok(batch)
    }

    /// [`predict_table`](Self::predict_table) over JSON-style records.
    pub fn predict_records(
        &self,
        records: &[FeatureRecord],
        limit_rows: Option<usize>,
        smooth: bool,
    ) -> Result<PredictionBatch, ServingError> {
        self.predict_table(&self.table_from_records(records, limit_rows), smooth)
    }

    /// Combined score of the window formed by the trailing rows of a raw
    /// (unrepaired, unscaled) history.
    pub fn score_rows(&self, rows: &[Vec<f64>]) -> Result<f64, ServingError> {
        self.score_tail(rows).map(|(score, _)| score)
    }

    /// Combined score of the trailing window plus the scaled window the
    /// reconstruction detector saw, when it was used.
    fn score_tail(&self, rows: &[Vec<f64>]) -> Result<(f64, Option<Vec<Vec<f64>>>), ServingError> {
        let lookback = self.lookback();
        if rows.len() < lookback {
            return Err(WindowError::InsufficientWindow {
                required: lookback,
                available: rows.len(),
            }
            .into());
        }
        let tail = &rows[rows.len() - lookback..];
        for row in tail {
            self.window.repair_row(row)?;
        }
        let ae_window = match &self.reconstruction {
            Some(d) if self.path.uses_reconstruction() => Some(self.window.build_from_rows(tail, &d.scaler)?),
            _ => None,
        };
        let if_row = match &self.isolation {
            Some(d) if self.path.uses_isolation() => self.window.prepare_rows(&tail[lookback - 1..], &d.scaler)?.pop(),
            _ => None,
        };
        let score = self.combined(ae_window.as_deref(), if_row.as_deref())?;
        Ok((score, ae_window))
    }

    fn contributions(&self, window: &[Vec<f64>]) -> Result<Option<Vec<FeatureContribution>>, ServingError> {
        let Some(detector) = &self.reconstruction else {
            return Ok(None);
        };
        let values = detector.scorer.feature_contributions(window)?;
        Ok(values.map(|values| {
            self.feature_order()
                .iter()
                .zip(values)
                .map(|(feature, contribution)| FeatureContribution {
                    feature: feature.clone(),
                    contribution,
                })
                .collect()
        }))
    }

    /// Score only the most recent row of `table`.
    pub fn predict_latest(&self, table: &FeatureTable) -> Result<RollingPrediction, ServingError> {
        self.window.check_columns(table)?;
        let index = *table.index().last().ok_or(ServingError::EmptyInput)?;
        let (score, ae_window) = self.score_tail(table.rows())?;
        let feature_contributions = match ae_window {
            Some(window) => self.contributions(&window)?,
            None => None,
        };
        Ok(RollingPrediction {
            index,
            score,
            label: HealthLabel::from_score(score, self.threshold()),
            threshold_used: self.threshold(),
            rows_used: self.lookback(),
            scoring_path: self.path,
            feature_contributions,
        })
    }

    pub fn predict_latest_records(
        &self,
        records: &[FeatureRecord],
        limit_rows: Option<usize>,
    ) -> Result<RollingPrediction, ServingError> {
        self.predict_latest(&self.table_from_records(records, limit_rows))
    }

    /// Fresh per-stream monitor using the artifact's smoothing parameters.
    pub fn monitor(&self) -> StreamMonitor {
        StreamMonitor::new(self.lookback(), self.smoothing)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calibration::artifact::tests::sample_meta;
    use crate::scoring::{IsolationModel, ReconstructionModel};
    use crate::window::TrainingMedians;
    use std::collections::HashMap;

    /// Reconstructs everything as zero: error = mean of squares.
    #[derive(Debug)]
    pub(crate) struct ZeroRecon;

    impl ReconstructionModel for ZeroRecon {
        fn n_features(&self) -> usize {
            1
        }
        fn reconstruct(&self, window: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScorerError> {
            Ok(window.iter().map(|r| vec![0.0; r.len()]).collect())
        }
    }

    /// Score is the row's only feature.
    #[derive(Debug)]
    pub(crate) struct Identity;

    impl IsolationModel for Identity {
        fn n_features(&self) -> usize {
            1
        }
        fn anomaly_score(&self, row: &[f64]) -> Result<f64, ScorerError> {
            Ok(row[0])
        }
    }

    /// One feature "x", lookback 2, bounds [0, 1] for both detectors.
    pub(crate) fn context(ae: bool, iso: bool, single: bool) -> ServingContext {
        let mut meta = sample_meta();
        meta.lookback = 2;
        meta.ae_score_min = 0.0;
        meta.ae_score_max = 1.0;
        meta.if_score_min = 0.0;
        meta.if_score_max = 1.0;
        meta.alpha = 0.5;
        meta.operate_thr = 0.3;
        meta.operate_with_ae_only = single;
        meta.smoothing_k = 2;
        meta.smoothing_m = 3;
        let bundle = ModelBundle {
            dir: std::path::PathBuf::new(),
            meta,
            feature_order: vec!["x".to_string()],
            medians: TrainingMedians::new(HashMap::from([("x".to_string(), 0.0)])),
            reconstruction: ae.then(|| Scorer::Reconstruction(Box::new(ZeroRecon))),
            reconstruction_scaler: ae.then(|| FeatureScaler::identity(1)),
            isolation: iso.then(|| Scorer::Isolation(Box::new(Identity))),
            isolation_scaler: iso.then(|| FeatureScaler::identity(1)),
        };
        ServingContext::from_bundle(bundle).unwrap()
    }

    fn table(values: &[f64]) -> FeatureTable {
        FeatureTable::from_rows(vec!["x".to_string()], values.iter().map(|&v| vec![v]).collect()).unwrap()
    }

    #[test]
    fn test_batch_scores_rows_with_full_windows() {
        let ctx = context(true, true, true);
        let batch = ctx.predict_table(&table(&[0.0, 0.5, 1.0]), false).unwrap();
        assert_eq!(batch.scoring_path, ScoringPath::ReconstructionOnly);
        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.results[0].index, 1);
        // Window [0, 0.5]: mse 0.125
        assert!((batch.results[0].score - 0.125).abs() < 1e-12);
        assert_eq!(batch.results[0].label, HealthLabel::Normal);
        // Window [0.5, 1]: mse 0.625
        assert_eq!(batch.results[1].label, HealthLabel::Anomaly);
        assert!(batch.results[1].smoothed_label.is_none());
    }

    #[test]
    fn test_ensemble_weights_both() {
        let ctx = context(true, true, false);
        let batch = ctx.predict_table(&table(&[0.0, 0.4]), false).unwrap();
        // ae = 0.08, if = 0.4, alpha 0.5
        assert!((batch.results[0].score - 0.24).abs() < 1e-12, "Score: {}", batch.results[0].score);
    }

    #[test]
    fn test_missing_reconstruction_degrades_to_isolation() {
        let ctx = context(false, true, false);
        assert_eq!(ctx.scoring_path(), ScoringPath::IsolationOnly);
        assert!(ctx.health().operational);
        let latest = ctx.predict_latest(&table(&[0.1, 0.8])).unwrap();
        // Reconstruction zeroed: 0.5 * 0.8
        assert!((latest.score - 0.4).abs() < 1e-12);
        assert_eq!(latest.label, HealthLabel::Anomaly);
        assert_eq!(latest.rows_used, 2);
    }

    #[test]
    fn test_single_detector_policy_without_reconstruction_is_operational() {
        let ctx = context(false, true, true);
        assert_eq!(ctx.scoring_path(), ScoringPath::IsolationOnly);
        assert!(ctx.health().operational);
        assert_eq!(ctx.health().status, HealthStatus::Ok);
    }

    #[test]
    fn test_latest_reports_feature_contributions() {
        let ctx = context(true, true, true);
        let latest = ctx.predict_latest(&table(&[0.0, 0.5, 1.0])).unwrap();
        let contribs = latest.feature_contributions.unwrap();
        assert_eq!(contribs.len(), 1);
        assert_eq!(contribs[0].feature, "x");
        // Window [0.5, 1]: (0.25 + 1) / 2
        assert!((contribs[0].contribution - 0.625).abs() < 1e-12);

        let degraded = context(false, true, false);
        let latest = degraded.predict_latest(&table(&[0.0, 0.5])).unwrap();
        assert!(latest.feature_contributions.is_none());
    }

    #[test]
    fn test_no_detectors_returns_zero_scores() {
        let ctx = context(false, false, false);
        assert_eq!(ctx.scoring_path(), ScoringPath::Unavailable);
        assert!(!ctx.health().operational);
        let batch = ctx.predict_table(&table(&[5.0, 9.0, 7.0]), false).unwrap();
        assert!(batch.results.iter().all(|r| r.score == 0.0));
    }

    #[test]
    fn test_short_history_rejected() {
        let ctx = context(true, true, true);
        let err = ctx.predict_latest(&table(&[0.3])).unwrap_err();
        assert!(matches!(
            err,
            ServingError::Window(WindowError::InsufficientWindow { required: 2, available: 1 })
        ));
        assert!(ctx.predict_table(&table(&[0.3]), true).is_err());
    }

    #[test]
    fn test_batch_smoothing_attached() {
        let ctx = context(true, true, true);
        let batch = ctx.predict_table(&table(&[0.0, 1.0, 1.0, 0.0, 0.0]), true).unwrap();
        let smoothed: Vec<HealthLabel> = batch.results.iter().filter_map(|r| r.smoothed_label).collect();
        assert_eq!(smoothed.len(), 4);
        // Raw: [A, A, A, N] -> K=2 of M=3: [N, A, A, A]
        assert_eq!(
            smoothed,
            vec![HealthLabel::Normal, HealthLabel::Anomaly, HealthLabel::Anomaly, HealthLabel::Anomaly]
        );
    }

    #[test]
    fn test_records_missing_values_use_medians() {
        let ctx = context(true, true, true);
        let records: Vec<FeatureRecord> = vec![
            HashMap::from([("x".to_string(), None)]),
            HashMap::from([("other".to_string(), Some(3.0))]),
            HashMap::from([("x".to_string(), Some(1.0))]),
        ];
        let batch = ctx.predict_records(&records, Some(2), false).unwrap();
        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.results[0].index, 2);
        // Window [median 0, 1]: mse 0.5
        assert!((batch.results[0].score - 0.5).abs() < 1e-12);
    }
}
