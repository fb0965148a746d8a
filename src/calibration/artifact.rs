//! Calibration artifact (`meta.json`).
//!
//! Written once by the calibration job and loaded read-only by the serving
//! layer. Normalized-scale thresholds (`operate_thr`, `ens_thr_f2`) are
//! comparable with served scores; the per-detector `*_thr_*` values are on
//! each detector's raw scale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use super::threshold::ThresholdFallback;
use crate::scoring::{EnsembleCombiner, NormalizationRange, OperatingMode};
use crate::smoothing::SmoothingParams;
use crate::storage::{self, ArtifactError};

pub const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMeta {
    pub lookback: usize,
    pub horizon_shift: usize,
    pub classes: Vec<String>,
    pub normal_id: usize,

    pub ae_thr_p95: f64,
    pub ae_thr_f2: f64,
    #[serde(default)]
    pub ae_roc_auc: Option<f64>,
    #[serde(default)]
    pub ae_pr_auc: Option<f64>,
    pub ae_score_min: f64,
    pub ae_score_max: f64,

    pub if_thr_p95: f64,
    pub if_thr_f2: f64,
    #[serde(default)]
    pub if_roc_auc: Option<f64>,
    #[serde(default)]
    pub if_pr_auc: Option<f64>,
    pub if_score_min: f64,
    pub if_score_max: f64,

    pub alpha: f64,
    pub ens_thr_f2: f64,
    #[serde(default)]
    pub ens_roc_auc: Option<f64>,
    #[serde(default)]
    pub ens_pr_auc: Option<f64>,

    /// Single-detector (reconstruction-only) operating policy
    #[serde(alias = "operate_with_single_detector_only")]
    pub operate_with_ae_only: bool,
    /// Operating threshold on the normalized scale
    pub operate_thr: f64,
    pub operate_f_beta: f64,
    pub operate_precision_target: f64,
    pub smoothing_k: usize,
    pub smoothing_m: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Threshold searches that fell back to a boundary value
    #[serde(default)]
    pub threshold_fallbacks: Vec<ThresholdFallback>,
}

impl CalibrationMeta {
    pub fn reconstruction_range(&self) -> NormalizationRange {
        NormalizationRange::new(self.ae_score_min, self.ae_score_max)
    }

    pub fn isolation_range(&self) -> NormalizationRange {
        NormalizationRange::new(self.if_score_min, self.if_score_max)
    }

    pub fn mode(&self) -> OperatingMode {
        OperatingMode::from_single_detector_flag(self.operate_with_ae_only)
    }

    pub fn combiner(&self) -> EnsembleCombiner {
        EnsembleCombiner::new(self.alpha, self.mode())
    }

    pub fn smoothing(&self) -> Result<SmoothingParams, ArtifactError> {
        SmoothingParams::new(self.smoothing_k, self.smoothing_m).map_err(|e| ArtifactError::Invalid {
            name: "meta",
            message: e.to_string(),
        })
    }

    /// Version string reported to clients, derived when none was recorded.
    pub fn version_label(&self) -> String {
        self.model_version
            .clone()
            .unwrap_or_else(|| format!("h{}-l{}", self.horizon_shift, self.lookback))
    }

    /// Structural checks run on load.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        let mut problems = Vec::new();
        if self.lookback == 0 {
            problems.push("lookback must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            problems.push(format!("alpha must be in [0, 1], got {}", self.alpha));
        }
        for (name, value) in [
            ("operate_thr", self.operate_thr),
            ("ae_score_min", self.ae_score_min),
            ("ae_score_max", self.ae_score_max),
            ("if_score_min", self.if_score_min),
            ("if_score_max", self.if_score_max),
        ] {
            if !value.is_finite() {
                problems.push(format!("{name} must be finite"));
            }
        }
        if !self.classes.is_empty() && self.normal_id >= self.classes.len() {
            problems.push(format!(
                "normal_id {} out of range for {} classes",
                self.normal_id,
                self.classes.len()
            ));
        }
        if let Err(e) = SmoothingParams::new(self.smoothing_k, self.smoothing_m) {
            problems.push(e.to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ArtifactError::Invalid {
                name: "meta",
                message: problems.join("; "),
            })
        }
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let meta: Self = storage::read_json("meta", path)?;
        meta.validate()?;
        Ok(meta)
    }

    /// Path of the horizon-tagged copy kept for comparing horizons.
    pub fn tagged_file_name(&self) -> String {
        format!("meta_h{}.json", self.horizon_shift)
    }

    /// Write `meta.json` and its horizon-tagged copy into `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ArtifactError> {
        let path = dir.join(META_FILE);
        storage::write_json_atomic(&path, self)?;
        storage::write_json_atomic(&dir.join(self.tagged_file_name()), self)?;
        info!(
            path = %path.display(),
            operate_thr = self.operate_thr,
            fallbacks = self.threshold_fallbacks.len(),
            "Calibration artifact saved"
        );
        Ok(path)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_meta() -> CalibrationMeta {
        CalibrationMeta {
            lookback: 24,
            horizon_shift: 12,
            classes: vec!["FALLA".to_string(), "NORMAL".to_string()],
            normal_id: 1,
            ae_thr_p95: 0.08,
            ae_thr_f2: 0.09,
            ae_roc_auc: Some(0.81),
            ae_pr_auc: Some(0.42),
            ae_score_min: 0.01,
            ae_score_max: 0.10,
            if_thr_p95: 0.55,
            if_thr_f2: 0.57,
            if_roc_auc: Some(0.7),
            if_pr_auc: None,
            if_score_min: 0.35,
            if_score_max: 0.65,
            alpha: 0.9,
            ens_thr_f2: 0.5,
            ens_roc_auc: Some(0.83),
            ens_pr_auc: Some(0.45),
            operate_with_ae_only: true,
            operate_thr: 0.6,
            operate_f_beta: 1.0,
            operate_precision_target: 0.6,
            smoothing_k: 4,
            smoothing_m: 7,
            model_version: None,
            created_at: None,
            threshold_fallbacks: Vec::new(),
        }
    }

    #[test]
    fn test_accepts_single_detector_alias() {
        let mut json = serde_json::to_value(sample_meta()).unwrap();
        let obj = json.as_object_mut().unwrap();
        let flag = obj.remove("operate_with_ae_only").unwrap();
        obj.insert("operate_with_single_detector_only".to_string(), flag);
        let meta: CalibrationMeta = serde_json::from_value(json).unwrap();
        assert_eq!(meta.mode(), OperatingMode::SingleDetector);
    }

    #[test]
    fn test_missing_auc_is_null() {
        let json = serde_json::to_value(sample_meta()).unwrap();
        assert!(json["if_pr_auc"].is_null());
        assert!(json.get("threshold_fallbacks").is_some());
    }

    #[test]
    fn test_validate_rejects_bad_smoothing() {
        let mut meta = sample_meta();
        meta.smoothing_k = 9;
        let err = meta.validate().unwrap_err();
        assert!(err.to_string().contains("k=9"), "{}", err);
    }

    #[test]
    fn test_save_writes_tagged_copy() {
        let dir = tempfile::tempdir().unwrap();
        let meta = sample_meta();
        let path = meta.save(dir.path()).unwrap();
        assert!(dir.path().join("meta_h12.json").exists());
        let loaded = CalibrationMeta::load(&path).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.version_label(), "h12-l24");
    }

    #[test]
    fn test_ranges_from_fields() {
        let meta = sample_meta();
        assert_eq!(meta.reconstruction_range(), NormalizationRange::new(0.01, 0.10));
        assert_eq!(meta.isolation_range(), NormalizationRange::new(0.35, 0.65));
        assert_eq!(meta.combiner().alpha, 0.9);
    }
}
