//! Loading the deployed artifact directory.
//!
//! Required: `meta.json`, `feature_columns.csv`, `medians.json`.
//! Optional (a missing file degrades scoring): the two detector models and
//! their scalers. A file that exists but fails to parse or validate is an
//! error either way.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::calibration::{CalibrationMeta, META_FILE};
use crate::scoring::{IsolationForest, LinearAutoencoder, ReconstructionModel, Scorer};
use crate::storage::{self, ArtifactError};
use crate::window::{FeatureScaler, TrainingMedians};

pub const FEATURE_COLUMNS_FILE: &str = "feature_columns.csv";
pub const MEDIANS_FILE: &str = "medians.json";
pub const RECONSTRUCTION_MODEL_FILE: &str = "ae_model.json";
pub const RECONSTRUCTION_SCALER_FILE: &str = "scaler_ae.json";
pub const ISOLATION_MODEL_FILE: &str = "iforest.json";
pub const ISOLATION_SCALER_FILE: &str = "scaler_if.json";

/// Everything the serving layer needs, as loaded from disk.
#[derive(Debug)]
pub struct ModelBundle {
    pub dir: PathBuf,
    pub meta: CalibrationMeta,
    pub feature_order: Vec<String>,
    pub medians: TrainingMedians,
    pub reconstruction: Option<Scorer>,
    pub reconstruction_scaler: Option<FeatureScaler>,
    pub isolation: Option<Scorer>,
    pub isolation_scaler: Option<FeatureScaler>,
}

fn check_width(name: &'static str, found: usize, expected: usize) -> Result<(), ArtifactError> {
    if found != expected {
        return Err(ArtifactError::Invalid {
            name,
            message: format!("expects {found} features, feature order has {expected}"),
        });
    }
    Ok(())
}

fn invalid(name: &'static str, err: impl std::fmt::Display) -> ArtifactError {
    ArtifactError::Invalid {
        name,
        message: err.to_string(),
    }
}

fn load_scaler(dir: &Path, file: &str, name: &'static str, width: usize) -> Result<Option<FeatureScaler>, ArtifactError> {
    let Some(scaler) = storage::read_optional_json::<FeatureScaler>(name, &dir.join(file))? else {
        warn!(artifact = name, "Scaler not found");
        return Ok(None);
    };
    scaler.validate().map_err(|e| invalid(name, e))?;
    check_width(name, scaler.n_features(), width)?;
    Ok(Some(scaler))
}

impl ModelBundle {
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let meta = CalibrationMeta::load(&dir.join(META_FILE))?;
        let feature_order = storage::read_feature_columns(&dir.join(FEATURE_COLUMNS_FILE))?;
        let medians: TrainingMedians = storage::read_json("medians", &dir.join(MEDIANS_FILE))?;
        let width = feature_order.len();

        let reconstruction = match storage::read_optional_json::<LinearAutoencoder>(
            "reconstruction_model",
            &dir.join(RECONSTRUCTION_MODEL_FILE),
        )? {
            Some(model) => {
                model.validate().map_err(|e| invalid("reconstruction_model", e))?;
                check_width("reconstruction_model", model.n_features(), width)?;
                Some(Scorer::Reconstruction(Box::new(model)))
            }
            None => {
                warn!(artifact = "reconstruction_model", "Detector model not found");
                None
            }
        };

        let isolation = match storage::read_optional_json::<IsolationForest>(
            "isolation_model",
            &dir.join(ISOLATION_MODEL_FILE),
        )? {
            Some(model) => {
                model.validate().map_err(|e| invalid("isolation_model", e))?;
                check_width("isolation_model", model.n_features, width)?;
                Some(Scorer::Isolation(Box::new(model)))
            }
            None => {
                warn!(artifact = "isolation_model", "Detector model not found");
                None
            }
        };

        let reconstruction_scaler =
            load_scaler(dir, RECONSTRUCTION_SCALER_FILE, "reconstruction_scaler", width)?;
        let isolation_scaler = load_scaler(dir, ISOLATION_SCALER_FILE, "isolation_scaler", width)?;

        info!(
            dir = %dir.display(),
            features = width,
            reconstruction = reconstruction.is_some(),
            isolation = isolation.is_some(),
            "Model bundle loaded"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
            feature_order,
            medians,
            reconstruction,
            reconstruction_scaler,
            isolation,
            isolation_scaler,
        })
    }
}
