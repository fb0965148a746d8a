//! PDM Engine: equipment health decisions from anomaly detectors
//!
//! Turns raw detector scores into calibrated, debounced NORMAL / ANOMALY
//! decisions for predictive maintenance.
//!
//! ## Architecture
//!
//! - **Scoring**: reconstruction and isolation detectors, score normalization,
//!   weighted ensemble
//! - **Window**: median repair, fixed-length windows, feature scaling
//! - **Calibration**: offline threshold search, ranking metrics, the
//!   `meta.json` artifact
//! - **Smoothing**: K-of-M alert debouncing
//! - **Serving**: batch, latest-row and streaming predictions against a
//!   deployed artifact directory

pub mod calibration;
pub mod config;
pub mod scoring;
pub mod serving;
pub mod smoothing;
pub mod storage;
pub mod types;
pub mod window;

// Re-export engine configuration
pub use config::{ConfigError, EngineConfig};

// Re-export commonly used types
pub use types::{
    FeatureContribution, FeatureRecord, FeatureTable, HealthLabel, PredictionBatch, PredictionResult, RollingPrediction,
};

// Re-export calibration entry points
pub use calibration::{calibrate, CalibrationError, CalibrationInputs, CalibrationMeta, CalibrationSettings};

// Re-export scoring
pub use scoring::{EnsembleCombiner, OperatingMode, Scorer, ScoringPath};

// Re-export serving
pub use serving::{HealthReport, ServingContext, ServingError, StreamMonitor, StreamRegistry, StreamUpdate};

pub use smoothing::{smooth_alerts, AlertState, SmoothingError, SmoothingParams};
pub use storage::ArtifactError;
pub use window::{InferenceWindowBuilder, WindowError};
