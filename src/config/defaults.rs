//! Engine-wide default constants.
//!
//! Every `EngineConfig` field falls back to one of these when absent from
//! the TOML file. Grouped by config section.

// ============================================================================
// Artifacts
// ============================================================================

/// Directory holding the deployed model bundle and calibration metadata.
pub const ARTIFACT_DIR: &str = "artifacts";

// ============================================================================
// Window
// ============================================================================

/// Rows per inference window (L).
///
/// 24 rows at hourly aggregation = one day of context.
pub const LOOKBACK: usize = 24;

/// Label horizon shift (H) applied when the training labels were built.
pub const HORIZON_SHIFT: usize = 12;

// ============================================================================
// Policy
// ============================================================================

/// Serve the reconstruction detector alone unless told otherwise.
pub const OPERATE_WITH_SINGLE_DETECTOR_ONLY: bool = true;

/// Weight of the reconstruction detector in the ensemble combination.
pub const ALPHA: f64 = 0.9;

// ============================================================================
// Calibration
// ============================================================================

/// Beta of the operating-threshold F-beta search.
pub const F_BETA: f64 = 1.0;

/// Minimum precision the precision-floor search must reach.
pub const PRECISION_TARGET: f64 = 0.60;

/// Candidate thresholds in the F-beta grid.
pub const GRID_SIZE: usize = 400;

/// Beta of the per-detector ranking thresholds (the "F2" thresholds).
pub const RANKING_BETA: f64 = 2.0;

/// Quantile of each detector's reference scores stored as `thr_p95`.
pub const REFERENCE_QUANTILE: f64 = 0.95;

// ============================================================================
// Smoothing
// ============================================================================

/// Raw positives required inside the smoothing window (K).
pub const SMOOTHING_K: usize = 4;

/// Smoothing window length in decisions (M).
pub const SMOOTHING_M: usize = 7;

// ============================================================================
// Serving
// ============================================================================

/// Trailing rows kept from a batch request before scoring.
pub const LIMIT_ROWS: usize = 200;

pub const SMOOTH_BATCHES: bool = true;
