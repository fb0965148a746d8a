use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::calibration::CalibrationSettings;
use crate::scoring::OperatingMode;
use crate::smoothing::SmoothingParams;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "PDM_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "pdm_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration of the engine.
///
/// Load with [`EngineConfig::load`], which searches:
/// 1. `$PDM_CONFIG`
/// 2. `./pdm_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Window geometry shared by calibration and serving
    #[serde(default)]
    pub window: WindowConfig,

    /// Detector selection and ensemble weight
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Threshold search parameters
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// K-of-M alert smoothing
    #[serde(default)]
    pub smoothing: SmoothingConfig,

    #[serde(default)]
    pub serving: ServingConfig,
}

impl EngineConfig {
    /// Load configuration using the standard search order. A file that fails
    /// to load is logged and skipped.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded engine config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded engine config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file. Unknown keys are logged as warnings;
    /// parse and range errors fail.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Engine config saved");
        Ok(())
    }

    /// Fatal range checks. Suspicious-but-legal values are only logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!(field = %w.field, "{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn mode(&self) -> OperatingMode {
        OperatingMode::from_single_detector_flag(self.policy.operate_with_single_detector_only)
    }

    pub fn smoothing_params(&self) -> Result<SmoothingParams, ConfigError> {
        SmoothingParams::new(self.smoothing.k, self.smoothing.m)
            .map_err(|e| ConfigError::Validation(vec![format!("smoothing: {e}")]))
    }

    /// Parameters for an offline calibration run.
    pub fn calibration_settings(&self) -> Result<CalibrationSettings, ConfigError> {
        Ok(CalibrationSettings {
            lookback: self.window.lookback,
            horizon_shift: self.window.horizon_shift,
            mode: self.mode(),
            alpha: self.policy.alpha,
            f_beta: self.calibration.f_beta,
            precision_target: self.calibration.precision_target,
            grid_size: self.calibration.grid_size,
            ranking_beta: self.calibration.ranking_beta,
            reference_quantile: self.calibration.reference_quantile,
            smoothing: self.smoothing_params()?,
        })
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => write!(f, "Config parse error ({}): {}", path.display(), e),
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Overridden by `--artifacts` / `PDM_ARTIFACT_DIR` on the command line
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(defaults::ARTIFACT_DIR)
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    #[serde(default = "default_horizon_shift")]
    pub horizon_shift: usize,
}

fn default_lookback() -> usize {
    defaults::LOOKBACK
}

fn default_horizon_shift() -> usize {
    defaults::HORIZON_SHIFT
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            horizon_shift: default_horizon_shift(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_single_detector")]
    pub operate_with_single_detector_only: bool,
    /// Reconstruction weight; the isolation detector gets `1 - alpha`
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_single_detector() -> bool {
    defaults::OPERATE_WITH_SINGLE_DETECTOR_ONLY
}

fn default_alpha() -> f64 {
    defaults::ALPHA
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            operate_with_single_detector_only: default_single_detector(),
            alpha: default_alpha(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_f_beta")]
    pub f_beta: f64,
    #[serde(default = "default_precision_target")]
    pub precision_target: f64,
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    #[serde(default = "default_ranking_beta")]
    pub ranking_beta: f64,
    #[serde(default = "default_reference_quantile")]
    pub reference_quantile: f64,
}

fn default_f_beta() -> f64 {
    defaults::F_BETA
}

fn default_precision_target() -> f64 {
    defaults::PRECISION_TARGET
}

fn default_grid_size() -> usize {
    defaults::GRID_SIZE
}

fn default_ranking_beta() -> f64 {
    defaults::RANKING_BETA
}

fn default_reference_quantile() -> f64 {
    defaults::REFERENCE_QUANTILE
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            f_beta: default_f_beta(),
            precision_target: default_precision_target(),
            grid_size: default_grid_size(),
            ranking_beta: default_ranking_beta(),
            reference_quantile: default_reference_quantile(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_m")]
    pub m: usize,
}

fn default_k() -> usize {
    defaults::SMOOTHING_K
}

fn default_m() -> usize {
    defaults::SMOOTHING_M
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            m: default_m(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Trailing rows kept from a batch request
    #[serde(default = "default_limit_rows")]
    pub limit_rows: usize,
    /// Attach K-of-M smoothed labels to batch predictions
    #[serde(default = "default_smooth_batches")]
    pub smooth_batches: bool,
}

fn default_limit_rows() -> usize {
    defaults::LIMIT_ROWS
}

fn default_smooth_batches() -> bool {
    defaults::SMOOTH_BATCHES
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            limit_rows: default_limit_rows(),
            smooth_batches: default_smooth_batches(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: EngineConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.window.lookback, 24);
        assert_eq!(config.window.horizon_shift, 12);
        assert_eq!(config.policy.alpha, 0.9);
        assert_eq!(config.calibration.grid_size, 400);
        assert_eq!((config.smoothing.k, config.smoothing.m), (4, 7));
        assert_eq!(config.serving.limit_rows, 200);
        assert_eq!(config.mode(), OperatingMode::SingleDetector);
    }

    #[test]
    fn test_partial_toml_override() {
        let config = EngineConfig::from_toml_str(
            r#"
[policy]
operate_with_single_detector_only = false
alpha = 0.7

[smoothing]
k = 2
m = 3
"#,
        )
        .expect("partial TOML should parse");
        assert_eq!(config.mode(), OperatingMode::Ensemble);
        assert_eq!(config.policy.alpha, 0.7);
        assert_eq!(config.smoothing_params().unwrap(), SmoothingParams { k: 2, m: 3 });
        assert_eq!(config.window.lookback, 24);
    }

    #[test]
    fn test_k_above_m_is_rejected() {
        let err = EngineConfig::from_toml_str("[smoothing]\nk = 5\nm = 3\n").unwrap_err();
        let ConfigError::Validation(errors) = err else {
            panic!("expected validation error, got {err}");
        };
        assert!(errors[0].contains("k=5, m=3"));
    }

    #[test]
    fn test_calibration_settings_follow_config() {
        let mut config = EngineConfig::default();
        config.window.lookback = 6;
        config.calibration.precision_target = 0.8;
        let settings = config.calibration_settings().unwrap();
        assert_eq!(settings.lookback, 6);
        assert_eq!(settings.precision_target, 0.8);
        assert_eq!(settings.ranking_beta, 2.0);
        assert_eq!(settings.smoothing, SmoothingParams { k: 4, m: 7 });
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdm_config.toml");
        let mut config = EngineConfig::default();
        config.artifacts.dir = PathBuf::from("/srv/models");
        config.serving.smooth_batches = false;
        config.save_to_file(&path).unwrap();
        assert_eq!(EngineConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[window\nlookback = ").unwrap();
        let err = EngineConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref p, _) if p == &path));
    }
}
