//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! The raw TOML is first walked as a `toml::Value` tree and every dotted key
//! is compared against the known field names. Unknown keys only warn. Range
//! violations found after deserialization are fatal.

use std::collections::HashSet;

use crate::smoothing::SmoothingParams;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, "; did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `EngineConfig`.
///
/// Must be kept in step with the section structs in `engine_config.rs`.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [artifacts]
        "artifacts",
        "artifacts.dir",
        // [window]
        "window",
        "window.lookback",
        "window.horizon_shift",
        // [policy]
        "policy",
        "policy.operate_with_single_detector_only",
        "policy.alpha",
        // [calibration]
        "calibration",
        "calibration.f_beta",
        "calibration.precision_target",
        "calibration.grid_size",
        "calibration.ranking_beta",
        "calibration.reference_quantile",
        // [smoothing]
        "smoothing",
        "smoothing.k",
        "smoothing.m",
        // [serving]
        "serving",
        "serving.limit_rows",
        "serving.smooth_batches",
    ];
    keys.iter().copied().collect()
}

/// Recursively collect dotted key paths from a TOML value.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let toml::Value::Table(table) = value {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Closest known key within edit distance 3. Ties resolve to the
/// lexicographically smaller key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

/// Warnings for every key in `raw_toml` that `EngineConfig` does not know.
///
/// Never fails: a syntax error is left for the serde pass to report.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

fn check_finite(name: &str, value: f64, errors: &mut Vec<String>) -> bool {
    if !value.is_finite() {
        errors.push(format!("{name} must be finite (got {value})"));
        return false;
    }
    true
}

/// Range checks on a parsed config.
///
/// Returns (errors, warnings). Errors are values the engine cannot run
/// with; warnings are legal but unusual.
pub fn validate_ranges(config: &super::EngineConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if config.window.lookback == 0 {
        errors.push("window.lookback must be at least 1".to_string());
    }

    let alpha = config.policy.alpha;
    if check_finite("policy.alpha", alpha, &mut errors) && !(0.0..=1.0).contains(&alpha) {
        errors.push(format!("policy.alpha = {alpha} is outside [0, 1]"));
    }

    let c = &config.calibration;
    if check_finite("calibration.f_beta", c.f_beta, &mut errors) && c.f_beta <= 0.0 {
        errors.push(format!("calibration.f_beta = {} must be > 0", c.f_beta));
    }
    if check_finite("calibration.ranking_beta", c.ranking_beta, &mut errors) && c.ranking_beta <= 0.0 {
        errors.push(format!("calibration.ranking_beta = {} must be > 0", c.ranking_beta));
    }
    if check_finite("calibration.precision_target", c.precision_target, &mut errors)
        && !(c.precision_target > 0.0 && c.precision_target <= 1.0)
    {
        errors.push(format!(
            "calibration.precision_target = {} is outside (0, 1]",
            c.precision_target
        ));
    }
    if check_finite("calibration.reference_quantile", c.reference_quantile, &mut errors)
        && !(0.0..=1.0).contains(&c.reference_quantile)
    {
        errors.push(format!(
            "calibration.reference_quantile = {} is outside [0, 1]",
            c.reference_quantile
        ));
    }
    if c.grid_size < 2 {
        errors.push(format!("calibration.grid_size = {} must be at least 2", c.grid_size));
    } else if c.grid_size < 50 {
        warnings.push(ValidationWarning {
            field: "calibration.grid_size".to_string(),
            message: format!("calibration.grid_size = {} is a coarse threshold grid", c.grid_size),
            suggestion: None,
        });
    }

    if let Err(e) = SmoothingParams::new(config.smoothing.k, config.smoothing.m) {
        errors.push(format!("smoothing: {e}"));
    }

    if config.serving.limit_rows < config.window.lookback {
        warnings.push(ValidationWarning {
            field: "serving.limit_rows".to_string(),
            message: format!(
                "serving.limit_rows = {} is below window.lookback = {}; every batch will be too short",
                config.serving.limit_rows, config.window.lookback
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("lookback", "lookback"), 0);
        assert_eq!(levenshtein("lokback", "lookback"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = "[smoothing]\nk = 2\n".parse().unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert_eq!(keys, vec!["smoothing".to_string(), "smoothing.k".to_string()]);
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys("[window]\nlokback = 12\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "window.lokback");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("window.lookback"));
        assert!(warnings[0].to_string().contains("did you mean 'window.lookback'"));
    }

    #[test]
    fn test_valid_keys_produce_no_warnings() {
        let raw = r#"
[policy]
alpha = 0.5

[calibration]
precision_target = 0.7
"#;
        assert!(validate_unknown_keys(raw).is_empty());
    }

    #[test]
    fn test_garbage_key_has_no_suggestion() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_defaults_pass_range_checks() {
        let (errors, warnings) = validate_ranges(&EngineConfig::default());
        assert!(errors.is_empty(), "{errors:?}");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_out_of_range_values_are_errors() {
        let mut config = EngineConfig::default();
        config.policy.alpha = 1.5;
        config.calibration.precision_target = 0.0;
        config.calibration.f_beta = f64::NAN;
        config.smoothing.k = 5;
        config.smoothing.m = 3;
        let (errors, _) = validate_ranges(&config);
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("Invalid smoothing config")));
        assert!(errors.iter().any(|e| e.contains("must be finite")));
    }

    #[test]
    fn test_short_limit_rows_warns() {
        let mut config = EngineConfig::default();
        config.serving.limit_rows = 10;
        let (errors, warnings) = validate_ranges(&config);
        assert!(errors.is_empty());
        assert_eq!(warnings[0].field, "serving.limit_rows");
    }
}
