//! Readiness report.

use serde::{Deserialize, Serialize};

use crate::scoring::ScoringPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// Which artifacts loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub feature_columns: usize,
    pub iforest_loaded: bool,
    pub scaler_if_loaded: bool,
    pub ae_loaded: bool,
    pub scaler_ae_loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub operational: bool,
    /// `unavailable` means served scores are all zero and carry no signal
    pub scoring_path: ScoringPath,
    pub details: HealthDetails,
}

impl HealthReport {
    /// Operational needs the isolation detector and its scaler. A missing
    /// reconstruction detector only degrades the scoring path.
    pub fn evaluate(details: HealthDetails, scoring_path: ScoringPath) -> Self {
        let operational = details.iforest_loaded && details.scaler_if_loaded;
        Self {
            status: if operational { HealthStatus::Ok } else { HealthStatus::Error },
            operational,
            scoring_path,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(ae: bool, iso: bool) -> HealthDetails {
        HealthDetails {
            feature_columns: 4,
            iforest_loaded: iso,
            scaler_if_loaded: iso,
            ae_loaded: ae,
            scaler_ae_loaded: ae,
        }
    }

    #[test]
    fn test_isolation_required() {
        let report = HealthReport::evaluate(details(true, false), ScoringPath::ReconstructionOnly);
        assert!(!report.operational);
        assert_eq!(report.status, HealthStatus::Error);

        let report = HealthReport::evaluate(details(false, true), ScoringPath::IsolationOnly);
        assert!(report.operational);
    }

    #[test]
    fn test_missing_reconstruction_stays_operational() {
        let report = HealthReport::evaluate(details(false, true), ScoringPath::IsolationOnly);
        assert!(report.operational);
        assert_eq!(report.status, HealthStatus::Ok);
        assert!(!report.details.ae_loaded);
        assert_eq!(report.scoring_path, ScoringPath::IsolationOnly);
    }

    #[test]
    fn test_isolation_scaler_required() {
        let mut d = details(true, true);
        d.scaler_if_loaded = false;
        assert!(!HealthReport::evaluate(d, ScoringPath::ReconstructionOnly).operational);
    }

    #[test]
    fn test_unavailable_path_is_visible() {
        let report = HealthReport::evaluate(details(false, false), ScoringPath::Unavailable);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["scoring_path"], "unavailable");
    }
}
