//! Ranking metrics and reference-distribution statistics for calibration reports.

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use super::threshold::{precision_recall_curve, ConfusionCounts};
use super::CalibrationError;

/// Area under the ROC curve via the rank-sum statistic (ties share the
/// average rank). `None` when only one class is present.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Result<Option<f64>, CalibrationError> {
    super::threshold::check_inputs(scores, labels)?;
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Ok(None);
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        // 1-based ranks start+1 ..= end+1 share their mean
        let avg_rank = (start + end) as f64 / 2.0 + 1.0;
        let tied_positives = order[start..=end].iter().filter(|&&i| labels[i]).count();
        rank_sum += avg_rank * tied_positives as f64;
        start = end + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Ok(Some((rank_sum - p * (p + 1.0) / 2.0) / (p * n)))
}

/// Average precision: `Σ (Rₙ − Rₙ₋₁)·Pₙ` over descending thresholds.
/// `None` when there are no positive labels.
pub fn average_precision(scores: &[f64], labels: &[bool]) -> Result<Option<f64>, CalibrationError> {
    let curve = precision_recall_curve(scores, labels)?;
    if !labels.iter().any(|&l| l) {
        return Ok(None);
    }
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    for point in curve.iter().rev() {
        ap += (point.recall - prev_recall) * point.precision;
        prev_recall = point.recall;
    }
    Ok(Some(ap))
}

/// ROC-AUC and PR-AUC together.
pub fn ranking_metrics(scores: &[f64], labels: &[bool]) -> Result<(Option<f64>, Option<f64>), CalibrationError> {
    Ok((roc_auc(scores, labels)?, average_precision(scores, labels)?))
}

/// `q`-quantile of the finite values of a reference distribution.
///
/// Linear interpolation between order statistics at rank `(n - 1) * q`
/// (Hyndman-Fan type 7).
pub fn reference_quantile(values: &[f64], q: f64) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let n = finite.len();
    let mut data = Data::new(finite);
    let h = (n - 1) as f64 * q;
    let lo = h.floor() as usize;
    let lower = data.order_statistic(lo + 1);
    if lo + 1 >= n {
        return Some(lower);
    }
    let upper = data.order_statistic(lo + 2);
    Some(lower + (h - lo as f64) * (upper - lower))
}

/// Precision/recall/F1 plus confusion matrix for one set of binary decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub confusion: ConfusionCounts,
}

impl DecisionSummary {
    pub fn from_decisions(predicted: &[bool], actual: &[bool]) -> Self {
        let confusion = ConfusionCounts::from_decisions(predicted, actual);
        Self {
            precision: confusion.precision(),
            recall: confusion.recall(),
            f1: confusion.f1(),
            confusion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roc_auc_perfect_and_inverted() {
        let y = [false, false, true, true];
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &y).unwrap(), Some(1.0));
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &y).unwrap(), Some(0.0));
    }

    #[test]
    fn test_roc_auc_ties_count_half() {
        let auc = roc_auc(&[0.5, 0.5], &[false, true]).unwrap().unwrap();
        assert!((auc - 0.5).abs() < 1e-12);
        // Classic example: 0.75
        let auc = roc_auc(&[0.1, 0.4, 0.35, 0.8], &[false, false, true, true]).unwrap().unwrap();
        assert!((auc - 0.75).abs() < 1e-12, "AUC: {}", auc);
    }

    #[test]
    fn test_single_class_is_undefined() {
        assert_eq!(roc_auc(&[0.1, 0.2], &[true, true]).unwrap(), None);
        assert_eq!(average_precision(&[0.1, 0.2], &[false, false]).unwrap(), None);
    }

    #[test]
    fn test_average_precision() {
        // Descending: 0.8(+) P=1 R=.5, 0.4(-), 0.35(+) P=2/3 R=1
        let ap = average_precision(&[0.1, 0.4, 0.35, 0.8], &[false, false, true, true])
            .unwrap()
            .unwrap();
        assert!((ap - (0.5 + 0.5 * 2.0 / 3.0)).abs() < 1e-12, "AP: {}", ap);
    }

    #[test]
    fn test_reference_quantile_interpolates_linearly() {
        // Rank (4 - 1) * 0.95 = 2.85 between 3.0 and 10.0
        let q = reference_quantile(&[10.0, 1.0, 3.0, 2.0], 0.95).unwrap();
        assert!((q - (3.0 + 0.85 * 7.0)).abs() < 1e-12, "q: {}", q);
        let median = reference_quantile(&[4.0, 1.0, 2.0, 3.0], 0.5).unwrap();
        assert!((median - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_reference_quantile_bounds() {
        let values: Vec<f64> = (0..=100).map(f64::from).collect();
        let q95 = reference_quantile(&values, 0.95).unwrap();
        assert!((q95 - 95.0).abs() < 1e-9, "q95: {}", q95);
        assert_eq!(reference_quantile(&values, 1.0), Some(100.0));
        assert_eq!(reference_quantile(&values, 0.0), Some(0.0));
        assert_eq!(reference_quantile(&[7.0], 0.95), Some(7.0));
        assert_eq!(reference_quantile(&[f64::NAN], 0.5), None);
    }

    #[test]
    fn test_decision_summary() {
        let s = DecisionSummary::from_decisions(&[true, true, false, false], &[true, false, true, false]);
        assert_eq!(s.confusion.tp, 1);
        assert_eq!(s.confusion.fp, 1);
        assert_eq!(s.confusion.fn_, 1);
        assert_eq!(s.confusion.tn, 1);
        assert_eq!(s.precision, 0.5);
    }
}
