//! Isolation forest over serialized binary trees.
//!
//! Trees use the flat array layout of common tree exporters: node `i` is a
//! leaf when `children_left[i] == -1`; otherwise the row goes left when
//! `x[feature[i]] <= threshold[i]`. Anomaly score is
//! `2^(-E[h(x)] / c(max_samples))`, so shorter average paths score higher.

use serde::{Deserialize, Serialize};

use super::scorer::{IsolationModel, ScorerError};

/// Marker for "no child" in the flat node arrays.
pub const LEAF: i64 = -1;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<usize>,
    pub threshold: Vec<f64>,
    pub n_node_samples: Vec<usize>,
    /// Columns this tree was grown on; `feature[i]` indexes into this subset.
    #[serde(default)]
    pub features: Option<Vec<usize>>,
}

impl IsolationTree {
    fn node_count(&self) -> usize {
        self.children_left.len()
    }

    fn validate(&self, n_features: usize) -> Result<(), String> {
        let n = self.node_count();
        if n == 0 {
            return Err("tree has no nodes".to_string());
        }
        if [
            self.children_right.len(),
            self.feature.len(),
            self.threshold.len(),
            self.n_node_samples.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return Err("node arrays differ in length".to_string());
        }
        if let Some(subset) = &self.features {
            if let Some(&bad) = subset.iter().find(|&&f| f >= n_features) {
                return Err(format!("feature subset index {bad} out of range"));
            }
        }
        let width = self.features.as_ref().map_or(n_features, Vec::len);

        for node in 0..n {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == LEAF {
                continue;
            }
            // Children come after their parent, which also rules out cycles.
            for child in [left, right] {
                if child <= node as i64 || child >= n as i64 {
                    return Err(format!("node {node} has invalid child {child}"));
                }
            }
            if self.feature[node] >= width {
                return Err(format!("node {node} splits on feature {} of {width}", self.feature[node]));
            }
        }
        Ok(())
    }

    /// Depth of the leaf reached by `row`, plus the expected remaining depth
    /// for the samples still unresolved in that leaf.
    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = 0usize;
        let mut depth = 0usize;
        while self.children_left[node] != LEAF {
            let column = match &self.features {
                Some(subset) => subset[self.feature[node]],
                None => self.feature[node],
            };
            let next = if row[column] <= self.threshold[node] {
                self.children_left[node]
            } else {
                self.children_right[node]
            };
            // Validated: non-leaf children are in range and strictly increasing.
            node = next as usize;
            depth += 1;
        }
        depth as f64 + average_path_length(self.n_node_samples[node])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    pub n_features: usize,
    pub max_samples: usize,
    pub trees: Vec<IsolationTree>,
}

impl IsolationForest {
    pub fn validate(&self) -> Result<(), ScorerError> {
        if self.n_features == 0 {
            return Err(ScorerError::InvalidModel("isolation forest has no features".to_string()));
        }
        if self.max_samples < 2 {
            return Err(ScorerError::InvalidModel(format!(
                "max_samples must be at least 2, got {}",
                self.max_samples
            )));
        }
        if self.trees.is_empty() {
            return Err(ScorerError::InvalidModel("isolation forest has no trees".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|e| ScorerError::InvalidModel(format!("tree {i}: {e}")))?;
        }
        Ok(())
    }

    pub fn mean_path_length(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.path_length(row)).sum();
        total / self.trees.len() as f64
    }
}

impl IsolationModel for IsolationForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn anomaly_score(&self, row: &[f64]) -> Result<f64, ScorerError> {
        if row.len() != self.n_features {
            return Err(ScorerError::InputWidth {
                expected: self.n_features,
                found: row.len(),
            });
        }
        let depth = self.mean_path_length(row);
        Ok(2f64.powf(-depth / average_path_length(self.max_samples)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One split on feature 0 at 0.5: left leaf holds 1 sample, right leaf 3.
    fn stump() -> IsolationTree {
        IsolationTree {
            children_left: vec![1, LEAF, LEAF],
            children_right: vec![2, LEAF, LEAF],
            feature: vec![0, 0, 0],
            threshold: vec![0.5, 0.0, 0.0],
            n_node_samples: vec![4, 1, 3],
            features: None,
        }
    }

    fn forest(trees: Vec<IsolationTree>) -> IsolationForest {
        IsolationForest {
            n_features: 2,
            max_samples: 4,
            trees,
        }
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(3) = 2(ln 2 + γ) - 4/3
        let expected = 2.0 * (2f64.ln() + EULER_GAMMA) - 4.0 / 3.0;
        assert!((average_path_length(3) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_isolated_point_scores_higher() {
        let model = forest(vec![stump()]);
        model.validate().unwrap();
        let isolated = model.anomaly_score(&[0.1, 0.0]).unwrap();
        let crowded = model.anomaly_score(&[0.9, 0.0]).unwrap();
        assert!(isolated > crowded, "isolated {} vs crowded {}", isolated, crowded);

        // Left leaf: depth 1, c(1)=0
        let expected = 2f64.powf(-1.0 / average_path_length(4));
        assert!((isolated - expected).abs() < 1e-12);
    }

    #[test]
    fn test_feature_subset_remaps_columns() {
        let mut tree = stump();
        tree.features = Some(vec![1]);
        let model = forest(vec![tree]);
        model.validate().unwrap();
        // Split now reads column 1
        let a = model.anomaly_score(&[9.0, 0.1]).unwrap();
        let b = model.anomaly_score(&[0.1, 9.0]).unwrap();
        assert!(a > b);
    }

    #[test]
    fn test_validate_rejects_backward_child() {
        let mut tree = stump();
        tree.children_right[0] = 0;
        assert!(forest(vec![tree]).validate().is_err());
        assert!(forest(vec![]).validate().is_err());
    }

    #[test]
    fn test_rejects_wrong_width() {
        let model = forest(vec![stump()]);
        assert_eq!(
            model.anomaly_score(&[0.1]),
            Err(ScorerError::InputWidth { expected: 2, found: 1 })
        );
    }
}
