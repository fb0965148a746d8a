//! Linear projection autoencoder.
//!
//! Encodes each timestep onto `k` orthonormal components and decodes back:
//! `x̂ = μ + Cᵀ·C·(x − μ)`. Exported by the training job as JSON alongside
//! the scaler it was fit with.

use serde::{Deserialize, Serialize};

use super::scorer::{ReconstructionModel, ScorerError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearAutoencoder {
    /// Per-feature centering vector (length F)
    mean: Vec<f64>,
    /// Encoder rows (k × F)
    components: Vec<Vec<f64>>,
}

impl LinearAutoencoder {
    pub fn new(mean: Vec<f64>, components: Vec<Vec<f64>>) -> Result<Self, ScorerError> {
        let model = Self { mean, components };
        model.validate()?;
        Ok(model)
    }

    /// Shape and finiteness checks; run after deserializing.
    pub fn validate(&self) -> Result<(), ScorerError> {
        if self.mean.is_empty() {
            return Err(ScorerError::InvalidModel("autoencoder has no features".to_string()));
        }
        if let Some((i, c)) = self
            .components
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() != self.mean.len())
        {
            return Err(ScorerError::InvalidModel(format!(
                "component {i} has {} weights, expected {}",
                c.len(),
                self.mean.len()
            )));
        }
        let all_finite = self.mean.iter().chain(self.components.iter().flatten()).all(|v| v.is_finite());
        if !all_finite {
            return Err(ScorerError::InvalidModel("autoencoder weights must be finite".to_string()));
        }
        Ok(())
    }

    fn reconstruct_row(&self, row: &[f64]) -> Vec<f64> {
        let centered: Vec<f64> = row.iter().zip(&self.mean).map(|(x, m)| x - m).collect();
        let mut out = self.mean.clone();
        for component in &self.components {
            let z: f64 = component.iter().zip(&centered).map(|(w, x)| w * x).sum();
            for (o, w) in out.iter_mut().zip(component) {
                *o += z * w;
            }
        }
        out
    }
}

impl ReconstructionModel for LinearAutoencoder {
    fn n_features(&self) -> usize {
        self.mean.len()
    }

    fn reconstruct(&self, window: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScorerError> {
        if window.is_empty() {
            return Err(ScorerError::EmptyInput);
        }
        if let Some(bad) = window.iter().find(|r| r.len() != self.mean.len()) {
            return Err(ScorerError::InputWidth {
                expected: self.mean.len(),
                found: bad.len(),
            });
        }
        Ok(window.iter().map(|r| self.reconstruct_row(r)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Keeps only the first axis of a 2-feature space.
    fn first_axis_model() -> LinearAutoencoder {
        LinearAutoencoder::new(vec![0.0, 0.0], vec![vec![1.0, 0.0]]).unwrap()
    }

    #[test]
    fn test_in_subspace_reconstructs_exactly() {
        let model = first_axis_model();
        let err = model.reconstruction_error(&[vec![3.0, 0.0], vec![-1.0, 0.0]]).unwrap();
        assert!(err.abs() < 1e-12);
    }

    #[test]
    fn test_off_subspace_error() {
        let model = first_axis_model();
        // Second feature is lost: errors are 2² and 0² over 4 cells
        let err = model.reconstruction_error(&[vec![1.0, 2.0], vec![5.0, 0.0]]).unwrap();
        assert!((err - 1.0).abs() < 1e-12, "Error: {}", err);
    }

    #[test]
    fn test_mean_is_restored() {
        let model = LinearAutoencoder::new(vec![10.0, -4.0], vec![]).unwrap();
        let rec = model.reconstruct(&[vec![11.0, -4.0]]).unwrap();
        assert_eq!(rec[0], vec![10.0, -4.0]);
    }

    #[test]
    fn test_rejects_wrong_width() {
        let model = first_axis_model();
        let err = model.reconstruct(&[vec![1.0, 2.0, 3.0]]).unwrap_err();
        assert_eq!(err, ScorerError::InputWidth { expected: 2, found: 3 });
    }

    #[test]
    fn test_rejects_ragged_components() {
        assert!(LinearAutoencoder::new(vec![0.0, 0.0], vec![vec![1.0]]).is_err());
        assert!(LinearAutoencoder::new(vec![], vec![]).is_err());
    }
}
