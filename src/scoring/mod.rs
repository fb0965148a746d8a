//! Score pipeline: raw detector score → normalized score → ensemble score.
//!
//! ## Architecture
//!
//! ```text
//! scaled window ──► Scorer::Reconstruction ──► ScoreNormalizer(ae) ──┐
//!                                                                   ├─► EnsembleCombiner ──► score
//! scaled row    ──► Scorer::Isolation      ──► ScoreNormalizer(if) ──┘
//! ```
//!
//! Everything here is pure and `Send + Sync`; loaded detectors are shared
//! read-only across requests and rayon workers.

pub mod autoencoder;
pub mod ensemble;
pub mod isolation_forest;
pub mod normalizer;
pub mod scorer;

pub use autoencoder::LinearAutoencoder;
pub use ensemble::{combine, combine_all, EnsembleCombiner, OperatingMode, ScoringPath};
pub use isolation_forest::{average_path_length, IsolationForest, IsolationTree};
pub use normalizer::{
    normalize, normalize_batch, NormalizationError, NormalizationRange, ScoreNormalizer, BATCH_EPSILON,
    REFERENCE_EPSILON,
};
pub use scorer::{DetectorKind, IsolationModel, ReconstructionModel, Scorer, ScorerError, ScorerInput};
