//! Shared data structures for the equipment health decision pipeline
//!
//! This module defines the types that flow between the pipeline stages:
//! - Input: FeatureRecord (one observation), FeatureTable (aligned matrix)
//! - Output: PredictionResult (per scored row), RollingPrediction (latest row),
//!   PredictionBatch (one-shot batch response)

mod features;
mod prediction;

pub use features::*;
pub use prediction::*;
