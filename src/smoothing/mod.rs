//! K-of-M alert smoothing.
//!
//! An alert is raised when at least `k` of the last `m` raw decisions were
//! anomalous. State is a ring buffer of the last `m` decisions plus a running
//! count of positives, so each step is O(1).
//!
//! Smoothing is order-dependent. The batch form [`smooth_alerts`] drives the
//! same [`AlertState::step`] used by live streams, so offline evaluation and
//! online monitoring agree for the same input order.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SmoothingError {
    #[error("Invalid smoothing config: need 1 <= k <= m, got k={k}, m={m}")]
    InvalidConfig { k: usize, m: usize },
}

/// Validated smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothingParams {
    pub k: usize,
    pub m: usize,
}

impl SmoothingParams {
    pub fn new(k: usize, m: usize) -> Result<Self, SmoothingError> {
        if k == 0 || m == 0 || k > m {
            return Err(SmoothingError::InvalidConfig { k, m });
        }
        Ok(Self { k, m })
    }
}

/// Per-stream smoothing state. Owned by exactly one stream.
#[derive(Debug, Clone)]
pub struct AlertState {
    k: usize,
    buffer: Vec<bool>,
    count: usize,
    steps: u64,
}

impl AlertState {
    pub fn new(k: usize, m: usize) -> Result<Self, SmoothingError> {
        Ok(Self::from_params(SmoothingParams::new(k, m)?))
    }

    pub fn from_params(params: SmoothingParams) -> Self {
        Self {
            k: params.k,
            buffer: vec![false; params.m],
            count: 0,
            steps: 0,
        }
    }

    /// Push one raw decision and return the smoothed one.
    pub fn step(&mut self, raw: bool) -> bool {
        let m = self.buffer.len();
        let pos = (self.steps % m as u64) as usize;
        if self.steps >= m as u64 && self.buffer[pos] {
            self.count -= 1;
        }
        self.buffer[pos] = raw;
        if raw {
            self.count += 1;
        }
        self.steps += 1;
        self.count >= self.k
    }

    /// Positives currently in the window.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        debug!(steps = self.steps, count = self.count, "Alert state reset");
        self.buffer.iter_mut().for_each(|v| *v = false);
        self.count = 0;
        self.steps = 0;
    }
}

/// Smooth a whole pre-computed decision sequence from a fresh state.
pub fn smooth_alerts(raw: &[bool], k: usize, m: usize) -> Result<Vec<bool>, SmoothingError> {
    let mut state = AlertState::new(k, m)?;
    Ok(raw.iter().map(|&r| state.step(r)).collect())
}
