//! Continuous monitoring of live streams.
//!
//! Each monitored unit owns a [`StreamMonitor`]: the last `lookback` raw rows
//! plus its [`AlertState`]. Observations must arrive in time order and a
//! monitor is never shared between threads while it is updated; distinct
//! streams are independent.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

use super::{ServingContext, ServingError};
use crate::smoothing::{AlertState, SmoothingParams};
use crate::types::{align_record, FeatureRecord, HealthLabel};

/// Outcome of one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamUpdate {
    /// Not enough history for a full window yet; nothing was scored
    WarmingUp { observed: usize, required: usize },
    Decision {
        /// Position of the observation in the stream
        index: usize,
        score: f64,
        label: HealthLabel,
        smoothed_label: HealthLabel,
        /// Raw positives among the last M decisions
        recent_anomalies: usize,
    },
}

#[derive(Debug, Clone)]
pub struct StreamMonitor {
    lookback: usize,
    history: VecDeque<Vec<f64>>,
    alerts: AlertState,
    observed: usize,
}

impl StreamMonitor {
    pub fn new(lookback: usize, smoothing: SmoothingParams) -> Self {
        Self {
            lookback,
            history: VecDeque::with_capacity(lookback),
            alerts: AlertState::from_params(smoothing),
            observed: 0,
        }
    }

    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Append one raw row (deployed feature order) and score it once the
    /// history holds a full window. A row of the wrong width is rejected
    /// before it touches the history or the stream position.
    pub fn observe_row(&mut self, ctx: &ServingContext, row: Vec<f64>) -> Result<StreamUpdate, ServingError> {
        ctx.window.repair_row(&row)?;
        if self.history.len() == self.lookback {
            self.history.pop_front();
        }
        self.history.push_back(row);
        let index = self.observed;
        self.observed += 1;

        if self.history.len() < self.lookback {
            return Ok(StreamUpdate::WarmingUp {
                observed: self.history.len(),
                required: self.lookback,
            });
        }

        let score = ctx.score_rows(self.history.make_contiguous())?;
        let label = HealthLabel::from_score(score, ctx.threshold());
        let smoothed = self.alerts.step(label.is_anomaly());
        Ok(StreamUpdate::Decision {
            index,
            score,
            label,
            smoothed_label: HealthLabel::from_decision(smoothed),
            recent_anomalies: self.alerts.count(),
        })
    }

    pub fn observe(&mut self, ctx: &ServingContext, record: &FeatureRecord) -> Result<StreamUpdate, ServingError> {
        self.observe_row(ctx, align_record(record, ctx.feature_order()))
    }

    /// Drop history and smoothing state.
    pub fn reset(&mut self) {
        self.history.clear();
        self.alerts.reset();
        self.observed = 0;
    }
}

/// Monitors keyed by stream id. Streams are created on first observation
/// and only removed by [`end`](Self::end); there is no eviction.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    monitors: HashMap<String, StreamMonitor>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        ctx: &ServingContext,
        stream_id: &str,
        record: &FeatureRecord,
    ) -> Result<StreamUpdate, ServingError> {
        let monitor = self.monitors.entry(stream_id.to_string()).or_insert_with(|| {
            debug!(stream = stream_id, "Stream started");
            ctx.monitor()
        });
        monitor.observe(ctx, record)
    }

    /// Remove a stream and its state. Returns whether it existed.
    pub fn end(&mut self, stream_id: &str) -> bool {
        let existed = self.monitors.remove(stream_id).is_some();
        if existed {
            info!(stream = stream_id, "Stream ended");
        }
        existed
    }

    pub fn reset(&mut self, stream_id: &str) -> bool {
        match self.monitors.get_mut(stream_id) {
            Some(monitor) => {
                monitor.reset();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}
