//! Estimates how much sample-time a single fetch typically delivers.

use crate::config::CadenceConfig;
use crate::events::SyncEvent;
use crate::sample::Sample;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Exponential moving average of the per-fetch chunk length.
///
/// The target buffer depth is a multiple of this average, so the playback
/// side always tries to keep several fetch cycles' worth of data queued.
#[derive(Debug, Clone)]
pub struct CadenceEstimator {
    average: f64,
    smoothing: f64,
    depth_multiplier: f64,
    stall_after_refills: u32,
    skipped_refills: u32,
}

impl CadenceEstimator {
    pub fn new(initial_average: f64, config: &CadenceConfig) -> Self {
        Self {
            average: initial_average,
            smoothing: config.smoothing,
            depth_multiplier: config.depth_multiplier,
            stall_after_refills: config.stall_after_refills,
            skipped_refills: 0,
        }
    }

    /// Folds one fetched batch into the average.
    ///
    /// A batch that landed in an empty buffer is a catch-up burst and is left
    /// out. If that keeps happening, the estimate is flagged once per streak.
    pub fn update(
        &mut self,
        batch: &[Sample],
        buffer_was_empty: bool,
        events: &broadcast::Sender<SyncEvent>,
    ) {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return;
        };

        if buffer_was_empty {
            self.skipped_refills = self.skipped_refills.saturating_add(1);
            if self.skipped_refills == self.stall_after_refills {
                warn!(
                    skipped = self.skipped_refills,
                    average = self.average,
                    "Cadence estimate has not been updated: every recent batch was a refill."
                );
                events
                    .send(SyncEvent::CadenceStalled {
                        skipped_refills: self.skipped_refills,
                        average: self.average,
                    })
                    .ok();
            }
            return;
        }

        self.skipped_refills = 0;
        let chunk_len = last.timestamp - first.timestamp;
        self.average = self.smoothing * chunk_len + (1.0 - self.smoothing) * self.average;
        trace!(chunk_len, average = self.average, "Cadence updated.");
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    /// The buffer depth, in seconds, playback should try to maintain.
    pub fn target_depth(&self) -> f64 {
        self.depth_multiplier * self.average
    }

    /// Consecutive refill batches seen since the last real update.
    pub fn skipped_refills(&self) -> u32 {
        self.skipped_refills
    }

    /// Never true when `stall_after_refills` is zero.
    pub fn is_stalled(&self) -> bool {
        self.stall_after_refills > 0 && self.skipped_refills >= self.stall_after_refills
    }
}
