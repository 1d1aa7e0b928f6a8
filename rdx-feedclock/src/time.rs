//! Time bookkeeping: the wall clock as seen by render ticks, and the virtual
//! playback clock that runs in sample-time.

use tokio::time::Instant;

/// Measures wall time between consecutive render ticks.
///
/// Reports both the elapsed time since the previous observation and the
/// time since the first one (the session origin).
#[derive(Debug, Clone, Default)]
pub struct WallClock {
    origin: Option<Instant>,
    last: Option<Instant>,
}

/// One observation of the wall clock, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallTick {
    /// Time since the previous tick; zero on the first one.
    pub elapsed: f64,
    /// Time since the first tick of the session.
    pub since_origin: f64,
}

impl WallClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, now: Instant) -> WallTick {
        let origin = *self.origin.get_or_insert(now);
        let elapsed = self
            .last
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .unwrap_or(0.0);
        self.last = Some(now);
        WallTick {
            elapsed,
            since_origin: now.saturating_duration_since(origin).as_secs_f64(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A virtual clock in sample-time.
///
/// It is undefined while playback is paused (at startup, or after the buffer
/// ran dry). The last defined position is kept as a floor, so that resuming
/// never moves playback backwards.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    position: Option<f64>,
    floor: f64,
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self {
            position: None,
            floor: f64::NEG_INFINITY,
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Option<f64> {
        self.position
    }

    pub fn is_running(&self) -> bool {
        self.position.is_some()
    }

    /// Advances a running clock by `elapsed * warp`. No-op while paused.
    pub fn advance(&mut self, elapsed: f64, warp: f64) {
        if let Some(position) = self.position.as_mut() {
            *position += elapsed * warp;
        }
    }

    /// Starts (or moves) the clock, never below the floor. Returns the new position.
    pub fn start_at(&mut self, position: f64) -> f64 {
        let position = position.max(self.floor);
        self.position = Some(position);
        position
    }

    /// Jumps forward to `position`. Backward requests are ignored.
    pub fn snap_forward(&mut self, position: f64) {
        if self.position.map_or(true, |current| position > current) {
            self.start_at(position);
        }
    }

    /// Pauses playback, remembering where it stopped.
    pub fn suspend(&mut self) {
        if let Some(position) = self.position.take() {
            self.floor = self.floor.max(position);
        }
    }
}

/// The multiplicative correction applied to elapsed wall time.
///
/// `1 + gain * (actual - target) / target`, clamped to `[1 - clamp, 1 + clamp]`.
/// A warp above one drains excess backlog; below one stretches a thin one.
pub fn warp_factor(actual_depth: f64, target_depth: f64, gain: f64, clamp: f64) -> f64 {
    let raw = 1.0 + gain * (actual_depth - target_depth) / target_depth;
    raw.clamp(1.0 - clamp, 1.0 + clamp)
}
