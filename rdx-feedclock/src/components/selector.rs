//! Chooses, at every render tick, which buffered sample to display.
//!
//! Two policies are available behind the same [`FrameSelector`]:
//!
//! - **Warp** keeps a virtual playback clock in sample-time. Each tick it
//!   advances by the elapsed wall time scaled by a warp factor that pushes the
//!   buffer depth toward its target. Samples at or before the clock are
//!   evicted and the first one after it is displayed.
//! - **Trim** keeps a wall-to-sample offset instead. It evicts everything
//!   older than the current playback time, sheds backlog above soft and hard
//!   caps, and jumps forward when the oldest sample runs too far ahead.
//!
//! Both share the same edge policy: an empty buffer produces no frame and
//! never moves playback backwards; a large backlog is worked off at a bounded
//! rate (except above the hard cap); a large gap is jumped over at once.

use crate::common::FeedRate;
use crate::components::buffer::ArrivalBuffer;
use crate::components::cadence::CadenceEstimator;
use crate::config::{SelectionPolicy, TrimConfig, WarpConfig};
use crate::events::{ResyncReason, SyncEvent};
use crate::sample::Sample;
use crate::time::{warp_factor, PlaybackClock, WallClock, WallTick};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Turns an unevenly filled buffer into one frame per render tick.
#[derive(Debug, Clone)]
pub struct FrameSelector {
    policy: PolicyState,
    wall: WallClock,
    last_warp: f64,
    last_presented: Option<f64>,
    /// Survives `reset`, so a restarted session still reports running dry.
    has_presented: bool,
    starved: bool,
}

#[derive(Debug, Clone)]
enum PolicyState {
    Warp(WarpPolicy),
    Trim(TrimPolicy),
}

impl FrameSelector {
    pub fn new(policy: SelectionPolicy, warp: &WarpConfig, trim: &TrimConfig) -> Self {
        let policy = match policy {
            SelectionPolicy::Warp => PolicyState::Warp(WarpPolicy::new(warp.clone())),
            SelectionPolicy::Trim => PolicyState::Trim(TrimPolicy::new(trim.clone())),
        };
        Self {
            policy,
            wall: WallClock::new(),
            last_warp: 1.0,
            last_presented: None,
            has_presented: false,
            starved: false,
        }
    }

    /// Runs one render tick: advances playback, evicts superseded samples and
    /// returns the sample to display, if any.
    pub fn tick(
        &mut self,
        now: Instant,
        buffer: &mut ArrivalBuffer,
        cadence: &CadenceEstimator,
        rate: FeedRate,
        events: &broadcast::Sender<SyncEvent>,
    ) -> Option<Sample> {
        let wall = self.wall.observe(now);
        let frame = match &mut self.policy {
            PolicyState::Warp(policy) => {
                let (frame, warp) = policy.tick(wall, buffer, cadence, events);
                self.last_warp = warp;
                frame
            }
            PolicyState::Trim(policy) => policy.tick(wall, buffer, rate, events),
        };

        match &frame {
            Some(sample) => {
                self.starved = false;
                self.has_presented = true;
                self.last_presented = Some(sample.timestamp);
            }
            None if buffer.is_empty() && self.has_presented && !self.starved => {
                self.starved = true;
                debug!(position = ?self.position(), "Arrival buffer ran dry.");
                events
                    .send(SyncEvent::Starved {
                        position: self.position(),
                    })
                    .ok();
            }
            None => {}
        }
        frame
    }

    /// The current playback position in sample-time, if playback is running.
    pub fn position(&self) -> Option<f64> {
        match &self.policy {
            PolicyState::Warp(policy) => policy.clock.position(),
            PolicyState::Trim(policy) => policy.position,
        }
    }

    /// The warp factor applied on the last tick (always 1.0 for trim).
    pub fn warp(&self) -> f64 {
        self.last_warp
    }

    /// Timestamp of the most recently returned sample.
    pub fn last_presented(&self) -> Option<f64> {
        self.last_presented
    }

    pub fn policy(&self) -> SelectionPolicy {
        match self.policy {
            PolicyState::Warp(_) => SelectionPolicy::Warp,
            PolicyState::Trim(_) => SelectionPolicy::Trim,
        }
    }

    /// Drops playback state so the next tick starts over from the buffer.
    ///
    /// The warp clock keeps its floor: a restarted session never shows a
    /// sample older than one it already showed.
    pub fn reset(&mut self) {
        match &mut self.policy {
            PolicyState::Warp(policy) => policy.clock.suspend(),
            PolicyState::Trim(policy) => {
                policy.time_delta = None;
                policy.position = None;
            }
        }
        self.wall.reset();
        self.last_warp = 1.0;
        self.last_presented = None;
        self.starved = false;
    }
}

// --- Warped virtual clock ---

#[derive(Debug, Clone)]
struct WarpPolicy {
    config: WarpConfig,
    clock: PlaybackClock,
}

impl WarpPolicy {
    fn new(config: WarpConfig) -> Self {
        Self {
            config,
            clock: PlaybackClock::new(),
        }
    }

    fn tick(
        &mut self,
        wall: WallTick,
        buffer: &mut ArrivalBuffer,
        cadence: &CadenceEstimator,
        events: &broadcast::Sender<SyncEvent>,
    ) -> (Option<Sample>, f64) {
        let target = cadence.target_depth();
        let actual = buffer.span();
        let warp = warp_factor(actual, target, self.config.gain, self.config.clamp);

        if self.clock.is_running() {
            self.clock.advance(wall.elapsed, warp);
        } else if actual >= target {
            if let Some(last) = buffer.last() {
                let start = self.clock.start_at(last.timestamp - target);
                debug!(position = start, actual, target, "Playback clock started.");
                events
                    .send(SyncEvent::Resynchronized {
                        from: None,
                        to: start,
                        reason: ResyncReason::Startup,
                    })
                    .ok();
            }
        }

        let Some(position) = self.clock.position() else {
            trace!(actual, target, "Buffering.");
            return (None, warp);
        };

        buffer.evict_through(position);
        let Some(next) = buffer.peek_front() else {
            self.clock.suspend();
            return (None, warp);
        };

        if next.timestamp > position + self.config.max_skip_secs {
            debug!(from = position, to = next.timestamp, "Gap too large to warp through.");
            self.clock.snap_forward(next.timestamp);
            events
                .send(SyncEvent::Resynchronized {
                    from: Some(position),
                    to: next.timestamp,
                    reason: ResyncReason::MaxSkip,
                })
                .ok();
        }

        trace!(position, warp, timestamp = next.timestamp, "Frame selected.");
        (Some(next.clone()), warp)
    }
}

// --- Trim-and-advance delta ---

#[derive(Debug, Clone)]
struct TrimPolicy {
    config: TrimConfig,
    /// Wall seconds since the session origin minus playback sample-time.
    time_delta: Option<f64>,
    position: Option<f64>,
}

impl TrimPolicy {
    fn new(config: TrimConfig) -> Self {
        Self {
            config,
            time_delta: None,
            position: None,
        }
    }

    fn tick(
        &mut self,
        wall: WallTick,
        buffer: &mut ArrivalBuffer,
        rate: FeedRate,
        events: &broadcast::Sender<SyncEvent>,
    ) -> Option<Sample> {
        let now = wall.since_origin;
        let Some(oldest) = buffer.peek_front().map(|s| s.timestamp) else {
            // Waiting: shift the offset so playback time stands still.
            if let Some(delta) = self.time_delta.as_mut() {
                *delta += wall.elapsed;
            }
            return None;
        };

        let delta = *self.time_delta.get_or_insert(now - oldest);
        let mut actual = now - delta;
        buffer.evict_before(actual);

        let soft_cap = rate.samples_in(self.config.soft_backlog_secs).max(1);
        let hard_cap = rate.samples_in(self.config.hard_backlog_secs).max(soft_cap);
        if buffer.len() > hard_cap {
            if let Some(keep) = buffer.get(buffer.len() - soft_cap).map(|s| s.timestamp) {
                if keep > actual {
                    debug!(from = actual, to = keep, backlog = buffer.len(), "Shedding backlog.");
                    events
                        .send(SyncEvent::Resynchronized {
                            from: Some(actual),
                            to: keep,
                            reason: ResyncReason::HardCap,
                        })
                        .ok();
                    actual = keep;
                }
            }
            buffer.evict_before(actual);
        } else if buffer.len() > soft_cap {
            let excess = (buffer.len() - soft_cap) as f64;
            let step = (self.config.catchup_gain * excess / rate.samples_per_sec())
                .max(self.config.min_catchup_secs);
            trace!(excess, step, "Catching up on backlog.");
            actual += step;
            buffer.evict_before(actual);
        }

        self.time_delta = Some(now - actual);
        self.position = Some(actual);

        let next = buffer.peek_front()?;
        if next.timestamp - actual > self.config.lateness_secs {
            debug!(from = actual, to = next.timestamp, "Playback fell behind, jumping.");
            events
                .send(SyncEvent::Resynchronized {
                    from: Some(actual),
                    to: next.timestamp,
                    reason: ResyncReason::Lateness,
                })
                .ok();
            self.time_delta = Some(now - next.timestamp);
            self.position = Some(next.timestamp);
        }

        Some(next.clone())
    }
}
